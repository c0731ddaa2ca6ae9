pub mod bundle;
pub mod compress;
pub mod shard;
pub mod transport;

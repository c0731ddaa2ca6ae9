//! Line chunking and round-robin placement.
//!
//! The global sequence counter and the worker-selection index are two
//! independent monotonic counters advanced together once per chunk:
//! sequence numbers follow original-file order no matter which worker a
//! chunk lands on.

/// One bounded slice of the source file's lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence: u64,
    pub payload: String,
}

/// Accumulates lines into fixed-size chunks, assigning the global
/// sequence at completion time.
#[derive(Debug)]
pub struct Splitter {
    chunk_size: usize,
    buffer: Vec<String>,
    next_sequence: u64,
}

impl Splitter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Adds one line; returns a chunk when the buffer reaches the
    /// configured size.
    pub fn push(&mut self, line: String) -> Option<Chunk> {
        self.buffer.push(line);
        if self.buffer.len() == self.chunk_size {
            return Some(self.take_chunk());
        }
        None
    }

    /// Drains the final partial chunk, if any lines remain.
    pub fn finish(&mut self) -> Option<Chunk> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.take_chunk())
    }

    fn take_chunk(&mut self) -> Chunk {
        let payload = std::mem::take(&mut self.buffer).join("\n");
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Chunk { sequence, payload }
    }
}

/// Worker-selection counter, independent of chunk sequencing.
#[derive(Debug)]
pub struct RoundRobin {
    next: usize,
    len: usize,
}

impl RoundRobin {
    pub fn new(len: usize) -> Self {
        Self {
            next: 0,
            len: len.max(1),
        }
    }

    pub fn next_index(&mut self) -> usize {
        let index = self.next % self.len;
        self.next += 1;
        index
    }
}

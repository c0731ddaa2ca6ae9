//! In-memory zip bundling of a reconstruction directory. Entry names are
//! paths relative to the bundled root so the dispatcher can re-create the
//! tree under its own worker-labeled directory.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::write::{SimpleFileOptions, ZipWriter};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed building zip bundle: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn io_err(path: &Path, source: std::io::Error) -> BundleError {
    BundleError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Packs every regular file under `root` into a zip held in memory,
/// preserving the directory structure via relative entry names.
pub fn bundle_directory(root: &Path) -> Result<Vec<u8>, BundleError> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for relative in &files {
        let entry_name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer.start_file(entry_name, options)?;
        let absolute = root.join(relative);
        let mut file = std::fs::File::open(&absolute).map_err(|e| io_err(&absolute, e))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| io_err(&absolute, e))?;
        writer.write_all(&contents).map_err(|e| io_err(&absolute, e))?;
    }
    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), BundleError> {
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if entry.file_type().map_err(|e| io_err(&path, e))?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}

//! Working-directory archive packaging.
//!
//! Blocking file IO; the runner calls this inside `spawn_blocking`.

use std::fs::File;
use std::io;
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use annolab_core::error::{CoreError, CoreResult};

/// Zip the contents of `src` into the archive file at `dest`.
///
/// Entry names are relative to `src`, using `/` separators. Empty
/// directories are not recorded.
pub fn archive_directory(src: &Path, dest: &Path) -> CoreResult<()> {
    let file = File::create(dest)
        .map_err(|e| CoreError::Internal(format!("failed to create archive: {e}")))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    add_dir(&mut writer, src, src, options)
        .map_err(|e| CoreError::Internal(format!("failed to write archive: {e}")))?;

    writer
        .finish()
        .map_err(|e| CoreError::Internal(format!("failed to finalize archive: {e}")))?;
    Ok(())
}

fn add_dir(
    writer: &mut ZipWriter<File>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
) -> io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    // Stable archive layout regardless of directory iteration order.
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            add_dir(writer, root, &path, options)?;
        } else {
            let name = path
                .strip_prefix(root)
                .map_err(|e| io::Error::other(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            writer.start_file(name, options)?;
            let mut reader = File::open(&path)?;
            io::copy(&mut reader, writer)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Returns every regular file directly inside `dir`, sorted by path.
pub fn find_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::DirectoryNotFound(dir.to_owned()));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    Ok(files)
}

/// Checks if the given path looks like a video file. Only the file header is inspected,
/// so this is cheap but does not guarantee the file decodes.
pub fn is_valid_video_file(path: impl AsRef<Path>) -> Result<bool> {
    let mut buf = [0u8; 8192];
    let mut f = std::fs::File::open(path.as_ref())?;
    let n = f.read(&mut buf)?;
    Ok(infer::is_video(&buf[..n]))
}

/// File name without its extension, lossily converted to UTF-8.
pub fn file_stem(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Identifier for a (video, audio) pair, used to name per-pair artifacts.
pub fn pair_label(video: impl AsRef<Path>, audio: impl AsRef<Path>) -> String {
    format!("{}__{}", file_stem(video), file_stem(audio))
}

/// Number of worker threads to use: `fraction` of the available cores, rounded down,
/// but never less than one.
pub fn worker_count(fraction: f64) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let workers = (cpus as f64 * fraction).floor();
    if workers.is_finite() && workers >= 1.0 {
        workers as usize
    } else {
        1
    }
}

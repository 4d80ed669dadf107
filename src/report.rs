use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::matching::Segment;
use crate::util::file_stem;
use crate::Result;

/// Formats one report block: the audio name, its matched segments, and a blank line.
pub fn format_block(audio: &Path, segments: &[Segment]) -> String {
    let segments = segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Audio: {}\nMatched segments: [{}]\n\n",
        file_stem(audio),
        segments
    )
}

/// Appends match results to per-video plain-text reports in a results directory.
///
/// Each video gets `<results_dir>/<video_stem>_report.txt`. Appends to the same report
/// are serialized by a per-file lock, and each block is written with a single call, so
/// blocks from concurrent tasks never interleave. Reports are never truncated.
#[derive(Debug)]
pub struct ReportWriter {
    results_dir: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ReportWriter {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Path of the report for `video`.
    pub fn report_path(&self, video: &Path) -> PathBuf {
        self.results_dir
            .join(format!("{}_report.txt", file_stem(video)))
    }

    /// Appends the segments `audio` matched in `video` to the video's report and
    /// returns the report path.
    pub fn append(&self, video: &Path, audio: &Path, segments: &[Segment]) -> Result<PathBuf> {
        let path = self.report_path(video);
        let block = format_block(audio, segments);

        // Only the map lookup holds the outer lock.
        let file_lock = self.locks.lock().entry(path.clone()).or_default().clone();
        let _guard = file_lock.lock();

        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        f.write_all(block.as_bytes())?;

        tracing::debug!("appended {} to {}", file_stem(audio), path.display());

        Ok(path)
    }
}

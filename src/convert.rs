#[cfg(feature = "rayon")]
extern crate rayon;

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::audio::{Decode, Waveform};
use crate::{util, Result};

/// What happened to each file in a [convert_videos] run.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct ConvertSummary {
    /// WAV files written.
    pub converted: Vec<PathBuf>,
    /// Videos whose WAV file already existed.
    pub skipped: Vec<PathBuf>,
    /// Videos that could not be converted, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

enum Outcome {
    Converted(PathBuf),
    Skipped(PathBuf),
    Failed(PathBuf, String),
}

/// Writes `waveform` to `path` as a mono 32-bit float WAV file.
pub fn write_wav(path: &Path, waveform: &Waveform) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate.max(1),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for sample in &waveform.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

fn convert_one(video: &Path, out_dir: &Path, decoder: &dyn Decode) -> Outcome {
    let target = out_dir.join(format!("{}.wav", util::file_stem(video)));
    if target.exists() {
        tracing::debug!("{} already converted, skipping", video.display());
        return Outcome::Skipped(video.to_owned());
    }

    let result = decoder
        .decode(video)
        .and_then(|waveform| write_wav(&target, &waveform));
    match result {
        Ok(()) => {
            tracing::info!("converted {} to {}", video.display(), target.display());
            Outcome::Converted(target)
        }
        Err(e) => {
            tracing::error!("failed to convert {}: {}", video.display(), e);
            // Don't leave a partial file behind; it would be skipped next time.
            let _ = std::fs::remove_file(&target);
            Outcome::Failed(video.to_owned(), e.to_string())
        }
    }
}

/// Extracts the soundtrack of every video file in `video_dir` into `<stem>.wav` files in
/// `out_dir`. Files that are not videos are ignored, existing outputs are skipped, and a
/// file that fails to convert does not stop the others.
pub fn convert_videos(
    video_dir: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    decoder: &dyn Decode,
    threading: bool,
) -> Result<ConvertSummary> {
    let span = tracing::span!(tracing::Level::TRACE, "convert");
    let _enter = span.enter();

    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)?;

    let mut videos = Vec::new();
    for path in util::find_files(video_dir)? {
        if util::is_valid_video_file(&path)? {
            videos.push(path);
        } else {
            tracing::debug!("{} is not a video file, ignoring", path.display());
        }
    }

    let mut outcomes = Vec::new();
    if cfg!(feature = "rayon") && threading {
        #[cfg(feature = "rayon")]
        {
            outcomes = videos
                .par_iter()
                .map(|video| convert_one(video, out_dir, decoder))
                .collect();
        }
    } else {
        outcomes.extend(videos.iter().map(|video| convert_one(video, out_dir, decoder)));
    }

    let mut summary = ConvertSummary::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Converted(p) => summary.converted.push(p),
            Outcome::Skipped(p) => summary.skipped.push(p),
            Outcome::Failed(p, reason) => summary.failed.push((p, reason)),
        }
    }

    Ok(summary)
}

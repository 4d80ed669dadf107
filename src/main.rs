use std::path::{Path, PathBuf};

use clap::{ArgAction, CommandFactory, ErrorKind, Parser, Subcommand};

use soundtrace::audio::{self, FeatureMode, FfmpegDecoder, PreprocessMode};
use soundtrace::matching::{self, MatchMode};
use soundtrace::{runner, util, MatchRunner};

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(
        arg_required_else_help = true,
        after_help = "Extract the soundtrack of every video file in a directory into a mono WAV file. Videos that were already converted are skipped."
    )]
    Convert {
        #[clap(value_parser = clap::value_parser!(PathBuf), help = "Directory containing the video files.")]
        video_dir: PathBuf,

        #[clap(value_parser = clap::value_parser!(PathBuf), help = "Directory to write the converted WAV files to.")]
        converted_dir: PathBuf,
    },

    #[clap(
        arg_required_else_help = true,
        after_help = "Search every converted soundtrack for every reference audio file. Matches are appended to a per-video report in the results directory, and a summary.json with all matches and failures is written next to them."
    )]
    Match {
        #[clap(value_parser = clap::value_parser!(PathBuf), help = "Directory containing the converted soundtracks.")]
        converted_dir: PathBuf,

        #[clap(value_parser = clap::value_parser!(PathBuf), help = "Directory containing the reference audio files.")]
        audio_dir: PathBuf,

        #[clap(value_parser = clap::value_parser!(PathBuf), help = "Directory to write reports to.")]
        results_dir: PathBuf,

        #[clap(
            long,
            default_value_t = matching::DEFAULT_THRESHOLD,
            value_parser = clap::value_parser!(f64),
            help = "Match threshold. Lower is stricter. For the multi-window matchers this is the highest average window distance a frame can have and still count as matched."
        )]
        threshold: f64,

        #[clap(
            long,
            default_value_t = audio::DEFAULT_SAMPLE_RATE,
            value_parser = clap::value_parser!(u32),
            help = "Sample rate (Hz) audio is resampled to before feature extraction."
        )]
        sample_rate: u32,

        #[clap(
            long,
            default_value = "2",
            value_parser = clap::value_parser!(MatchMode),
            help = "Matching algorithm: 1 = exhaustive, 2 = multi-window, 3 = multi-window with ratio plots, 4 = correlation."
        )]
        matcher_mode: MatchMode,

        #[clap(
            long,
            default_value = "2",
            value_parser = clap::value_parser!(FeatureMode),
            help = "Feature set: 1 = basic (MFCC and constant-Q chroma), 2 = spectral (MFCC, chroma and spectral contrast)."
        )]
        feature_mode: FeatureMode,

        #[clap(
            long,
            value_parser = clap::value_parser!(PreprocessMode),
            help = "Preprocessing: 1 = basic (silence removal), 2 = spectral (spectral subtraction and wavelet smoothing). Defaults to the one matching --feature-mode."
        )]
        preprocess_mode: Option<PreprocessMode>,

        #[clap(
            long,
            default_value_t = runner::DEFAULT_CORE_FRACTION,
            value_parser = clap::value_parser!(f64),
            help = "Fraction of the available cores to match on. At least one core is always used."
        )]
        core_fraction: f64,

        #[clap(
            long,
            value_parser = clap::value_parser!(PathBuf),
            help = "Directory for the ratio plots of matcher mode 3. Defaults to the results directory."
        )]
        plot_dir: Option<PathBuf>,
    },
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Log debug output."
    )]
    verbose: bool,
}

impl Cli {
    fn validate(&self) {
        let mut cmd = Cli::command();
        match self.command {
            Commands::Convert { .. } => (),
            Commands::Match {
                threshold,
                sample_rate,
                core_fraction,
                ..
            } => {
                if !threshold.is_finite() || threshold < 0.0 {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "threshold must be a non-negative number",
                    )
                    .exit();
                }
                if sample_rate == 0 {
                    cmd.error(ErrorKind::InvalidValue, "sample_rate must be positive")
                        .exit();
                }
                if !(core_fraction > 0.0 && core_fraction <= 1.0) {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "core_fraction must be in (0, 1]",
                    )
                    .exit();
                }
            }
        }
    }

    fn find_files(dir: &Path) -> Vec<PathBuf> {
        match util::find_files(dir) {
            Err(e) => {
                let mut cmd = Cli::command();
                cmd.error(ErrorKind::InvalidValue, e.to_string()).exit();
            }
            Ok(v) => v,
        }
    }
}

fn main() -> soundtrace::Result<()> {
    let args = Cli::parse();
    args.validate();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    ffmpeg_next::init()?;

    match args.command {
        Commands::Convert {
            ref video_dir,
            ref converted_dir,
        } => {
            let summary = soundtrace::convert::convert_videos(
                video_dir,
                converted_dir,
                &FfmpegDecoder::default(),
                true,
            )?;
            println!(
                "Converted {} files, skipped {}, failed {}",
                summary.converted.len(),
                summary.skipped.len(),
                summary.failed.len()
            );
        }
        Commands::Match {
            ref converted_dir,
            ref audio_dir,
            ref results_dir,
            threshold,
            sample_rate,
            matcher_mode,
            feature_mode,
            preprocess_mode,
            core_fraction,
            ref plot_dir,
        } => {
            let videos = Cli::find_files(converted_dir);
            let audios = Cli::find_files(audio_dir);
            if videos.is_empty() || audios.is_empty() {
                let mut cmd = Cli::command();
                cmd.error(
                    ErrorKind::InvalidValue,
                    format!(
                        "need at least one converted soundtrack and one audio file, but found {} and {}",
                        videos.len(),
                        audios.len()
                    ),
                )
                .exit();
            }

            let preprocess_mode = preprocess_mode.unwrap_or(match feature_mode {
                FeatureMode::Basic => PreprocessMode::Basic,
                FeatureMode::Spectral => PreprocessMode::Spectral,
            });

            let mut runner = MatchRunner::from_files(videos, audios)
                .with_results_dir(results_dir)
                .with_sample_rate(sample_rate)
                .with_threshold(threshold)
                .with_match_mode(matcher_mode)
                .with_preprocess_mode(preprocess_mode)
                .with_feature_mode(feature_mode)
                .with_core_fraction(core_fraction);
            if let Some(plot_dir) = plot_dir {
                runner = runner.with_plot_dir(plot_dir);
            }

            let report = runner.run()?;

            println!("Results:");
            for record in &report.matches {
                println!("{}", record);
            }
            for failure in &report.failures {
                println!(
                    "Failed: {} & {}: {}",
                    failure.video.display(),
                    failure.audio.display(),
                    failure.reason
                );
            }

            let summary = results_dir.join("summary.json");
            std::fs::write(&summary, serde_json::to_string_pretty(&report)?)?;
            tracing::info!("wrote summary to {}", summary.display());
        }
    }

    Ok(())
}

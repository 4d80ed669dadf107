use std::str::FromStr;

use ndarray::{Array2, Axis};

use super::{dsp, Features, Waveform};
use crate::{Error, Result};

const N_MELS: usize = 128;
const TOP_DB: f32 = 80.0;
const N_CHROMA: usize = 12;

const BASIC_N_MFCC: usize = 20;
const SPECTRAL_N_MFCC: usize = 13;

// Lowest pitch considered by the STFT chroma. Anything below sits in the first few FFT
// bins where pitch classes are meaningless.
const CHROMA_MIN_HZ: f64 = 27.5;

// C1; the constant-Q chroma covers 7 octaves from here, capped at Nyquist.
const CQT_FMIN: f64 = 32.703_195_662_574_83;
const CQT_BINS: usize = 84;

const CONTRAST_BANDS: usize = 6;
const CONTRAST_QUANTILE: f64 = 0.02;

/// Selects which acoustic features make up the channels of a [Features] matrix.
///
/// Matrices from different modes have different channel semantics and must not be
/// compared against each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum FeatureMode {
    /// 20 cepstral coefficients followed by a 12-bin constant-Q chroma.
    Basic,
    /// 13 cepstral coefficients, a 12-bin STFT chroma and 7 spectral-contrast bands.
    Spectral,
}

impl FeatureMode {
    /// Number of feature channels produced by this mode.
    pub fn channels(&self) -> usize {
        match self {
            Self::Basic => BASIC_N_MFCC + N_CHROMA,
            Self::Spectral => SPECTRAL_N_MFCC + N_CHROMA + CONTRAST_BANDS + 1,
        }
    }
}

impl FromStr for FeatureMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "basic" => Ok(Self::Basic),
            "2" | "spectral" => Ok(Self::Spectral),
            _ => Err(Error::InvalidMode {
                role: "feature",
                value: s.to_owned(),
            }),
        }
    }
}

/// Converts a preprocessed [Waveform] into a [Features] matrix at `sample_rate / HOP_SIZE`
/// frames per second.
#[derive(Clone, Copy, Debug)]
pub struct FeatureExtractor {
    mode: FeatureMode,
}

impl FeatureExtractor {
    pub fn new(mode: FeatureMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FeatureMode {
        self.mode
    }

    pub fn run(&self, waveform: &Waveform) -> Result<Features> {
        let span = tracing::span!(tracing::Level::TRACE, "extract_features");
        let _enter = span.enter();

        let sample_rate = waveform.sample_rate;
        let n_fft = super::FFT_SIZE;
        let spectrum = dsp::stft(&waveform.samples, n_fft, super::HOP_SIZE);
        let frame_rate = sample_rate as f64 / super::HOP_SIZE as f64;

        let matrix = match self.mode {
            FeatureMode::Basic => {
                let power = dsp::power(&spectrum);
                let magnitude = dsp::magnitude(&spectrum);
                let mfcc = to_block(mfcc(&power, sample_rate, n_fft, BASIC_N_MFCC), BASIC_N_MFCC)?;
                let chroma = to_block(chroma_cqt(&magnitude, sample_rate, n_fft), N_CHROMA)?;
                ndarray::concatenate(Axis(0), &[mfcc.view(), chroma.view()])?
            }
            FeatureMode::Spectral => {
                let power = dsp::power(&spectrum);
                let magnitude = dsp::magnitude(&spectrum);
                let mfcc = to_block(
                    mfcc(&power, sample_rate, n_fft, SPECTRAL_N_MFCC),
                    SPECTRAL_N_MFCC,
                )?;
                let chroma = to_block(chroma_stft(&power, sample_rate, n_fft), N_CHROMA)?;
                let fmin = sample_rate as f64 / 128.0;
                let contrast = to_block(
                    spectral_contrast(&magnitude, sample_rate, n_fft, fmin),
                    CONTRAST_BANDS + 1,
                )?;
                ndarray::concatenate(Axis(0), &[mfcc.view(), chroma.view(), contrast.view()])?
            }
        };

        tracing::debug!(
            channels = matrix.nrows(),
            frames = matrix.ncols(),
            frame_rate,
            "extracted features"
        );

        Ok(Features::new(matrix, frame_rate))
    }
}

// Turns `[frame][channel]` rows into a `(channels, frames)` block.
fn to_block(rows: Vec<Vec<f32>>, width: usize) -> Result<Array2<f32>> {
    let frames = rows.len();
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((frames, width), flat)?.reversed_axes())
}

fn mfcc(power: &[Vec<f32>], sample_rate: u32, n_fft: usize, n_mfcc: usize) -> Vec<Vec<f32>> {
    let mel = dsp::mel_filterbank(sample_rate, n_fft, N_MELS);
    let dct = dsp::dct_basis(n_mfcc, N_MELS);

    let mut mel_spec: Vec<Vec<f32>> = power.iter().map(|p| dsp::project(&mel, p)).collect();
    dsp::power_to_db(&mut mel_spec, TOP_DB);
    mel_spec.iter().map(|m| dsp::project(&dct, m)).collect()
}

// Scales every frame so that its strongest pitch class is 1.
fn normalize_frames(frames: &mut [Vec<f32>]) {
    for frame in frames {
        let max = frame.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
        if max > 0.0 {
            frame.iter_mut().for_each(|v| *v /= max);
        }
    }
}

// Position of `hz` in semitones above C, folded to [0, 12).
fn pitch_class(hz: f64) -> f64 {
    (12.0 * (hz / 440.0).log2() + 9.0).rem_euclid(12.0)
}

fn chroma_stft(power: &[Vec<f32>], sample_rate: u32, n_fft: usize) -> Vec<Vec<f32>> {
    let freqs = dsp::fft_frequencies(sample_rate, n_fft);
    let mut weights = vec![vec![0.0_f32; freqs.len()]; N_CHROMA];
    for (k, &f) in freqs.iter().enumerate() {
        if f < CHROMA_MIN_HZ {
            continue;
        }
        // Split each bin between the two nearest pitch classes.
        let pos = pitch_class(f);
        let frac = pos - pos.floor();
        let lo = pos.floor() as usize % N_CHROMA;
        weights[lo][k] += (1.0 - frac) as f32;
        weights[(lo + 1) % N_CHROMA][k] += frac as f32;
    }

    let mut chroma: Vec<Vec<f32>> = power.iter().map(|p| dsp::project(&weights, p)).collect();
    normalize_frames(&mut chroma);
    chroma
}

fn chroma_cqt(magnitude: &[Vec<f32>], sample_rate: u32, n_fft: usize) -> Vec<Vec<f32>> {
    let df = sample_rate as f64 / n_fft as f64;
    let nyquist = sample_rate as f64 / 2.0;
    let quarter_tone = 2.0_f64.powf(1.0 / 24.0);

    // Each semitone band is a (pitch class, [(bin, weight)]) pair. Band width grows with
    // the center frequency, which is what makes the transform constant-Q.
    let mut bands: Vec<(usize, Vec<(usize, f32)>)> = Vec::new();
    for j in 0..CQT_BINS {
        let fc = CQT_FMIN * 2.0_f64.powf(j as f64 / 12.0);
        let (lo, hi) = (fc / quarter_tone, fc * quarter_tone);
        if hi > nyquist {
            break;
        }
        let (a, b) = ((lo / df).ceil() as usize, (hi / df).floor() as usize);
        let taps = if a <= b {
            let w = 1.0 / (b - a + 1) as f32;
            (a..=b).map(|k| (k, w)).collect()
        } else {
            // Band narrower than one bin: interpolate at the center frequency.
            let pos = fc / df;
            let frac = (pos - pos.floor()) as f32;
            let k = pos.floor() as usize;
            vec![(k, 1.0 - frac), (k + 1, frac)]
        };
        bands.push((j % N_CHROMA, taps));
    }

    let mut chroma: Vec<Vec<f32>> = magnitude
        .iter()
        .map(|frame| {
            let mut c = vec![0.0_f32; N_CHROMA];
            for (class, taps) in &bands {
                c[*class] += taps
                    .iter()
                    .map(|&(k, w)| frame.get(k).copied().unwrap_or(0.0) * w)
                    .sum::<f32>();
            }
            c
        })
        .collect();
    normalize_frames(&mut chroma);
    chroma
}

fn spectral_contrast(
    magnitude: &[Vec<f32>],
    sample_rate: u32,
    n_fft: usize,
    fmin: f64,
) -> Vec<Vec<f32>> {
    let freqs = dsp::fft_frequencies(sample_rate, n_fft);
    let last = freqs.len() - 1;

    let mut edges = vec![0.0];
    edges.extend((0..=CONTRAST_BANDS).map(|k| fmin * 2.0_f64.powi(k as i32)));

    // For every band: the analyzed bin range and the number of bins used for the
    // peak/valley quantiles.
    let bands: Vec<Option<(usize, usize, usize)>> = (0..=CONTRAST_BANDS)
        .map(|k| {
            let (low, high) = (edges[k], edges[k + 1]);
            let mut a = freqs.iter().position(|&f| f >= low)?;
            let mut b = freqs.iter().rposition(|&f| f <= high)?;
            if a > b {
                return None;
            }
            if k > 0 && a > 0 {
                a -= 1;
            }
            if k == CONTRAST_BANDS {
                b = last;
            }
            let count = b - a + 1;
            // Every band but the top one leaves out its upper edge bin.
            let end = if k < CONTRAST_BANDS { b } else { b + 1 };
            let q = ((CONTRAST_QUANTILE * count as f64).round() as usize).max(1);
            Some((a, end.max(a + 1), q))
        })
        .collect();

    magnitude
        .iter()
        .map(|frame| {
            bands
                .iter()
                .map(|band| {
                    let Some((a, end, q)) = *band else {
                        return 0.0;
                    };
                    let mut sub: Vec<f32> = frame[a..end].to_vec();
                    sub.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
                    let q = q.min(sub.len());
                    let valley = sub[..q].iter().sum::<f32>() / q as f32;
                    let peak = sub[sub.len() - q..].iter().sum::<f32>() / q as f32;
                    10.0 * peak.max(1e-10).log10() - 10.0 * valley.max(1e-10).log10()
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, secs: usize) -> Waveform {
        let samples = (0..sample_rate as usize * secs)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        Waveform::new(samples, sample_rate)
    }

    fn argmax(values: impl Iterator<Item = f32>) -> usize {
        values
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, v)| if v > bv { (i, v) } else { (bi, bv) })
            .0
    }

    #[test]
    fn test_frame_rate_and_channels() {
        for mode in [FeatureMode::Basic, FeatureMode::Spectral] {
            for sample_rate in [2048, 4000] {
                let features = FeatureExtractor::new(mode)
                    .run(&tone(220.0, sample_rate, 3))
                    .unwrap();
                assert_eq!(features.frame_rate, sample_rate as f64 / 512.0);
                assert_eq!(features.channels(), mode.channels());
                assert_eq!(features.frames(), 1 + 3 * sample_rate as usize / 512);
            }
        }
        assert_eq!(FeatureMode::Basic.channels(), 32);
        assert_eq!(FeatureMode::Spectral.channels(), 32);
    }

    #[test]
    fn test_chroma_finds_pitch_class() {
        // A4 => pitch class 9 (C = 0).
        let waveform = tone(440.0, 2048, 4);

        let spectral = FeatureExtractor::new(FeatureMode::Spectral).run(&waveform).unwrap();
        let mid = spectral.frames() / 2;
        let chroma = (0..N_CHROMA).map(|c| spectral.matrix[[SPECTRAL_N_MFCC + c, mid]]);
        assert_eq!(argmax(chroma), 9);

        let basic = FeatureExtractor::new(FeatureMode::Basic).run(&waveform).unwrap();
        let chroma = (0..N_CHROMA).map(|c| basic.matrix[[BASIC_N_MFCC + c, mid]]);
        assert_eq!(argmax(chroma), 9);
    }

    #[test]
    fn test_silence_is_finite() {
        let waveform = Waveform::new(vec![0.0; 4096], 2048);
        let features = FeatureExtractor::new(FeatureMode::Spectral).run(&waveform).unwrap();
        assert!(features.matrix.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("2".parse::<FeatureMode>().unwrap(), FeatureMode::Spectral);
        assert!("cqt".parse::<FeatureMode>().is_err());
    }
}

//! Signal processing building blocks shared by the preprocessors and feature extractors.
//!
//! Spectrograms are laid out as `[frame][bin]`. All short-time transforms use a periodic
//! Hann window and centered frames (the signal is zero-padded by `n_fft / 2` on both
//! sides), so a signal of `L` samples always yields `1 + L / hop` frames.

use std::f64::consts::PI;

use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;

/// Periodic Hann window.
pub(crate) fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / size as f64).cos()) as f32)
        .collect()
}

/// Number of centered frames for a signal of `len` samples.
pub(crate) fn frame_count(len: usize, hop: usize) -> usize {
    1 + len / hop.max(1)
}

// Loads centered frame `f` into `buf` (windowed, zero-padded at the edges).
fn load_frame(samples: &[f32], f: usize, hop: usize, window: &[f32], buf: &mut [Complex32]) {
    let pad = window.len() / 2;
    let start = f * hop;
    for (i, cell) in buf.iter_mut().enumerate() {
        // Position in the unpadded signal.
        let sample = (start + i)
            .checked_sub(pad)
            .and_then(|idx| samples.get(idx))
            .copied()
            .unwrap_or(0.0);
        *cell = Complex32::new(sample * window[i], 0.0);
    }
}

/// Short-time Fourier transform. Returns the non-negative frequency bins
/// (`n_fft / 2 + 1`) for every frame.
pub(crate) fn stft(samples: &[f32], n_fft: usize, hop: usize) -> Vec<Vec<Complex32>> {
    let bins = n_fft / 2 + 1;
    let window = hann_window(n_fft);
    let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);

    let mut buf = vec![Complex32::default(); n_fft];
    (0..frame_count(samples.len(), hop))
        .map(|f| {
            load_frame(samples, f, hop, &window, &mut buf);
            fft.process(&mut buf);
            buf[..bins].to_vec()
        })
        .collect()
}

/// Mean STFT magnitude of every non-negative bin, computed one frame at a time.
pub(crate) fn mean_magnitude(samples: &[f32], n_fft: usize, hop: usize) -> Vec<f32> {
    let bins = n_fft / 2 + 1;
    let window = hann_window(n_fft);
    let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);
    let n_frames = frame_count(samples.len(), hop);

    let mut buf = vec![Complex32::default(); n_fft];
    let mut sum = vec![0.0_f64; bins];
    for f in 0..n_frames {
        load_frame(samples, f, hop, &window, &mut buf);
        fft.process(&mut buf);
        for (acc, c) in sum.iter_mut().zip(buf.iter()) {
            *acc += c.norm() as f64;
        }
    }
    sum.into_iter().map(|s| (s / n_frames as f64) as f32).collect()
}

/// Runs `filter` over the full spectrum of every STFT frame and resynthesizes the signal
/// by windowed overlap-add. The output has the same length as the input.
///
/// The filter must keep the spectrum Hermitian (bin `k` and bin `n_fft - k` conjugate)
/// for the output to stay real.
pub(crate) fn stft_filter(
    samples: &[f32],
    n_fft: usize,
    hop: usize,
    mut filter: impl FnMut(&mut [Complex32]),
) -> Vec<f32> {
    let pad = n_fft / 2;
    let window = hann_window(n_fft);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let ifft = planner.plan_fft_inverse(n_fft);
    let n_frames = frame_count(samples.len(), hop);

    let padded_len = n_fft + hop * (n_frames - 1);
    let mut out = vec![0.0_f32; padded_len];
    let mut norm = vec![0.0_f32; padded_len];
    let mut buf = vec![Complex32::default(); n_fft];

    for f in 0..n_frames {
        load_frame(samples, f, hop, &window, &mut buf);
        fft.process(&mut buf);
        filter(&mut buf);
        ifft.process(&mut buf);

        let start = f * hop;
        for (i, c) in buf.iter().enumerate() {
            let w = window[i];
            out[start + i] += c.re / n_fft as f32 * w;
            norm[start + i] += w * w;
        }
    }

    for (o, n) in out.iter_mut().zip(norm.iter()) {
        if *n > f32::EPSILON {
            *o /= *n;
        }
    }

    let mut out: Vec<f32> = out.into_iter().skip(pad).take(samples.len()).collect();
    out.resize(samples.len(), 0.0);
    out
}

pub(crate) fn magnitude(frames: &[Vec<Complex32>]) -> Vec<Vec<f32>> {
    frames
        .iter()
        .map(|f| f.iter().map(|c| c.norm()).collect())
        .collect()
}

pub(crate) fn power(frames: &[Vec<Complex32>]) -> Vec<Vec<f32>> {
    frames
        .iter()
        .map(|f| f.iter().map(|c| c.norm_sqr()).collect())
        .collect()
}

/// Center frequency (Hz) of every non-negative FFT bin.
pub(crate) fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f64> {
    (0..=n_fft / 2)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect()
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
fn hz_to_mel(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f64.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4_f64.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular mel filterbank with Slaney area normalization, shaped `[n_mels][bins]`.
pub(crate) fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);
    let mel_max = hz_to_mel(sample_rate as f64 / 2.0);
    let mel_f: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|i| {
            let (lo, center, hi) = (mel_f[i], mel_f[i + 1], mel_f[i + 2]);
            let enorm = 2.0 / (hi - lo);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II basis, shaped `[n_out][n_in]`.
pub(crate) fn dct_basis(n_out: usize, n_in: usize) -> Vec<Vec<f32>> {
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 {
                (1.0 / n_in as f64).sqrt()
            } else {
                (2.0 / n_in as f64).sqrt()
            };
            (0..n_in)
                .map(|n| (scale * (PI * k as f64 * (2 * n + 1) as f64 / (2 * n_in) as f64).cos()) as f32)
                .collect()
        })
        .collect()
}

/// Converts a power matrix to decibels in place, clamping the dynamic range to `top_db`
/// below the loudest cell.
pub(crate) fn power_to_db(values: &mut [Vec<f32>], top_db: f32) {
    let mut max = f32::NEG_INFINITY;
    for v in values.iter_mut().flat_map(|row| row.iter_mut()) {
        *v = 10.0 * v.max(1e-10).log10();
        max = max.max(*v);
    }
    let floor = max - top_db;
    for v in values.iter_mut().flat_map(|row| row.iter_mut()) {
        *v = v.max(floor);
    }
}

/// Matrix-vector product of a `[rows][n]` matrix and an `n`-vector.
pub(crate) fn project(matrix: &[Vec<f32>], v: &[f32]) -> Vec<f32> {
    matrix
        .iter()
        .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
        .collect()
}

// Zero crossings of the interpolation kernel on each side of the output sample.
const RESAMPLE_ZERO_CROSSINGS: f64 = 8.0;

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Band-limited resampling with a Hann-windowed sinc kernel. When downsampling, the
/// kernel cutoff is lowered to the target Nyquist frequency to avoid aliasing.
pub(crate) fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || to == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to as f64 / from as f64;
    let cutoff = ratio.min(1.0);
    let half_width = RESAMPLE_ZERO_CROSSINGS / cutoff;
    let out_len = ((samples.len() as u64 * to as u64 + from as u64 - 1) / from as u64) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let t = i as f64 / ratio;
            let lo = (t - half_width).ceil().max(0.0) as usize;
            let hi = ((t + half_width).floor().max(0.0) as usize).min(last);
            let mut acc = 0.0_f64;
            for (k, &s) in samples.iter().enumerate().take(hi + 1).skip(lo) {
                let x = t - k as f64;
                let w = 0.5 + 0.5 * (PI * x / half_width).cos();
                acc += s as f64 * cutoff * sinc(cutoff * x) * w;
            }
            acc as f32
        })
        .collect()
}

/// First-order pre-emphasis: `y[t] = x[t] - alpha * x[t - 1]`.
pub(crate) fn pre_emphasis(samples: &[f32], alpha: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(samples.len());
    if let Some(&first) = samples.first() {
        out.push(first);
    }
    out.extend(samples.windows(2).map(|w| w[1] - alpha * w[0]));
    out
}

/// Scales the samples so that the peak absolute amplitude is 1. Silent input is
/// returned unchanged.
pub(crate) fn peak_normalize(samples: &[f32]) -> Vec<f32> {
    let peak = samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    if peak <= 0.0 || !peak.is_finite() {
        return samples.to_vec();
    }
    samples.iter().map(|s| s / peak).collect()
}

/// Splits the signal into voiced intervals and concatenates them. A frame is voiced if
/// its RMS is within `top_db` of the loudest frame.
pub(crate) fn remove_silence(samples: &[f32], top_db: f32, frame_length: usize, hop: usize) -> Vec<f32> {
    let pad = frame_length / 2;
    let n_frames = frame_count(samples.len(), hop);
    let rms: Vec<f32> = (0..n_frames)
        .map(|f| {
            let start = f * hop;
            let sum: f64 = (start..start + frame_length)
                .filter_map(|i| i.checked_sub(pad).and_then(|idx| samples.get(idx)))
                .map(|&s| (s as f64) * (s as f64))
                .sum();
            (sum / frame_length as f64).sqrt() as f32
        })
        .collect();

    let max_rms = rms.iter().copied().fold(0.0_f32, f32::max);
    if max_rms <= 0.0 {
        return samples.to_vec();
    }

    let voiced: Vec<bool> = rms
        .iter()
        .map(|&r| 20.0 * (r.max(1e-10) / max_rms).log10() > -top_db)
        .collect();

    let mut out = Vec::with_capacity(samples.len());
    let mut f = 0;
    while f < voiced.len() {
        if !voiced[f] {
            f += 1;
            continue;
        }
        let start = f;
        while f < voiced.len() && voiced[f] {
            f += 1;
        }
        let (a, b) = ((start * hop).min(samples.len()), (f * hop).min(samples.len()));
        out.extend_from_slice(&samples[a..b]);
    }
    out
}

/// Daubechies-4 reconstruction low-pass filter.
const DB4: [f64; 8] = [
    0.23037781330885523,
    0.7148465705525415,
    0.6308807679295904,
    -0.02798376941698385,
    -0.18703481171888114,
    0.030841381835986965,
    0.032883011666982945,
    -0.010597401784997278,
];

fn db4_highpass() -> [f64; 8] {
    let mut g = [0.0; 8];
    for (j, g) in g.iter_mut().enumerate() {
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        *g = sign * DB4[DB4.len() - 1 - j];
    }
    g
}

/// Single-level periodized DWT. Odd-length input is extended by repeating the last sample.
fn dwt_level(x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut x = x.to_vec();
    if x.len() % 2 == 1 {
        x.push(*x.last().unwrap_or(&0.0));
    }
    let n = x.len();
    let g = db4_highpass();
    let half = n / 2;
    let mut approx = vec![0.0; half];
    let mut detail = vec![0.0; half];
    for k in 0..half {
        for j in 0..DB4.len() {
            let s = x[(2 * k + j) % n];
            approx[k] += DB4[j] * s;
            detail[k] += g[j] * s;
        }
    }
    (approx, detail)
}

fn idwt_level(approx: &[f64], detail: &[f64], length: usize) -> Vec<f64> {
    let n = approx.len() * 2;
    let g = db4_highpass();
    let mut x = vec![0.0; n];
    for k in 0..approx.len() {
        for j in 0..DB4.len() {
            x[(2 * k + j) % n] += DB4[j] * approx[k] + g[j] * detail[k];
        }
    }
    x.truncate(length);
    x
}

/// Multi-level db4 decomposition followed by reconstruction, with periodic boundary
/// handling. Decomposes down to the deepest level where the approximation is still at
/// least one filter length long.
pub(crate) fn wavelet_smooth(samples: &[f32]) -> Vec<f32> {
    let mut approx: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let mut levels = Vec::new();
    while approx.len() >= 2 * (DB4.len() - 1) {
        let length = approx.len();
        let (a, d) = dwt_level(&approx);
        levels.push((d, length));
        approx = a;
    }
    for (detail, length) in levels.into_iter().rev() {
        approx = idwt_level(&approx, &detail, length);
    }
    approx.into_iter().map(|s| s as f32).collect()
}

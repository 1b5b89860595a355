//! Frame-aligned spectral features for viseme selection.
//!
//! Both features share one STFT: Hann window, `N_FFT` samples, centered on
//! `frame * hop` with zero padding at the edges, power spectrum `|X|²`.
//! Mel bands use the Slaney scale with area-normalized triangles, so summed
//! band energy is comparable against a fixed silence threshold.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

/// Rate audio is resampled to before feature extraction.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;
/// FFT window size in samples.
pub const N_FFT: usize = 2048;
/// Number of mel bands in the energy spectrogram.
pub const NUM_MEL_BANDS: usize = 10;
/// Number of pitch classes in the chroma profile.
pub const NUM_CHROMA: usize = 12;

/// Per-frame features, one row per output frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectralFeatures {
    /// Mel band energies: `[frame][band]`.
    pub mel: Vec<[f32; NUM_MEL_BANDS]>,
    /// Pitch class profile normalized to a max of 1: `[frame][class]`.
    pub chroma: Vec<[f32; NUM_CHROMA]>,
}

impl SpectralFeatures {
    /// Number of frames.
    pub fn len(&self) -> usize {
        self.mel.len()
    }

    /// Whether no frames were computed.
    pub fn is_empty(&self) -> bool {
        self.mel.is_empty()
    }
}

/// Hop length in samples for the given rates (`floor(sample_rate / frame_rate)`, at least 1).
pub fn hop_length(sample_rate: u32, frame_rate: f32) -> usize {
    ((sample_rate as f32 / frame_rate).floor() as usize).max(1)
}

/// Compute mel energies and chroma for `num_frames` frames.
pub fn compute(samples: &[f32], sample_rate: u32, hop: usize, num_frames: usize) -> SpectralFeatures {
    if num_frames == 0 {
        return SpectralFeatures::default();
    }

    let mel_filterbank = build_mel_filterbank(NUM_MEL_BANDS, N_FFT, sample_rate);
    let chroma_bins = chroma_bin_classes(N_FFT, sample_rate);
    let window = hann_window(N_FFT);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(N_FFT);

    let mut features = SpectralFeatures {
        mel: Vec::with_capacity(num_frames),
        chroma: Vec::with_capacity(num_frames),
    };
    let mut buffer = vec![Complex::new(0.0f32, 0.0); N_FFT];
    let half = (N_FFT / 2) as isize;
    let power_len = N_FFT / 2 + 1;

    for frame in 0..num_frames {
        let center = (frame * hop) as isize;
        for (n, slot) in buffer.iter_mut().enumerate() {
            let idx = center - half + n as isize;
            let s = if idx >= 0 && (idx as usize) < samples.len() {
                samples[idx as usize]
            } else {
                0.0
            };
            *slot = Complex::new(s * window[n], 0.0);
        }

        fft.process(&mut buffer);

        let power: Vec<f32> = buffer[..power_len]
            .iter()
            .map(|c| c.re * c.re + c.im * c.im)
            .collect();

        let mut mel = [0.0f32; NUM_MEL_BANDS];
        for (band, filter) in mel.iter_mut().zip(mel_filterbank.iter()) {
            *band = filter.iter().zip(power.iter()).map(|(&f, &p)| f * p).sum();
        }

        let mut chroma = [0.0f32; NUM_CHROMA];
        for (bin, class) in chroma_bins.iter().enumerate() {
            if let Some(class) = class {
                chroma[*class] += power[bin];
            }
        }
        let peak = chroma.iter().copied().fold(0.0f32, f32::max);
        if peak > 0.0 {
            for c in &mut chroma {
                *c /= peak;
            }
        }

        features.mel.push(mel);
        features.chroma.push(chroma);
    }

    features
}

/// Index of the largest value; ties go to the lowest index, empty input gives 0.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

fn hann_window(size: usize) -> Vec<f32> {
    // Periodic Hann, as used for spectral analysis.
    (0..size)
        .map(|n| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / size as f32).cos()))
        .collect()
}

/// Pitch class of every FFT bin (`None` for DC).
fn chroma_bin_classes(fft_size: usize, sample_rate: u32) -> Vec<Option<usize>> {
    let power_len = fft_size / 2 + 1;
    (0..power_len)
        .map(|bin| {
            if bin == 0 {
                return None;
            }
            let freq = bin as f32 * sample_rate as f32 / fft_size as f32;
            let semitones_from_a4 = (12.0 * (freq / 440.0).log2()).round() as i64;
            // A is pitch class 9 when C is 0.
            Some((semitones_from_a4 + 9).rem_euclid(NUM_CHROMA as i64) as usize)
        })
        .collect()
}

/// Mel filterbank on the Slaney scale, each triangle area-normalized by
/// `2 / bandwidth_hz`.
fn build_mel_filterbank(num_filters: usize, fft_size: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let power_len = fft_size / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;
    let fft_freqs: Vec<f64> = (0..power_len)
        .map(|bin| bin as f64 * sample_rate as f64 / fft_size as f64)
        .collect();

    let num_points = num_filters + 2;
    let max_mel = hz_to_mel(nyquist);
    let mel_freqs: Vec<f64> = (0..num_points)
        .map(|i| mel_to_hz(max_mel * i as f64 / (num_points - 1) as f64))
        .collect();

    (0..num_filters)
        .map(|m| {
            let (left, center, right) = (mel_freqs[m], mel_freqs[m + 1], mel_freqs[m + 2]);
            let norm = 2.0 / (right - left);
            fft_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - left) / (center - left);
                    let falling = (right - f) / (right - center);
                    (rising.min(falling).max(0.0) * norm) as f32
                })
                .collect()
        })
        .collect()
}

const MEL_LINEAR_STEP: f64 = 200.0 / 3.0;
const MEL_LOG_START_HZ: f64 = 1000.0;
const MEL_LOG_START: f64 = MEL_LOG_START_HZ / MEL_LINEAR_STEP;

fn mel_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

/// Slaney mel: linear below 1 kHz, logarithmic above.
fn hz_to_mel(hz: f64) -> f64 {
    if hz < MEL_LOG_START_HZ {
        hz / MEL_LINEAR_STEP
    } else {
        MEL_LOG_START + (hz / MEL_LOG_START_HZ).ln() / mel_log_step()
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel < MEL_LOG_START {
        mel * MEL_LINEAR_STEP
    } else {
        MEL_LOG_START_HZ * (mel_log_step() * (mel - MEL_LOG_START)).exp()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn sine(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn hop_length_floors() {
        assert_eq!(hop_length(16_000, 24.0), 666);
        assert_eq!(hop_length(22_050, 24.0), 918);
        assert_eq!(hop_length(10, 24.0), 1);
    }

    #[test]
    fn argmax_prefers_first_of_ties() {
        assert_eq!(argmax(&[0.0, 3.0, 3.0, 1.0]), 1);
        assert_eq!(argmax(&[0.0, 0.0]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn mel_filterbank_shape_and_sign() {
        let fb = build_mel_filterbank(NUM_MEL_BANDS, N_FFT, 16_000);
        assert_eq!(fb.len(), NUM_MEL_BANDS);
        for filter in &fb {
            assert_eq!(filter.len(), N_FFT / 2 + 1);
            assert!(filter.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn slaney_mel_scale_round_trips() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
        assert!((hz_to_mel(200.0) - 3.0).abs() < 1e-9);
        for hz in [0.0, 440.0, 1000.0, 4000.0, 11_025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn mel_filters_are_area_normalized() {
        let fb = build_mel_filterbank(NUM_MEL_BANDS, N_FFT, 22_050);
        // Overlapping bands of equal width sum to 2 / width across the linear region.
        let bin_440 = (440.0 * N_FFT as f32 / 22_050.0).round() as usize;
        let total: f32 = fb.iter().map(|filter| filter[bin_440]).sum();
        let width = (mel_to_hz(2.0 * hz_to_mel(11_025.0) / 11.0)) as f32;
        assert!((total - 2.0 / width).abs() < 1e-5, "total weight {total}");
    }

    #[test]
    fn a440_lands_in_pitch_class_a() {
        let samples = sine(440.0, 16_000, 1.0);
        let features = compute(&samples, 16_000, 666, 10);
        assert_eq!(features.len(), 10);
        let chroma = features.chroma[5];
        assert_eq!(argmax(&chroma), 9);
        assert!((chroma[9] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn low_tone_peaks_in_low_mel_band() {
        let samples = sine(200.0, 16_000, 1.0);
        let features = compute(&samples, 16_000, 666, 10);
        assert_eq!(argmax(&features.mel[5]), 0);
    }

    #[test]
    fn quiet_tone_has_small_energy() {
        // -60 dBFS at 440 Hz.
        let samples: Vec<f32> = sine(440.0, 22_050, 1.0).iter().map(|s| s * 0.002).collect();
        let features = compute(&samples, 22_050, 918, 24);
        let energy: f32 = features.mel[12].iter().sum();
        assert!(energy > 0.0 && energy < 0.01, "energy {energy}");
    }

    #[test]
    fn silence_has_zero_features() {
        let samples = vec![0.0; 16_000];
        let features = compute(&samples, 16_000, 666, 5);
        for (mel, chroma) in features.mel.iter().zip(features.chroma.iter()) {
            assert_eq!(mel.iter().sum::<f32>(), 0.0);
            assert_eq!(chroma.iter().sum::<f32>(), 0.0);
        }
    }

    #[test]
    fn zero_frames_is_empty() {
        let features = compute(&[0.5; 100], 16_000, 666, 0);
        assert!(features.is_empty());
    }
}

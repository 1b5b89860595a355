//! Audio file loading for viseme analysis.

mod decode;

pub use decode::decode_file;

/// Mono PCM audio decoded from a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in `[-1, 1]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Length in seconds (0 for an unknown sample rate).
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Whole output frames covered at `frame_rate`.
    pub fn frame_count(&self, frame_rate: f32) -> i64 {
        (self.duration_secs() * f64::from(frame_rate)).floor() as i64
    }
}

/// Linear-interpolation resample of mono samples.
///
/// The output holds `ceil(len * to / from)` samples; edges clamp to the
/// first and last input sample.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let (from, to) = (u64::from(from_rate), u64::from(to_rate));
    let out_len = (samples.len() as u64 * to).div_ceil(from) as usize;
    let step = f64::from(from_rate) / f64::from(to_rate);
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let src = i as f64 * step;
            let idx0 = (src.floor() as usize).min(last);
            let idx1 = (idx0 + 1).min(last);
            let frac = (src - src.floor()) as f32;
            samples[idx0] * (1.0 - frac) + samples[idx1] * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn duration_and_frame_count() {
        let audio = DecodedAudio {
            samples: vec![0.0; 48_000],
            sample_rate: 16_000,
        };
        assert!((audio.duration_secs() - 3.0).abs() < 1e-9);
        assert_eq!(audio.frame_count(24.0), 72);
        assert_eq!(audio.frame_count(25.0), 75);
    }

    #[test]
    fn resample_keeps_duration() {
        let input = vec![0.25; 16_000];
        let output = resample_linear(&input, 16_000, 22_050);
        assert_eq!(output.len(), 22_050);
        assert!(output.iter().all(|&s| (s - 0.25).abs() < 1e-6));

        assert_eq!(resample_linear(&[0.0; 2_400], 8_000, 22_050).len(), 6_615);
        assert_eq!(resample_linear(&input, 22_050, 22_050).len(), 16_000);
    }

    #[test]
    fn resample_interpolates_between_samples() {
        let output = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(output, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn zero_sample_rate_has_no_duration() {
        let audio = DecodedAudio {
            samples: vec![0.0; 10],
            sample_rate: 0,
        };
        assert_eq!(audio.duration_secs(), 0.0);
        assert_eq!(audio.frame_count(24.0), 0);
    }
}

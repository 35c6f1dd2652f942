//! F0 tracking with the YIN algorithm (de Cheveigné & Kawahara 2002).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct F0EstimatorYin {
    /// Hop between analysis frames (s)
    pub time_step_s: f64,
    /// Absolute threshold on the cumulative mean normalized difference
    pub threshold: f64,
    pub min_f0: f64,
    pub max_f0: f64,
}

impl Default for F0EstimatorYin {
    fn default() -> Self {
        Self {
            time_step_s: 0.01,
            threshold: 0.1,
            min_f0: 50.0,
            max_f0: 600.0,
        }
    }
}

impl F0EstimatorYin {
    /// F0 in Hz for every frame of `samples`; 0 marks unvoiced frames.
    pub fn estimate(&self, samples: &[f64], sampling_rate: usize) -> Vec<f64> {
        let sr = sampling_rate as f64;
        let max_lag = (sr / self.min_f0).ceil() as usize;
        let min_lag = ((sr / self.max_f0).floor() as usize).max(2);
        let window = max_lag;
        let hop = ((self.time_step_s * sr).round() as usize).max(1);
        if samples.len() < window + max_lag + 1 {
            return Vec::new();
        }

        let num_frames = (samples.len() - window - max_lag - 1) / hop + 1;
        let mut diff = vec![0.0; max_lag + 1];
        (0..num_frames)
            .map(|frame| {
                let start = frame * hop;
                self.frame_f0(&samples[start..start + window + max_lag + 1], window, min_lag, &mut diff, sr)
            })
            .collect()
    }

    /// F0 of the single frame centered at `center`, or 0 if unvoiced or out of range.
    pub fn estimate_at(&self, samples: &[f64], sampling_rate: usize, center: usize) -> f64 {
        let sr = sampling_rate as f64;
        let max_lag = (sr / self.min_f0).ceil() as usize;
        let min_lag = ((sr / self.max_f0).floor() as usize).max(2);
        let window = max_lag;
        let span = window + max_lag + 1;
        let Some(start) = center.checked_sub(span / 2) else {
            return 0.0;
        };
        if start + span > samples.len() {
            return 0.0;
        }
        let mut diff = vec![0.0; max_lag + 1];
        self.frame_f0(&samples[start..start + span], window, min_lag, &mut diff, sr)
    }

    fn frame_f0(&self, x: &[f64], window: usize, min_lag: usize, diff: &mut [f64], sr: f64) -> f64 {
        let max_lag = diff.len() - 1;

        // Difference function
        diff[0] = 0.0;
        for tau in 1..=max_lag {
            diff[tau] = (0..window)
                .map(|j| {
                    let d = x[j] - x[j + tau];
                    d * d
                })
                .sum();
        }

        // Cumulative mean normalized difference
        let mut running = 0.0;
        diff[0] = 1.0;
        for tau in 1..=max_lag {
            running += diff[tau];
            diff[tau] = if running > 0.0 {
                diff[tau] * tau as f64 / running
            } else {
                1.0
            };
        }

        // Absolute threshold, then walk down to the local minimum
        let mut tau = min_lag;
        let mut found = None;
        while tau < max_lag {
            if diff[tau] < self.threshold {
                while tau + 1 < max_lag && diff[tau + 1] < diff[tau] {
                    tau += 1;
                }
                found = Some(tau);
                break;
            }
            tau += 1;
        }
        let Some(tau) = found else {
            return 0.0;
        };

        // Parabolic interpolation
        let (a, b, c) = (diff[tau - 1], diff[tau], diff[tau + 1]);
        let denom = a - 2.0 * b + c;
        let shift = if denom.abs() > 1.0e-12 {
            (0.5 * (a - c) / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        sr / (tau as f64 + shift)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::F0EstimatorYin;

    fn tone(f0: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|n| {
                let t = n as f64 / 44100.0;
                (std::f64::consts::TAU * f0 * t).sin() + 0.5 * (std::f64::consts::TAU * 2.0 * f0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn finds_f0_of_harmonic_tone() {
        let yin = F0EstimatorYin::default();
        let samples = tone(123.0, 44100 / 2);
        let track = yin.estimate(&samples, 44100);
        assert!(!track.is_empty());
        for f in track {
            assert_relative_eq!(f, 123.0, max_relative = 0.01);
        }
        assert_relative_eq!(yin.estimate_at(&samples, 44100, 10000), 123.0, max_relative = 0.01);
    }

    #[test]
    fn frames_stay_inside_the_input() {
        let yin = F0EstimatorYin::default();
        // 50 Hz floor: 882 lag samples, 882 window samples, 441 hop
        let span = 882 + 882 + 1;
        for extra in [0, 1, 440, 441, 442, 882] {
            let samples = tone(200.0, span + extra);
            assert_eq!(yin.estimate(&samples, 44100).len(), extra / 441 + 1, "extra = {extra}");
        }
        assert!(yin.estimate(&tone(200.0, span - 1), 44100).is_empty());
    }

    #[test]
    fn silence_is_unvoiced() {
        let yin = F0EstimatorYin::default();
        let track = yin.estimate(&vec![0.0; 8000], 44100);
        assert!(track.iter().all(|f| *f == 0.0));
    }
}

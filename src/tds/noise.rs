//! Band-limited turbulence noise injected as dipole pressure sources.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use rustfft::num_complex::Complex64;

use crate::constants::{AIR_VISCOSITY, AMBIENT_DENSITY, TWO_PI};

/// Reynolds number above which flow becomes turbulent
pub const CRITICAL_REYNOLDS_NUMBER: f64 = 1800.0;
/// Noise pressure per excess squared Reynolds number (dPa)
const NOISE_FACTOR: f64 = 2.0e-6;
/// The spectral shape is normalized to unit gain at this frequency
const REFERENCE_FREQUENCY_HZ: f64 = 1000.0;

/// Reynolds number of `flow` (cm^3/s) through a round opening of `area` (cm^2).
pub fn reynolds_number(flow: f64, area: f64) -> f64 {
    let area = area.max(crate::constants::MIN_AREA_CM2);
    let velocity = flow.abs() / area;
    let diameter = 2.0 * (area / std::f64::consts::PI).sqrt();
    AMBIENT_DENSITY * velocity * diameter / AIR_VISCOSITY
}

/// Noise amplitude at the reference frequency for a given Reynolds number.
pub fn noise_amplitude(reynolds: f64) -> f64 {
    let excess = reynolds * reynolds - CRITICAL_REYNOLDS_NUMBER * CRITICAL_REYNOLDS_NUMBER;
    if excess > 0.0 { NOISE_FACTOR * excess } else { 0.0 }
}

#[derive(Debug, Clone)]
pub struct NoiseSource {
    rng: Pcg32,
    /// Second Gaussian sample of the last Box-Muller pair
    spare: Option<f64>,
    cutoff_hz: f64,
    b: [f64; 3],
    a: [f64; 2],
    x: [f64; 2],
    y: [f64; 2],
    /// 1 / |H(f_ref)|
    normalization: f64,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        let mut source = Self {
            rng: Pcg32::seed_from_u64(seed),
            spare: None,
            cutoff_hz: 0.0,
            b: [0.0; 3],
            a: [0.0; 2],
            x: [0.0; 2],
            y: [0.0; 2],
            normalization: 1.0,
        };
        source.set_cutoff(4000.0, crate::constants::SAMPLING_RATE);
        source
    }

    pub fn reset(&mut self) {
        self.x = [0.0; 2];
        self.y = [0.0; 2];
        self.spare = None;
    }

    /// Standard normal sample (polar Box-Muller).
    fn gaussian(&mut self) -> f64 {
        if let Some(spare) = self.spare.take() {
            return spare;
        }
        loop {
            let r1 = 2.0 * self.rng.r#gen::<f64>() - 1.0;
            let r2 = 2.0 * self.rng.r#gen::<f64>() - 1.0;
            let s = r1 * r1 + r2 * r2;
            if s > 0.0 && s < 1.0 {
                let f = (-2.0 * s.ln() / s).sqrt();
                self.spare = Some(r2 * f);
                return r1 * f;
            }
        }
    }

    /// Redesign the two-pole low pass when the cutoff moved noticeably.
    pub fn set_cutoff(&mut self, cutoff_hz: f64, sampling_rate: usize) {
        let fs = sampling_rate as f64;
        let cutoff_hz = cutoff_hz.clamp(100.0, 0.45 * fs);
        if (cutoff_hz - self.cutoff_hz).abs() < 1.0 {
            return;
        }
        self.cutoff_hz = cutoff_hz;

        let w0 = TWO_PI * cutoff_hz / fs;
        let alpha = w0.sin() / (2.0 * std::f64::consts::FRAC_1_SQRT_2);
        let cos = w0.cos();
        let a0 = 1.0 + alpha;
        self.b = [(1.0 - cos) / 2.0 / a0, (1.0 - cos) / a0, (1.0 - cos) / 2.0 / a0];
        self.a = [-2.0 * cos / a0, (1.0 - alpha) / a0];

        let z = Complex64::from_polar(1.0, -TWO_PI * REFERENCE_FREQUENCY_HZ / fs);
        let num = self.b[0] + self.b[1] * z + self.b[2] * z * z;
        let den = 1.0 + self.a[0] * z + self.a[1] * z * z;
        let gain = (num / den).norm();
        self.normalization = if gain > 1.0e-12 { 1.0 / gain } else { 1.0 };
    }

    /// Next noise sample with the given amplitude at the reference frequency.
    pub fn next_sample(&mut self, amplitude: f64) -> f64 {
        let input = self.gaussian();
        let out = self.b[0] * input + self.b[1] * self.x[0] + self.b[2] * self.x[1]
            - self.a[0] * self.y[0]
            - self.a[1] * self.y[1];
        self.x = [input, self.x[0]];
        self.y = [out, self.y[0]];
        amplitude * self.normalization * out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laminar_flow_is_silent() {
        assert_eq!(noise_amplitude(1000.0), 0.0);
        assert!(noise_amplitude(5000.0) > 0.0);
        let re = reynolds_number(300.0, 0.1);
        assert!(re > CRITICAL_REYNOLDS_NUMBER, "{re}");
    }

    #[test]
    fn deterministic_and_finite() {
        let mut a = NoiseSource::new(7);
        let mut b = NoiseSource::new(7);
        a.set_cutoff(2500.0, 44100);
        b.set_cutoff(2500.0, 44100);
        let mut energy = 0.0;
        for _ in 0..10000 {
            let x = a.next_sample(10.0);
            assert_eq!(x, b.next_sample(10.0));
            assert!(x.is_finite());
            energy += x * x;
        }
        assert!(energy > 0.0);
    }

    #[test]
    fn unit_gain_at_reference() {
        let mut s = NoiseSource::new(1);
        s.set_cutoff(1000.0, 44100);
        // Butterworth at its cutoff has gain 1/sqrt(2)
        assert!((s.normalization - std::f64::consts::SQRT_2).abs() < 0.01);
    }
}

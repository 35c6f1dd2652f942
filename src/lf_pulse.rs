//! Liljencrants-Fant model of the glottal flow (derivative).

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::signal::Signal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LfPulse {
    /// Fundamental frequency (Hz)
    pub f0: f64,
    /// Peak glottal flow (cm^3/s)
    pub amp: f64,
    /// Open quotient Te/T0
    pub oq: f64,
    /// Speed quotient Tp/(Te-Tp)
    pub sq: f64,
    /// Spectral tilt at 3 kHz caused by the return phase (dB)
    pub tl: f64,
}

impl Default for LfPulse {
    fn default() -> Self {
        Self {
            f0: 120.0,
            amp: 300.0,
            oq: 0.5,
            sq: 2.0,
            tl: 0.0,
        }
    }
}

/// Timing constants of one period, all in seconds.
#[derive(Debug, Clone, Copy)]
struct Timing {
    t0: f64,
    tp: f64,
    te: f64,
    ta: f64,
}

impl LfPulse {
    fn timing(&self) -> Timing {
        let t0 = 1.0 / self.f0.max(1.0);
        let oq = self.oq.clamp(0.1, 0.99);
        let sq = self.sq.clamp(0.5, 20.0);
        let te = oq * t0;
        let tp = te * sq / (1.0 + sq);

        // A first-order return phase damps the spectrum above Fa = 1/(2 pi Ta)
        let tilt = 10f64.powf(self.tl.max(0.0) / 10.0) - 1.0;
        let ta = if tilt > 1.0e-9 {
            let fa = 3000.0 / tilt.sqrt();
            1.0 / (2.0 * PI * fa)
        } else {
            1.0e-6
        };
        Timing {
            t0,
            tp,
            te,
            ta: ta.min(0.99 * (t0 - te)),
        }
    }

    /// Solve eps*Ta = 1 - exp(-eps*(T0-Te)) by Newton iteration.
    fn epsilon(t: &Timing) -> f64 {
        let tc = t.t0 - t.te;
        let mut eps = 1.0 / t.ta;
        for _ in 0..50 {
            let e = (-eps * tc).exp();
            let f = eps * t.ta - 1.0 + e;
            let df = t.ta - tc * e;
            if df.abs() < 1.0e-15 {
                break;
            }
            let next = eps - f / df;
            if !next.is_finite() || next <= 0.0 {
                break;
            }
            if (next - eps).abs() < 1.0e-9 * eps {
                eps = next;
                break;
            }
            eps = next;
        }
        eps
    }

    /// Net flow over one period for unit E0 and growth rate `alpha`.
    fn net_flow(alpha: f64, eps: f64, t: &Timing) -> f64 {
        let w = PI / t.tp;
        let ete = (alpha * t.te).exp();
        let open = (ete * (alpha * (w * t.te).sin() - w * (w * t.te).cos()) + w) / (alpha * alpha + w * w);
        let ee = -ete * (w * t.te).sin();
        let tc = t.t0 - t.te;
        let ret = -ee / (eps * t.ta) * ((1.0 - (-eps * tc).exp()) / eps - tc * (-eps * tc).exp());
        open + ret
    }

    fn alpha(eps: f64, t: &Timing) -> f64 {
        let mut lo = -20.0 / t.te;
        let mut hi = 60.0 / t.te;
        let f_lo = Self::net_flow(lo, eps, t);
        let f_hi = Self::net_flow(hi, eps, t);
        if !(f_lo.is_finite() && f_hi.is_finite()) || f_lo.signum() == f_hi.signum() {
            return 0.0;
        }
        for _ in 0..100 {
            let mid = 0.5 * (lo + hi);
            let f_mid = Self::net_flow(mid, eps, t);
            if f_mid.signum() == f_lo.signum() {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    /// Fill `signal` with one period of the glottal flow (or its derivative) at `sampling_rate`.
    ///
    /// The flow is scaled so that its maximum equals `amp`; the derivative uses the same scale.
    pub fn get_pulse(&self, signal: &mut Signal, sampling_rate: usize, derivative: bool) {
        let t = self.timing();
        let eps = Self::epsilon(&t);
        let alpha = Self::alpha(eps, &t);
        let w = PI / t.tp;
        let ee = -(alpha * t.te).exp() * (w * t.te).sin();
        let dt = 1.0 / sampling_rate as f64;
        let len = (t.t0 / dt).round().max(1.0) as usize;

        let deriv: Vec<f64> = (0..len)
            .map(|i| {
                let time = i as f64 * dt;
                if time <= t.te {
                    (alpha * time).exp() * (w * time).sin()
                } else {
                    -ee / (eps * t.ta) * ((-eps * (time - t.te)).exp() - (-eps * (t.t0 - t.te)).exp())
                }
            })
            .collect();

        let mut flow = Vec::with_capacity(len);
        let mut acc = 0.0;
        for d in &deriv {
            acc += d * dt;
            flow.push(acc);
        }
        let peak = flow.iter().fold(0.0f64, |m, x| m.max(*x));
        let scale = if peak > 0.0 { self.amp / peak } else { 0.0 };

        signal.reset(len);
        let source = if derivative { &deriv } else { &flow };
        for (s, x) in signal.iter_mut().zip(source) {
            *s = x * scale;
        }
    }

    /// Number of samples in one period.
    pub fn period_samples(&self, sampling_rate: usize) -> usize {
        (sampling_rate as f64 / self.f0.max(1.0)).round().max(1.0) as usize
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::LfPulse;
    use crate::signal::Signal;

    #[test]
    fn flow_returns_to_zero() {
        for tl in [0.0, 6.0, 20.0] {
            let pulse = LfPulse {
                tl,
                ..Default::default()
            };
            let mut s = Signal::new(0);
            pulse.get_pulse(&mut s, 44100, false);
            assert_eq!(s.len(), pulse.period_samples(44100));
            assert_abs_diff_eq!(s.max_abs(), pulse.amp, epsilon = 1.0e-9);
            assert!(s[s.len() - 1].abs() < 0.03 * pulse.amp, "tl={tl}: {}", s[s.len() - 1]);
            assert!(s.iter().all(|x| *x > -0.03 * pulse.amp));
        }
    }

    #[test]
    fn derivative_has_negative_peak_at_excitation() {
        let pulse = LfPulse::default();
        let mut d = Signal::new(0);
        pulse.get_pulse(&mut d, 44100, true);
        let (imin, _) = d
            .iter()
            .enumerate()
            .fold((0, f64::MAX), |acc, (i, x)| if *x < acc.1 { (i, *x) } else { acc });
        let te = (pulse.oq * 44100.0 / pulse.f0) as usize;
        assert!(imin.abs_diff(te) <= 2, "{imin} vs {te}");
    }
}

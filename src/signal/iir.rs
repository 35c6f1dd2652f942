use std::f64::consts::PI;

/// One second-order section, direct form I.
#[derive(Debug, Clone, Default)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
    x: [f64; 2],
    y: [f64; 2],
}

impl Biquad {
    #[inline(always)]
    fn process(&mut self, input: f64) -> f64 {
        let out = self.b[0] * input + self.b[1] * self.x[0] + self.b[2] * self.x[1]
            - self.a[0] * self.y[0]
            - self.a[1] * self.y[1];
        self.x = [input, self.x[0]];
        self.y = [out, self.y[0]];
        out
    }

    fn reset(&mut self) {
        self.x = [0.0; 2];
        self.y = [0.0; 2];
    }

    fn gain_at(&self, z: f64) -> f64 {
        // z = +1 (DC) or -1 (Nyquist)
        (self.b[0] + self.b[1] * z + self.b[2]) / (1.0 + self.a[0] * z + self.a[1])
    }
}

/// Chebyshev type I filter as a cascade of biquads.
#[derive(Debug, Clone, Default)]
pub struct IirFilter {
    sections: Vec<Biquad>,
}

impl IirFilter {
    /// Chebyshev low pass with 0.5 % passband ripple.
    ///
    /// `cutoff` is relative to the sampling rate (0 < cutoff < 0.5), `poles` is even.
    /// The passband gain is normalized to 1 at DC.
    pub fn chebyshev_lowpass(cutoff: f64, poles: usize) -> Self {
        Self::chebyshev(cutoff, poles, false)
    }

    /// Chebyshev high pass with 0.5 % ripple, normalized to 1 at Nyquist.
    pub fn chebyshev_highpass(cutoff: f64, poles: usize) -> Self {
        Self::chebyshev(cutoff, poles, true)
    }

    fn chebyshev(cutoff: f64, poles: usize, highpass: bool) -> Self {
        let poles = (poles.max(2) / 2) * 2;
        let cutoff = cutoff.clamp(1.0e-4, 0.4999);
        let ripple: f64 = 0.5;
        let np = poles as f64;

        let mut sections = Vec::with_capacity(poles / 2);
        for p in 1..=poles / 2 {
            // Pole on the unit circle
            let angle = PI / (np * 2.0) + (p - 1) as f64 * PI / np;
            let mut rp = -angle.cos();
            let mut ip = angle.sin();

            // Warp onto the Chebyshev ellipse
            let es = ((100.0 / (100.0 - ripple)).powi(2) - 1.0).sqrt();
            let vx = (1.0 / np) * (1.0 / es).asinh();
            let kx = (1.0 / np) * (1.0 / es).acosh();
            let kx = (kx.exp() + (-kx).exp()) / 2.0;
            rp *= ((vx.exp() - (-vx).exp()) / 2.0) / kx;
            ip *= ((vx.exp() + (-vx).exp()) / 2.0) / kx;

            // s-domain to z-domain (bilinear)
            let t = 2.0 * (0.5f64).tan();
            let w = 2.0 * PI * cutoff;
            let m = rp * rp + ip * ip;
            let d = 4.0 - 4.0 * rp * t + m * t * t;
            let x0 = t * t / d;
            let x1 = 2.0 * t * t / d;
            let x2 = t * t / d;
            let y1 = (8.0 - 2.0 * m * t * t) / d;
            let y2 = (-4.0 - 4.0 * rp * t - m * t * t) / d;

            // Low pass to low pass or high pass frequency change
            let k = if highpass {
                -(w / 2.0 + 0.5).cos() / (w / 2.0 - 0.5).cos()
            } else {
                (0.5 - w / 2.0).sin() / (0.5 + w / 2.0).sin()
            };
            let d = 1.0 + y1 * k - y2 * k * k;
            let a0 = (x0 - x1 * k + x2 * k * k) / d;
            let mut a1 = (-2.0 * x0 * k + x1 + x1 * k * k - 2.0 * x2 * k) / d;
            let a2 = (x0 * k * k - x1 * k + x2) / d;
            let mut b1 = (2.0 * k + y1 + y1 * k * k - 2.0 * y2 * k) / d;
            let b2 = (-(k * k) - y1 * k + y2) / d;
            if highpass {
                a1 = -a1;
                b1 = -b1;
            }

            // The recursion is y = a0 x + a1 x1 + a2 x2 + b1 y1 + b2 y2
            let mut section = Biquad {
                b: [a0, a1, a2],
                a: [-b1, -b2],
                ..Default::default()
            };
            let gain = section.gain_at(if highpass { -1.0 } else { 1.0 });
            if gain.is_finite() && gain.abs() > 1.0e-12 {
                section.b.iter_mut().for_each(|b| *b /= gain);
            }
            sections.push(section);
        }
        Self { sections }
    }

    #[inline]
    pub fn output_sample(&mut self, input: f64) -> f64 {
        self.sections
            .iter_mut()
            .fold(input, |x, section| section.process(x))
    }

    pub fn reset_buffers(&mut self) {
        self.sections.iter_mut().for_each(Biquad::reset);
    }

    /// Apply the filter to a whole buffer, starting from a cleared state.
    pub fn filter_in_place(&mut self, samples: &mut [f64]) {
        self.reset_buffers();
        for s in samples.iter_mut() {
            *s = self.output_sample(*s);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::IirFilter;

    fn steady_gain(filter: &mut IirFilter, freq: f64) -> f64 {
        filter.reset_buffers();
        let mut peak: f64 = 0.0;
        for n in 0..20000 {
            let y = filter.output_sample((std::f64::consts::TAU * freq * n as f64).cos());
            if n > 15000 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn lowpass_unity_dc() {
        let mut f = IirFilter::chebyshev_lowpass(12000.0 / 44100.0, 8);
        let mut y = 0.0;
        for _ in 0..5000 {
            y = f.output_sample(1.0);
        }
        assert_abs_diff_eq!(y, 1.0, epsilon = 1.0e-6);
    }

    #[test]
    fn lowpass_attenuates_stopband() {
        let mut f = IirFilter::chebyshev_lowpass(0.1, 6);
        let pass = steady_gain(&mut f, 0.02);
        let stop = steady_gain(&mut f, 0.3);
        assert!(pass > 0.9 && pass < 1.1, "{pass}");
        assert!(stop < 0.01, "{stop}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = IirFilter::chebyshev_highpass(0.05, 4);
        let mut y = 1.0;
        for _ in 0..5000 {
            y = f.output_sample(1.0);
        }
        assert!(y.abs() < 1.0e-6);
        let pass = steady_gain(&mut f, 0.3);
        assert!(pass > 0.9 && pass < 1.1, "{pass}");
    }
}

//! Kinematic glottis: the fold edges follow prescribed pulses, pressures are ignored.

use super::{FREQUENCY, GlottisKind, GlottisModel, GlottisParams, PRESSURE, flutter};
use crate::param::Param;

// Static parameters
const REST_LENGTH: usize = 0;
const REST_THICKNESS: usize = 1;
const REST_F0: usize = 2;
const CHINK_LENGTH: usize = 3;

// Control parameters after F0 and pressure
const LOWER_END_X: usize = 2;
const UPPER_END_X: usize = 3;
const CHINK_AREA: usize = 4;
const PHASE_LAG: usize = 5;
const RELATIVE_AMPLITUDE: usize = 6;
const DOUBLE_PULSING: usize = 7;
const PULSE_SKEWNESS: usize = 8;
const FLUTTER: usize = 9;
const ASPIRATION_STRENGTH: usize = 10;

// Derived parameters
const LOWER_CORD_X: usize = 0;
const UPPER_CORD_X: usize = 1;
const LENGTH: usize = 2;
const THICKNESS: usize = 3;
const AMPLITUDE: usize = 4;
const CHINK_WIDTH: usize = 5;
const LOWER_AREA: usize = 6;
const UPPER_AREA: usize = 7;

/// Peak displacement (cm) at 8000 dPa and the rest F0
const BASE_AMPLITUDE_CM: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct GeometricGlottis {
    params: GlottisParams,
    /// Phase within the current period, 0..1
    phase: f64,
    /// Completed periods since the last reset
    periods: u64,
    time_s: f64,
}

impl Default for GeometricGlottis {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometricGlottis {
    pub fn new() -> Self {
        let mut control_params = GlottisParams::common_control_params();
        control_params.extend([
            Param::new("Lower displacement", "x_bottom", "cm", -0.05, 0.3, 0.0),
            Param::new("Upper displacement", "x_top", "cm", -0.05, 0.3, 0.0),
            Param::new("Chink area", "chink_area", "cm^2", 0.0, 0.2, 0.0),
            Param::new("Phase lag", "lag", "rad", 0.0, std::f64::consts::PI, 1.0),
            Param::new("Relative amplitude", "rel_amp", "", 0.0, 1.0, 1.0),
            Param::new("Double pulsing", "double_pulsing", "", 0.0, 1.0, 0.0),
            Param::new("Pulse skewness", "pulse_skewness", "", -0.5, 0.5, 0.0),
            Param::new("Flutter", "flutter", "%", 0.0, 100.0, 25.0),
            GlottisParams::aspiration_param(),
        ]);

        let mut params = GlottisParams {
            static_params: vec![
                Param::new("Rest length", "rest_length", "cm", 0.5, 2.0, 1.6),
                Param::new("Rest thickness", "rest_thickness", "cm", 0.1, 0.6, 0.3),
                Param::new("F0 at rest length", "rest_f0", "Hz", 50.0, 400.0, 120.0),
                Param::new("Chink length", "chink_length", "cm", 0.1, 0.5, 0.2),
            ],
            control_params,
            derived_params: vec![
                Param::new("Lower cord displacement", "lower_cord_x", "cm", -1.0, 1.0, 0.0),
                Param::new("Upper cord displacement", "upper_cord_x", "cm", -1.0, 1.0, 0.0),
                Param::new("Length", "length", "cm", 0.0, 3.0, 1.6),
                Param::new("Thickness", "thickness", "cm", 0.0, 1.0, 0.3),
                Param::new("Amplitude", "amplitude", "cm", 0.0, 1.0, 0.0),
                Param::new("Chink width", "chink_width", "cm", 0.0, 1.0, 0.0),
                Param::new("Lower area", "lower_area", "cm^2", 0.0, 5.0, 0.0),
                Param::new("Upper area", "upper_area", "cm^2", 0.0, 5.0, 0.0),
            ],
            shapes: Vec::new(),
        };
        params.shapes = vec![
            params.make_shape("default", &[]),
            params.make_shape("modal", &[("x_bottom", 0.0), ("x_top", 0.0)]),
            params.make_shape("pressed", &[("x_bottom", -0.02), ("x_top", -0.02), ("rel_amp", 0.7)]),
            params.make_shape("breathy", &[("x_bottom", 0.03), ("x_top", 0.03), ("chink_area", 0.05)]),
            params.make_shape("voiceless", &[("x_bottom", 0.15), ("x_top", 0.15), ("rel_amp", 0.0)]),
            params.make_shape("stop", &[("x_bottom", -0.05), ("x_top", -0.05), ("rel_amp", 0.0)]),
        ];

        let mut glottis = Self {
            params,
            phase: 0.0,
            periods: 0,
            time_s: 0.0,
        };
        glottis.calc_geometry();
        glottis
    }

    /// Skewed raised-cosine pulse over one period, 0 at the period borders, 1 at the peak.
    fn pulse(phase: f64, skewness: f64) -> f64 {
        let p = phase.rem_euclid(1.0);
        let peak = 0.5 + 0.5 * skewness;
        let warped = if p < peak {
            0.5 * p / peak
        } else {
            0.5 + 0.5 * (p - peak) / (1.0 - peak)
        };
        0.5 - 0.5 * (crate::constants::TWO_PI * warped).cos()
    }
}

impl GlottisModel for GeometricGlottis {
    fn kind(&self) -> GlottisKind {
        GlottisKind::Geometric
    }

    fn params(&self) -> &GlottisParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut GlottisParams {
        &mut self.params
    }

    fn reset_motion(&mut self) {
        self.phase = 0.0;
        self.periods = 0;
        self.time_s = 0.0;
        self.calc_geometry();
    }

    fn inc_time(&mut self, dt: f64, _pressures: &[f64; 4]) {
        let f0 = flutter(
            self.params.control(FREQUENCY),
            self.params.control(FLUTTER),
            self.time_s,
        );
        self.time_s += dt;
        self.phase += f0.max(0.0) * dt;
        while self.phase >= 1.0 {
            self.phase -= 1.0;
            self.periods += 1;
        }
    }

    fn calc_geometry(&mut self) {
        let p = &self.params;
        let rest_length = p.static_value(REST_LENGTH);
        let ratio = p.control(FREQUENCY) / p.static_value(REST_F0);
        let length = (rest_length * (0.6 + 0.4 * ratio)).clamp(0.5 * rest_length, 1.5 * rest_length);
        let thickness = p.static_value(REST_THICKNESS) * rest_length / length;

        let pressure = p.control(PRESSURE).max(0.0);
        let mut amplitude = BASE_AMPLITUDE_CM
            * p.control(RELATIVE_AMPLITUDE)
            * (pressure / 8000.0).sqrt()
            * ratio.max(0.1).powf(-0.5);
        if self.periods % 2 == 1 {
            amplitude *= 1.0 - p.control(DOUBLE_PULSING);
        }

        let skewness = p.control(PULSE_SKEWNESS);
        let lag = p.control(PHASE_LAG) / crate::constants::TWO_PI;
        let lower_x = p.control(LOWER_END_X) + amplitude * Self::pulse(self.phase, skewness);
        let upper_x = p.control(UPPER_END_X) + amplitude * Self::pulse(self.phase - lag, skewness);

        let chink_length = p.static_value(CHINK_LENGTH).min(length);
        let chink_area = p.control(CHINK_AREA);
        let vibrating = length - chink_length;
        let lower_area = (2.0 * vibrating * lower_x).max(0.0) + chink_area;
        let upper_area = (2.0 * vibrating * upper_x).max(0.0) + chink_area;

        let p = &mut self.params;
        p.set_derived(LOWER_CORD_X, lower_x);
        p.set_derived(UPPER_CORD_X, upper_x);
        p.set_derived(LENGTH, length);
        p.set_derived(THICKNESS, thickness);
        p.set_derived(AMPLITUDE, amplitude);
        p.set_derived(CHINK_WIDTH, chink_area / chink_length.max(1.0e-3));
        p.set_derived(LOWER_AREA, lower_area);
        p.set_derived(UPPER_AREA, upper_area);
    }

    fn tube_data(&self) -> ([f64; 2], [f64; 2]) {
        let half = 0.5 * self.params.derived_params[THICKNESS].x;
        (
            [half, half],
            [
                self.params.derived_params[LOWER_AREA].x,
                self.params.derived_params[UPPER_AREA].x,
            ],
        )
    }

    fn aspiration_strength_db(&self) -> f64 {
        self.params.control(ASPIRATION_STRENGTH)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn pulse_shape() {
        assert_abs_diff_eq!(GeometricGlottis::pulse(0.0, 0.0), 0.0);
        assert_abs_diff_eq!(GeometricGlottis::pulse(0.5, 0.0), 1.0);
        assert_abs_diff_eq!(GeometricGlottis::pulse(0.75, 0.5), 1.0, epsilon = 1.0e-12);
        assert_abs_diff_eq!(GeometricGlottis::pulse(1.25, 0.0), GeometricGlottis::pulse(0.25, 0.0));
    }

    #[test]
    fn chink_keeps_glottis_open() {
        let mut g = GeometricGlottis::new();
        assert!(g.params.apply_shape("breathy"));
        g.params.control_params[RELATIVE_AMPLITUDE].set(0.0);
        g.calc_geometry();
        let (_, area) = g.tube_data();
        assert!(area[0] >= 0.05 && area[1] >= 0.05);
        assert!(!g.is_closed());
    }

    #[test]
    fn stop_shape_is_closed() {
        let mut g = GeometricGlottis::new();
        assert!(g.params.apply_shape("stop"));
        g.calc_geometry();
        assert!(g.is_closed());
    }
}

//! Two-mass model of the vocal folds after Ishizaka & Flanagan (1972), with
//! the symmetric parameter set and flow forces of Steinecke & Herzel (1995).

use super::{FREQUENCY, GlottisKind, GlottisModel, GlottisParams, flow_pressures};
use crate::param::Param;

// Static parameters
const MASS_1: usize = 0;
const MASS_2: usize = 1;
const SPRING_1: usize = 2;
const SPRING_2: usize = 3;
const COUPLING_SPRING: usize = 4;
const THICKNESS_1: usize = 5;
const THICKNESS_2: usize = 6;
const LENGTH: usize = 7;
const NATURAL_F0: usize = 8;
const NONLINEARITY: usize = 9;

// Control parameters after F0 and pressure
const REST_AREA_1: usize = 2;
const REST_AREA_2: usize = 3;
const ASPIRATION_STRENGTH: usize = 4;

// Derived parameters
const AREA_1: usize = 0;
const AREA_2: usize = 1;
const TENSION: usize = 2;
const DISPLACEMENT_1: usize = 3;
const DISPLACEMENT_2: usize = 4;

/// Damping ratios while open and during contact
const ZETA_OPEN: [f64; 2] = [0.1, 0.6];
const ZETA_CLOSED: [f64; 2] = [1.1, 1.9];
/// Collision springs are this many times stiffer than the free springs
const COLLISION_FACTOR: f64 = 3.0;
/// Cap for displacements, keeps the cubic springs in range
const MAX_DISPLACEMENT_CM: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct TwoMassModel {
    params: GlottisParams,
    x: [f64; 2],
    v: [f64; 2],
}

impl Default for TwoMassModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TwoMassModel {
    pub fn new() -> Self {
        let mut control_params = GlottisParams::common_control_params();
        control_params.extend([
            Param::new("Rest area 1", "rest_area_1", "cm^2", -0.25, 0.5, 0.05),
            Param::new("Rest area 2", "rest_area_2", "cm^2", -0.25, 0.5, 0.05),
            GlottisParams::aspiration_param(),
        ]);
        let mut params = GlottisParams {
            static_params: vec![
                Param::new("Mass 1", "m1", "g", 0.01, 1.0, 0.125),
                Param::new("Mass 2", "m2", "g", 0.005, 1.0, 0.025),
                Param::new("Spring 1", "k1", "dyn/cm", 1000.0, 500000.0, 80000.0),
                Param::new("Spring 2", "k2", "dyn/cm", 1000.0, 500000.0, 8000.0),
                Param::new("Coupling spring", "kc", "dyn/cm", 1000.0, 500000.0, 25000.0),
                Param::new("Thickness 1", "d1", "cm", 0.05, 1.0, 0.25),
                Param::new("Thickness 2", "d2", "cm", 0.01, 1.0, 0.05),
                Param::new("Length", "length", "cm", 0.5, 2.5, 1.4),
                Param::new("Natural F0", "natural_f0", "Hz", 40.0, 400.0, 160.0),
                Param::new("Spring nonlinearity", "eta", "1/cm^2", 0.0, 1000.0, 100.0),
            ],
            control_params,
            derived_params: vec![
                Param::new("Area 1", "area_1", "cm^2", 0.0, 5.0, 0.0),
                Param::new("Area 2", "area_2", "cm^2", 0.0, 5.0, 0.0),
                Param::new("Tension", "q", "", 0.1, 10.0, 1.0),
                Param::new("Displacement 1", "x1", "cm", -1.0, 1.0, 0.0),
                Param::new("Displacement 2", "x2", "cm", -1.0, 1.0, 0.0),
            ],
            shapes: Vec::new(),
        };
        params.shapes = vec![
            params.make_shape("default", &[]),
            params.make_shape("modal", &[("rest_area_1", 0.05), ("rest_area_2", 0.05)]),
            params.make_shape("breathy", &[("rest_area_1", 0.15), ("rest_area_2", 0.15), ("aspiration_strength", -5.0)]),
            params.make_shape("pressed", &[("rest_area_1", 0.0), ("rest_area_2", 0.0)]),
            params.make_shape("voiceless", &[("rest_area_1", 0.4), ("rest_area_2", 0.4)]),
            params.make_shape("stop", &[("rest_area_1", -0.2), ("rest_area_2", -0.2)]),
        ];
        let mut model = Self {
            params,
            x: [0.0; 2],
            v: [0.0; 2],
        };
        model.calc_geometry();
        model
    }

    fn tension(&self) -> f64 {
        (self.params.control(FREQUENCY) / self.params.static_value(NATURAL_F0)).clamp(0.1, 10.0)
    }

    /// Area of mass `i` for displacement `x` (can be negative during contact)
    fn signed_area(&self, i: usize, x: f64) -> f64 {
        self.params.control(REST_AREA_1 + i) + 2.0 * self.params.static_value(LENGTH) * x
    }
}

impl GlottisModel for TwoMassModel {
    fn kind(&self) -> GlottisKind {
        GlottisKind::TwoMass
    }

    fn params(&self) -> &GlottisParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut GlottisParams {
        &mut self.params
    }

    fn reset_motion(&mut self) {
        self.x = [0.0; 2];
        self.v = [0.0; 2];
        self.calc_geometry();
    }

    fn inc_time(&mut self, dt: f64, pressures: &[f64; 4]) {
        let p = &self.params;
        let q = self.tension();
        let length = p.static_value(LENGTH);
        let eta = p.static_value(NONLINEARITY);
        let m = [p.static_value(MASS_1) / q, p.static_value(MASS_2) / q];
        let k = [p.static_value(SPRING_1) * q, p.static_value(SPRING_2) * q];
        let kc = p.static_value(COUPLING_SPRING) * q;
        let d = [p.static_value(THICKNESS_1), p.static_value(THICKNESS_2)];
        let area = [0, 1].map(|i| self.signed_area(i, self.x[i]).max(0.0));
        let pressure = flow_pressures(pressures, area);
        let force = [pressure[0] * length * d[0], pressure[1] * length * d[1]];

        let mut accel = [0.0; 2];
        for i in 0..2 {
            let area = self.signed_area(i, self.x[i]);
            let closed = area <= 0.0;
            let zeta = if closed { ZETA_CLOSED[i] } else { ZETA_OPEN[i] };
            let r = 2.0 * zeta * (m[i] * k[i]).sqrt();
            let x = self.x[i];
            let mut spring = k[i] * x * (1.0 + eta * x * x);
            if closed {
                // Penetration depth beyond the midline
                let y = area / (2.0 * length);
                let h = COLLISION_FACTOR * k[i];
                spring += h * y * (1.0 + eta * y * y);
            }
            let coupling = kc * (x - self.x[1 - i]);
            accel[i] = (force[i] - r * self.v[i] - spring - coupling) / m[i];
        }

        // Semi-implicit Euler
        for i in 0..2 {
            self.v[i] += accel[i] * dt;
            self.x[i] += self.v[i] * dt;
            if !self.x[i].is_finite() {
                self.x[i] = 0.0;
                self.v[i] = 0.0;
            }
            self.x[i] = self.x[i].clamp(-MAX_DISPLACEMENT_CM, MAX_DISPLACEMENT_CM);
        }
    }

    fn calc_geometry(&mut self) {
        let a1 = self.signed_area(0, self.x[0]).max(0.0);
        let a2 = self.signed_area(1, self.x[1]).max(0.0);
        let q = self.tension();
        let (x1, x2) = (self.x[0], self.x[1]);
        let p = &mut self.params;
        p.set_derived(AREA_1, a1);
        p.set_derived(AREA_2, a2);
        p.set_derived(TENSION, q);
        p.set_derived(DISPLACEMENT_1, x1);
        p.set_derived(DISPLACEMENT_2, x2);
    }

    fn tube_data(&self) -> ([f64; 2], [f64; 2]) {
        let p = &self.params;
        (
            [p.static_value(THICKNESS_1), p.static_value(THICKNESS_2)],
            [p.derived_params[AREA_1].x, p.derived_params[AREA_2].x],
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
    fn rest_position_without_pressure() {
        let mut g = TwoMassModel::new();
        for _ in 0..1000 {
            g.inc_time(1.0 / 44100.0, &[0.0; 4]);
        }
        g.calc_geometry();
        let (_, area) = g.tube_data();
        assert_abs_diff_eq!(area[0], 0.05, epsilon = 1.0e-9);
        assert_abs_diff_eq!(area[1], 0.05, epsilon = 1.0e-9);
    }

    #[test]
    fn convergent_rest_shape_opens_lower_mass() {
        let mut g = TwoMassModel::new();
        g.params.control_params[REST_AREA_1].set(0.1);
        for _ in 0..200 {
            g.inc_time(1.0 / 44100.0, &[8000.0, 0.0, 0.0, 0.0]);
        }
        g.calc_geometry();
        assert!(g.params.derived_params[DISPLACEMENT_1].x > 0.0);
    }

    #[test]
    fn closed_folds_are_pushed_open() {
        let mut g = TwoMassModel::new();
        assert!(g.params.apply_shape("pressed"));
        for _ in 0..200 {
            g.inc_time(1.0 / 44100.0, &[8000.0, 0.0, 0.0, 0.0]);
        }
        g.calc_geometry();
        assert!(g.params.derived_params[AREA_1].x > 0.0);
    }

    #[test]
    fn tension_follows_f0() {
        let mut g = TwoMassModel::new();
        g.params.control_params[FREQUENCY].set(320.0);
        assert_abs_diff_eq!(g.tension(), 2.0);
    }
}

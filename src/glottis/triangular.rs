//! Self-oscillating glottis with a triangular opening.
//!
//! Each fold is a lower and an upper mass. The folds touch at the anterior
//! commissure and open towards the posterior end, so the glottal opening of
//! each mass is a triangle with base `2 * (rest_disp + x)` and height equal to
//! the fold length. A separate posterior (arytenoid) opening adds a constant
//! area. Tension is controlled via `Q = 1 + (F0 - NATURAL_F0) / F0_DIV_Q`.

use super::{FREQUENCY, GlottisKind, GlottisModel, GlottisParams, flow_pressures};
use crate::constants::TWO_PI;
use crate::param::Param;

// Static parameters
pub const NATURAL_F0: usize = 0;
pub const F0_DIV_Q: usize = 1;
const REST_LENGTH: usize = 2;
const REST_THICKNESS: usize = 3;
const INLET_LENGTH: usize = 4;
const OUTLET_LENGTH: usize = 5;
const MASS_1: usize = 6;
const MASS_2: usize = 7;
const DAMPING_RATIO_1: usize = 8;
const DAMPING_RATIO_2: usize = 9;
const COUPLING_RATIO: usize = 10;
const CONTACT_STIFFNESS_FACTOR: usize = 11;

// Control parameters after F0 and pressure
const REST_DISP_1: usize = 2;
const REST_DISP_2: usize = 3;
const ARY_AREA: usize = 4;
const ASPIRATION_STRENGTH: usize = 5;
const DAMPING_FACTOR: usize = 6;

// Derived parameters
const CURRENT_LENGTH: usize = 0;
const RELATIVE_DISP_1: usize = 1;
const RELATIVE_DISP_2: usize = 2;
const CURRENT_THICKNESS_1: usize = 3;
const CURRENT_THICKNESS_2: usize = 4;
const AREA_1: usize = 5;
const AREA_2: usize = 6;
const CONTACT_AREA: usize = 7;

const MAX_DISPLACEMENT_CM: f64 = 0.5;
/// Voiced F0 over the ringing frequency of a free mass; the flow forces
/// stiffen the folds by about this much.
const FLOW_STIFFENING: f64 = 1.2;
/// Share of the fold thickness on the lower mass
const LOWER_THICKNESS_SHARE: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct TriangularGlottis {
    params: GlottisParams,
    x: [f64; 2],
    v: [f64; 2],
}

impl Default for TriangularGlottis {
    fn default() -> Self {
        Self::new()
    }
}

impl TriangularGlottis {
    pub fn new() -> Self {
        let mut control_params = GlottisParams::common_control_params();
        control_params.extend([
            Param::new("Lower rest displacement", "rest_disp_1", "cm", -0.05, 0.3, 0.01),
            Param::new("Upper rest displacement", "rest_disp_2", "cm", -0.05, 0.3, 0.01),
            Param::new("Arytenoid area", "ary_area", "cm^2", -0.25, 0.25, 0.0),
            GlottisParams::aspiration_param(),
            Param::new("Damping factor", "damping_factor", "", 0.3, 3.0, 1.0),
        ]);
        let mut params = GlottisParams {
            static_params: vec![
                Param::new("Natural F0", "natural_f0", "Hz", 40.0, 400.0, 100.0),
                Param::new("F0 per Q", "f0_div_q", "Hz", 10.0, 500.0, 100.0),
                Param::new("Rest length", "rest_length", "cm", 0.5, 2.5, 1.6),
                Param::new("Rest thickness", "rest_thickness", "cm", 0.1, 0.6, 0.45),
                Param::new("Inlet length", "inlet_length", "cm", 0.0, 0.5, 0.05),
                Param::new("Outlet length", "outlet_length", "cm", 0.0, 0.5, 0.01),
                Param::new("Lower mass", "m1", "g", 0.01, 0.5, 0.1),
                Param::new("Upper mass", "m2", "g", 0.005, 0.5, 0.02),
                Param::new("Lower damping ratio", "zeta_1", "", 0.0, 3.0, 0.1),
                Param::new("Upper damping ratio", "zeta_2", "", 0.0, 3.0, 0.6),
                Param::new("Coupling ratio", "coupling_ratio", "", 0.0, 2.0, 0.3125),
                Param::new("Contact stiffness factor", "contact_factor", "", 0.5, 10.0, 3.0),
            ],
            control_params,
            derived_params: vec![
                Param::new("Current length", "current_length", "cm", 0.0, 3.0, 1.6),
                Param::new("Relative displacement 1", "relative_disp_1", "cm", -1.0, 1.0, 0.0),
                Param::new("Relative displacement 2", "relative_disp_2", "cm", -1.0, 1.0, 0.0),
                Param::new("Current thickness 1", "current_thickness_1", "cm", 0.0, 1.0, 0.0),
                Param::new("Current thickness 2", "current_thickness_2", "cm", 0.0, 1.0, 0.0),
                Param::new("Area 1", "area_1", "cm^2", 0.0, 5.0, 0.0),
                Param::new("Area 2", "area_2", "cm^2", 0.0, 5.0, 0.0),
                Param::new("Contact area", "contact_area", "cm^2", 0.0, 5.0, 0.0),
            ],
            shapes: Vec::new(),
        };
        params.shapes = vec![
            params.make_shape("default", &[]),
            params.make_shape("modal", &[("rest_disp_1", 0.01), ("rest_disp_2", 0.01)]),
            params.make_shape("pressed", &[("rest_disp_1", -0.01), ("rest_disp_2", -0.01)]),
            params.make_shape("breathy", &[("rest_disp_1", 0.03), ("rest_disp_2", 0.03), ("ary_area", 0.05), ("aspiration_strength", -5.0)]),
            params.make_shape("voiceless", &[("rest_disp_1", 0.15), ("rest_disp_2", 0.15), ("ary_area", 0.1)]),
            params.make_shape("stop", &[("rest_disp_1", -0.05), ("rest_disp_2", -0.05), ("ary_area", -0.1)]),
        ];
        let mut glottis = Self {
            params,
            x: [0.0; 2],
            v: [0.0; 2],
        };
        glottis.calc_geometry();
        glottis
    }

    /// Tension parameter for the current F0.
    pub fn q(&self) -> f64 {
        let p = &self.params;
        let q = 1.0 + (p.control(FREQUENCY) - p.static_value(NATURAL_F0)) / p.static_value(F0_DIV_Q);
        q.clamp(0.2, 10.0)
    }

    fn current_length(&self, q: f64) -> f64 {
        let rest = self.params.static_value(REST_LENGTH);
        (rest * (0.56 + 0.44 * q)).clamp(0.5 * rest, 2.0 * rest)
    }

    /// Posterior displacement of mass `i` (cm).
    fn posterior_disp(&self, i: usize) -> f64 {
        self.params.control(REST_DISP_1 + i) + self.x[i]
    }

    /// Open area and contact area of a triangle with posterior width `2 * d`.
    fn triangle(length: f64, d: f64) -> (f64, f64) {
        if d >= 0.0 {
            (length * d, 0.0)
        } else {
            // Folds pressed together: report the overlap, no opening
            (0.0, length * -d)
        }
    }

    /// Current thickness of the lower and upper masses. Thickness shrinks as the
    /// folds stretch.
    fn thickness(&self, length: f64) -> [f64; 2] {
        let total = self.params.static_value(REST_THICKNESS) * self.params.static_value(REST_LENGTH) / length;
        [LOWER_THICKNESS_SHARE * total, (1.0 - LOWER_THICKNESS_SHARE) * total]
    }
}

impl GlottisModel for TriangularGlottis {
    fn kind(&self) -> GlottisKind {
        GlottisKind::Triangular
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
        let q = self.q();
        let length = self.current_length(q);
        let thickness = self.thickness(length);
        let p = &self.params;
        let natural = p.static_value(NATURAL_F0);

        let m = [p.static_value(MASS_1), p.static_value(MASS_2)];
        // The folds vibrate at Q * NATURAL_F0
        let k = m.map(|mi| mi * (TWO_PI * natural * q / FLOW_STIFFENING).powi(2));
        let kc = p.static_value(COUPLING_RATIO) * k[0];
        let zeta = [
            p.static_value(DAMPING_RATIO_1) * p.control(DAMPING_FACTOR),
            p.static_value(DAMPING_RATIO_2) * p.control(DAMPING_FACTOR),
        ];
        let contact = p.static_value(CONTACT_STIFFNESS_FACTOR);

        let area = [0, 1].map(|i| Self::triangle(length, self.posterior_disp(i)).0);
        let pressure = flow_pressures(pressures, area);
        let force = [pressure[0] * length * thickness[0], pressure[1] * length * thickness[1]];

        let mut accel = [0.0; 2];
        for i in 0..2 {
            let d = self.posterior_disp(i);
            let mut spring = k[i] * self.x[i];
            let mut damping = 2.0 * zeta[i] * (m[i] * k[i]).sqrt();
            if d < 0.0 {
                spring += contact * k[i] * d;
                damping += 2.0 * (m[i] * k[i]).sqrt();
            }
            let coupling = kc * (self.x[i] - self.x[1 - i]);
            accel[i] = (force[i] - damping * self.v[i] - spring - coupling) / m[i];
        }

        for i in 0..2 {
            self.v[i] += accel[i] * dt;
            self.x[i] += self.v[i] * dt;
            if !self.x[i].is_finite() || !self.v[i].is_finite() {
                self.x[i] = 0.0;
                self.v[i] = 0.0;
            }
            self.x[i] = self.x[i].clamp(-MAX_DISPLACEMENT_CM, MAX_DISPLACEMENT_CM);
        }
    }

    fn calc_geometry(&mut self) {
        let q = self.q();
        let length = self.current_length(q);
        let thickness = self.thickness(length);
        let ary = self.params.control(ARY_AREA).max(0.0);
        let d = [self.posterior_disp(0), self.posterior_disp(1)];
        let (open1, contact1) = Self::triangle(length, d[0]);
        let (open2, contact2) = Self::triangle(length, d[1]);
        let (x1, x2) = (self.x[0], self.x[1]);

        let p = &mut self.params;
        p.set_derived(CURRENT_LENGTH, length);
        p.set_derived(RELATIVE_DISP_1, x1);
        p.set_derived(RELATIVE_DISP_2, x2);
        p.set_derived(CURRENT_THICKNESS_1, thickness[0]);
        p.set_derived(CURRENT_THICKNESS_2, thickness[1]);
        p.set_derived(AREA_1, open1 + ary);
        p.set_derived(AREA_2, open2 + ary);
        p.set_derived(CONTACT_AREA, contact1.max(contact2));
    }

    fn tube_data(&self) -> ([f64; 2], [f64; 2]) {
        let p = &self.params;
        let inlet = p.static_value(INLET_LENGTH);
        let outlet = p.static_value(OUTLET_LENGTH);
        (
            [
                p.derived_params[CURRENT_THICKNESS_1].x + inlet,
                p.derived_params[CURRENT_THICKNESS_2].x + outlet,
            ],
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
    fn q_from_f0() {
        let mut g = TriangularGlottis::new();
        g.params.control_params[FREQUENCY].set(100.0);
        assert_abs_diff_eq!(g.q(), 1.0);
        g.params.control_params[FREQUENCY].set(200.0);
        assert_abs_diff_eq!(g.q(), 2.0);
    }

    #[test]
    fn rest_geometry() {
        let mut g = TriangularGlottis::new();
        g.params.control_params[FREQUENCY].set(100.0);
        g.calc_geometry();
        let (length, area) = g.tube_data();
        assert_abs_diff_eq!(area[0], 1.6 * 0.01, epsilon = 1.0e-12);
        assert_abs_diff_eq!(length[0], 0.8 * 0.45 + 0.05, epsilon = 1.0e-12);
    }

    #[test]
    fn pressed_folds_report_contact() {
        let mut g = TriangularGlottis::new();
        assert!(g.params.apply_shape("pressed"));
        g.calc_geometry();
        assert!(g.is_closed());
        assert!(g.params.derived_params[CONTACT_AREA].x > 0.0);
    }
}

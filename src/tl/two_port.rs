//! ABCD matrices of acoustic two-ports.
//!
//! Convention: `[p_in, u_in] = [[a, b], [c, d]] * [p_out, u_out]`.

use rustfft::num_complex::Complex64;

use crate::constants::{
    ADIABATIC_CONSTANT, AIR_VISCOSITY, AMBIENT_DENSITY, HEAT_CONDUCTION, RHO_C2, SOUND_VELOCITY,
    SPECIFIC_HEAT, WALL_MASS_CGS, WALL_RESISTANCE_CGS, WALL_STIFFNESS_CGS,
};
use crate::tube::{SINUSES, Section};

use super::{RadiationType, TlOptions};

const J: Complex64 = Complex64::new(0.0, 1.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoPort {
    pub a: Complex64,
    pub b: Complex64,
    pub c: Complex64,
    pub d: Complex64,
}

impl Default for TwoPort {
    fn default() -> Self {
        Self::identity()
    }
}

impl TwoPort {
    pub fn identity() -> Self {
        let one = Complex64::new(1.0, 0.0);
        let zero = Complex64::new(0.0, 0.0);
        Self {
            a: one,
            b: zero,
            c: zero,
            d: one,
        }
    }

    pub fn series_impedance(z: Complex64) -> Self {
        Self {
            b: z,
            ..Self::identity()
        }
    }

    pub fn shunt_admittance(y: Complex64) -> Self {
        Self {
            c: y,
            ..Self::identity()
        }
    }

    /// `self` followed by `next` in the direction of propagation.
    pub fn then(&self, next: &TwoPort) -> TwoPort {
        TwoPort {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
        }
    }

    /// Input state for a given output state.
    pub fn apply(&self, p_out: Complex64, u_out: Complex64) -> (Complex64, Complex64) {
        (self.a * p_out + self.b * u_out, self.c * p_out + self.d * u_out)
    }

    /// Admittance seen at the output when the input is terminated by `y_in`.
    pub fn output_admittance(&self, y_in: Complex64) -> Complex64 {
        (self.c + self.a * y_in) / (self.d + self.b * y_in)
    }
}

/// Series impedance and shunt admittance per unit length of a duct section.
fn line_constants(section: &Section, omega: f64, options: &TlOptions) -> (Complex64, Complex64) {
    let area = section.safe_area();
    let circumference = 2.0 * (std::f64::consts::PI * area).sqrt();

    let mut resistance = 0.0;
    if options.hagen_resistance {
        resistance += 8.0 * std::f64::consts::PI * AIR_VISCOSITY / (area * area);
    }
    if options.boundary_layer {
        resistance += circumference / (area * area) * (omega * AMBIENT_DENSITY * AIR_VISCOSITY / 2.0).sqrt();
    }
    let z = Complex64::new(resistance, omega * AMBIENT_DENSITY / area);

    let mut y = Complex64::new(0.0, omega * area / RHO_C2);
    if options.heat_conduction {
        let diffusivity = HEAT_CONDUCTION / (SPECIFIC_HEAT * AMBIENT_DENSITY);
        y += circumference * (ADIABATIC_CONSTANT - 1.0) / RHO_C2 * (diffusivity * omega / 2.0).sqrt();
    }
    if options.soft_walls && section.soft_wall {
        let wall = J * omega * WALL_MASS_CGS + WALL_RESISTANCE_CGS + WALL_STIFFNESS_CGS / (J * omega);
        y += circumference / wall;
    }
    (z, y)
}

/// Two-port of one section at angular frequency `omega`.
pub fn section_matrix(section: &Section, omega: f64, options: &TlOptions) -> TwoPort {
    let (z, y) = line_constants(section, omega, options);
    let l = section.length_cm;
    if options.lumped_elements {
        let zl = z * l;
        let yl = y * l;
        let a = 1.0 + zl * yl / 2.0;
        TwoPort {
            a,
            b: zl * (1.0 + zl * yl / 4.0),
            c: yl,
            d: a,
        }
    } else {
        let gamma = (z * y).sqrt();
        let zc = (z / y).sqrt();
        let gl = gamma * l;
        let (cosh, sinh) = (gl.cosh(), gl.sinh());
        TwoPort {
            a: cosh,
            b: zc * sinh,
            c: sinh / zc,
            d: cosh,
        }
    }
}

/// Extra inertance of the flow contraction between two sections.
pub fn length_correction(from: &Section, to: &Section, omega: f64) -> TwoPort {
    let small = from.safe_area().min(to.safe_area());
    let large = from.safe_area().max(to.safe_area());
    let radius = (small / std::f64::consts::PI).sqrt();
    let inertance = AMBIENT_DENSITY * 0.8 * radius * (1.0 - (small / large).sqrt()) / small;
    TwoPort::series_impedance(J * omega * inertance)
}

/// Helmholtz resonator admittance of sinus `k`.
pub fn sinus_admittance(k: usize, omega: f64) -> Complex64 {
    let sinus = &SINUSES[k];
    let area = sinus.neck_area_cm2;
    let neck = Complex64::new(
        8.0 * std::f64::consts::PI * AIR_VISCOSITY * sinus.neck_length_cm / (area * area),
        omega * AMBIENT_DENSITY * sinus.neck_length_cm / area,
    );
    let cavity = RHO_C2 / (J * omega * sinus.volume_cm3);
    1.0 / (neck + cavity)
}

/// Radiation impedance of an opening of `area` (cm^2).
pub fn radiation_impedance(radiation: RadiationType, area: f64, omega: f64) -> Complex64 {
    let z0 = AMBIENT_DENSITY * SOUND_VELOCITY / area;
    let radius = (area / std::f64::consts::PI).sqrt();
    let ka = omega / SOUND_VELOCITY * radius;
    match radiation {
        RadiationType::NoRadiation => Complex64::new(0.0, 0.0),
        RadiationType::PistonInWall => {
            let r = 0.5 * ka * ka;
            Complex64::new(r / (1.0 + r), 8.0 * ka / (3.0 * std::f64::consts::PI) / (1.0 + r)) * z0
        }
        RadiationType::PistonInSphere => {
            let r = 0.25 * ka * ka;
            Complex64::new(r / (1.0 + r), 0.6 * ka / (1.0 + r)) * z0
        }
        RadiationType::ParallelRadiation => {
            let pi = std::f64::consts::PI;
            let r = 128.0 * z0 / (9.0 * pi * pi);
            let l = 8.0 * AMBIENT_DENSITY / (3.0 * pi * (pi * area).sqrt());
            let jwl = J * omega * l;
            r * jwl / (r + jwl)
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::tube::{FIRST_PHARYNX_SECTION, Tube};

    #[test]
    fn lossless_section_is_reciprocal() {
        let tube = Tube::new();
        let options = TlOptions {
            boundary_layer: false,
            hagen_resistance: false,
            heat_conduction: false,
            soft_walls: false,
            ..Default::default()
        };
        let m = section_matrix(tube.section(FIRST_PHARYNX_SECTION), 2.0 * std::f64::consts::PI * 1000.0, &options);
        let det = m.a * m.d - m.b * m.c;
        assert_relative_eq!(det.re, 1.0, epsilon = 1.0e-9);
        assert!(det.im.abs() < 1.0e-9);
    }

    #[test]
    fn chaining_is_associative_with_identity() {
        let tube = Tube::new();
        let options = TlOptions::default();
        let m = section_matrix(tube.section(FIRST_PHARYNX_SECTION), 3000.0, &options);
        let chained = TwoPort::identity().then(&m);
        assert_eq!(chained, m);
    }

    #[test]
    fn radiation_grows_with_frequency() {
        for kind in [
            RadiationType::PistonInWall,
            RadiationType::PistonInSphere,
            RadiationType::ParallelRadiation,
        ] {
            let low = radiation_impedance(kind, 3.0, 2.0 * std::f64::consts::PI * 100.0);
            let high = radiation_impedance(kind, 3.0, 2.0 * std::f64::consts::PI * 4000.0);
            assert!(high.re > low.re, "{kind:?}");
        }
        assert_eq!(radiation_impedance(RadiationType::NoRadiation, 3.0, 100.0).norm(), 0.0);
    }
}

//! Frequency-domain transmission-line model of a static tube.
//!
//! Every section becomes a lossy two-port; the nasal cavity, the piriform
//! fossa and the paranasal sinuses enter the main path as shunt admittances.

use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::constants::{AMBIENT_DENSITY, RADIATION_DISTANCE_CM, SAMPLING_RATE, SOUND_VELOCITY, TWO_PI};
use crate::signal::ComplexSignal;
use crate::tube::{
    FIRST_FOSSA_SECTION, FIRST_NOSE_SECTION, FIRST_PHARYNX_SECTION, FOSSA_COUPLING_SECTION,
    LAST_FOSSA_SECTION, LAST_MOUTH_SECTION, LAST_NOSE_SECTION, NOSE_COUPLING_SECTION, SINUSES,
    Tube,
};

mod formants;
pub mod two_port;

pub use self::formants::{Formant, FormantResult};
use self::two_port::{
    TwoPort, length_correction, radiation_impedance, section_matrix, sinus_admittance,
};

/// Lowest frequency evaluated; the DC bin uses this instead of 0 Hz.
const MIN_FREQUENCY_HZ: f64 = 1.0;
/// Velum openings below this are treated as closed (cm^2)
const CLOSED_PORT_AREA_CM2: f64 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RadiationType {
    NoRadiation,
    PistonInSphere,
    PistonInWall,
    #[default]
    ParallelRadiation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlOptions {
    pub radiation: RadiationType,
    pub boundary_layer: bool,
    pub heat_conduction: bool,
    pub soft_walls: bool,
    pub hagen_resistance: bool,
    pub inner_length_corrections: bool,
    /// Lumped T-networks instead of exact hyperbolic line sections
    pub lumped_elements: bool,
    pub paranasal_sinuses: bool,
    pub piriform_fossa: bool,
    /// Kinetic pressure drops; linear analysis ignores them, the TDS adopts the flag
    pub static_pressure_drops: bool,
}

impl Default for TlOptions {
    fn default() -> Self {
        Self {
            radiation: RadiationType::ParallelRadiation,
            boundary_layer: true,
            heat_conduction: false,
            soft_walls: true,
            hagen_resistance: false,
            inner_length_corrections: false,
            lumped_elements: true,
            paranasal_sinuses: true,
            piriform_fossa: true,
            static_pressure_drops: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectrumType {
    /// Pressure at the radiation distance per radiated volume flow
    Radiation,
    /// Radiated volume flow per volume flow injected at a section
    FlowSourceTf,
    /// Radiated volume flow per series pressure source at a section
    PressureSourceTf,
    /// Impedance looking from a section towards the lips
    InputImpedance,
    /// Impedance looking into the mouth from outside, source side closed
    OutputImpedance,
}

/// Acoustic state at one point of the main path, all relative to unit mouth flow.
#[derive(Debug, Clone, Copy)]
struct PathState {
    pressure: Complex64,
    flow: Complex64,
    /// Flow leaving through the nostrils
    nostril_flow: Complex64,
}

#[derive(Debug, Clone, Default)]
pub struct TlModel {
    tube: Tube,
    pub options: TlOptions,
}

impl TlModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tube(&self) -> &Tube {
        &self.tube
    }

    pub fn set_tube(&mut self, tube: &Tube) {
        self.tube = tube.clone();
    }

    fn section_two_port(&self, index: usize, omega: f64) -> TwoPort {
        section_matrix(self.tube.section(index), omega, &self.options)
    }

    fn velum_open(&self) -> bool {
        self.tube.section(FIRST_NOSE_SECTION).area_cm2 >= CLOSED_PORT_AREA_CM2
    }

    /// Chain of the nasal cavity from the velum to the nostrils, with the sinuses.
    fn nose_chain(&self, omega: f64) -> TwoPort {
        let mut chain = TwoPort::identity();
        for i in FIRST_NOSE_SECTION..=LAST_NOSE_SECTION {
            chain = chain.then(&self.section_two_port(i, omega));
            if self.options.paranasal_sinuses {
                for (k, sinus) in SINUSES.iter().enumerate() {
                    if sinus.coupling_section == i {
                        chain = chain.then(&TwoPort::shunt_admittance(sinus_admittance(k, omega)));
                    }
                }
            }
        }
        chain
    }

    /// Admittance into the nasal cavity at the coupling point, and the ratio of
    /// nostril flow to that inflow.
    fn nose_load(&self, omega: f64) -> (Complex64, Complex64) {
        if !self.velum_open() {
            return (Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0));
        }
        let chain = self.nose_chain(omega);
        let z_rad = radiation_impedance(
            self.options.radiation,
            self.tube.section(LAST_NOSE_SECTION).safe_area(),
            omega,
        );
        let (p_in, u_in) = chain.apply(z_rad, Complex64::new(1.0, 0.0));
        (u_in / p_in, 1.0 / u_in)
    }

    /// Admittance of the closed-ended piriform fossa at its coupling point.
    fn fossa_admittance(&self, omega: f64) -> Complex64 {
        let mut y = Complex64::new(0.0, 0.0);
        for i in (FIRST_FOSSA_SECTION..=LAST_FOSSA_SECTION).rev() {
            y = self.section_two_port(i, omega).output_admittance(y);
        }
        y
    }

    /// Walk from the lips back to the inlet of `section`.
    fn path_state(&self, section: usize, omega: f64) -> PathState {
        let mouth_area = self.tube.section(LAST_MOUTH_SECTION).safe_area();
        let (nose_y, nose_tf) = self.nose_load(omega);
        let fossa_y = if self.options.piriform_fossa {
            self.fossa_admittance(omega)
        } else {
            Complex64::new(0.0, 0.0)
        };

        let mut state = PathState {
            pressure: radiation_impedance(self.options.radiation, mouth_area, omega),
            flow: Complex64::new(1.0, 0.0),
            nostril_flow: Complex64::new(0.0, 0.0),
        };
        for i in (section..=LAST_MOUTH_SECTION).rev() {
            if i == NOSE_COUPLING_SECTION {
                let into_nose = state.pressure * nose_y;
                state.flow += into_nose;
                state.nostril_flow += into_nose * nose_tf;
            }
            if i == FOSSA_COUPLING_SECTION {
                state.flow += state.pressure * fossa_y;
            }
            let (p, u) = self.section_two_port(i, omega).apply(state.pressure, state.flow);
            state.pressure = p;
            state.flow = u;
            if self.options.inner_length_corrections && i > section {
                let (p, u) = length_correction(self.tube.section(i - 1), self.tube.section(i), omega)
                    .apply(state.pressure, state.flow);
                state.pressure = p;
                state.flow = u;
            }
        }
        state
    }

    /// Impedance looking from the inlet of `section` towards the lungs.
    /// The bronchi end in their characteristic impedance.
    fn backward_impedance(&self, section: usize, omega: f64) -> Complex64 {
        let lung_area = self.tube.section(0).safe_area();
        let mut y = Complex64::new(lung_area / (AMBIENT_DENSITY * SOUND_VELOCITY), 0.0);
        for i in 0..section {
            y = self.section_two_port(i, omega).output_admittance(y);
        }
        1.0 / y
    }

    /// Impedance at the lips looking inwards; the tract is closed at the inlet of `section`.
    fn output_impedance(&self, section: usize, omega: f64) -> Complex64 {
        let (nose_y, _) = self.nose_load(omega);
        let mut y = Complex64::new(0.0, 0.0);
        for i in section..=LAST_MOUTH_SECTION {
            y = self.section_two_port(i, omega).output_admittance(y);
            if i == NOSE_COUPLING_SECTION {
                y += nose_y;
            }
            if i == FOSSA_COUPLING_SECTION && self.options.piriform_fossa {
                y += self.fossa_admittance(omega);
            }
        }
        1.0 / y
    }

    /// Radiated flow (mouth plus nostrils) per unit flow injected at the inlet of `section`.
    pub fn flow_source_tf(&self, section: usize, frequency_hz: f64) -> Complex64 {
        let omega = TWO_PI * frequency_hz.max(MIN_FREQUENCY_HZ);
        let state = self.path_state(section, omega);
        (1.0 + state.nostril_flow) / state.flow
    }

    /// Value of one spectrum type at one frequency.
    pub fn spectrum_value(&self, kind: SpectrumType, section: usize, frequency_hz: f64) -> Complex64 {
        let omega = TWO_PI * frequency_hz.max(MIN_FREQUENCY_HZ);
        let section = section.min(LAST_MOUTH_SECTION);
        match kind {
            SpectrumType::Radiation => {
                let k = omega / SOUND_VELOCITY;
                Complex64::new(0.0, omega * AMBIENT_DENSITY / (2.0 * TWO_PI * RADIATION_DISTANCE_CM))
                    * Complex64::from_polar(1.0, -k * RADIATION_DISTANCE_CM)
            }
            SpectrumType::FlowSourceTf => self.flow_source_tf(section, frequency_hz),
            SpectrumType::PressureSourceTf => {
                let state = self.path_state(section, omega);
                let z_forward = state.pressure / state.flow;
                let z_total = z_forward + self.backward_impedance(section, omega);
                (1.0 + state.nostril_flow) / state.flow / z_total
            }
            SpectrumType::InputImpedance => {
                let state = self.path_state(section, omega);
                state.pressure / state.flow
            }
            SpectrumType::OutputImpedance => self.output_impedance(section, omega),
        }
    }

    /// Fill `spectrum` with `len` bins of a conjugate-symmetric spectrum.
    /// `section` is ignored for [`SpectrumType::Radiation`].
    pub fn spectrum(&self, kind: SpectrumType, spectrum: &mut ComplexSignal, len: usize, section: usize) {
        spectrum.reset(len);
        if len == 0 {
            return;
        }
        let df = SAMPLING_RATE as f64 / len as f64;
        for k in 0..=len / 2 {
            let value = self.spectrum_value(kind, section, k as f64 * df);
            spectrum.set(k, value);
            if k > 0 && k < len - k {
                spectrum.set(len - k, value.conj());
            }
        }
    }
}

/// Section index used as the source of the vocal tract transfer function.
pub const TRANSFER_FUNCTION_SECTION: usize = FIRST_PHARYNX_SECTION;

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::tube::{NUM_PHARYNX_MOUTH_SECTIONS, UPPER_GLOTTIS_SECTION};

    fn uniform_tube(length_cm: f64, area_cm2: f64) -> Tube {
        let mut tube = Tube::new();
        let lengths = vec![length_cm / NUM_PHARYNX_MOUTH_SECTIONS as f64; NUM_PHARYNX_MOUTH_SECTIONS];
        let areas = vec![area_cm2; NUM_PHARYNX_MOUTH_SECTIONS];
        tube.set_pharynx_mouth_geometry(&lengths, &areas, &[Default::default(); 40], length_cm - 1.0, 0.0)
            .unwrap();
        tube
    }

    #[test]
    fn uniform_tube_resonates_at_odd_quarter_wavelengths() {
        let mut tl = TlModel::new();
        tl.options.radiation = RadiationType::NoRadiation;
        tl.options.soft_walls = false;
        tl.options.piriform_fossa = false;
        tl.set_tube(&uniform_tube(17.5, 4.0));
        let result = tl.formants(3);
        assert_eq!(result.formants.len(), 3);
        for (n, f) in result.formants.iter().enumerate() {
            let expected = (2 * n + 1) as f64 * SOUND_VELOCITY / (4.0 * 17.5);
            assert_relative_eq!(f.freq, expected, max_relative = 0.06);
            assert!(f.bw > 0.0);
        }
        assert!(!result.is_nasal);
        assert!(!result.is_closure);
    }

    #[test]
    fn spectrum_is_conjugate_symmetric() {
        let mut tl = TlModel::new();
        tl.set_tube(&uniform_tube(17.0, 3.0));
        let mut s = ComplexSignal::new(256);
        tl.spectrum(SpectrumType::FlowSourceTf, &mut s, 256, FIRST_PHARYNX_SECTION);
        for k in 1..128 {
            assert_eq!(s.re[k], s.re[256 - k]);
            assert_eq!(s.im[k], -s.im[256 - k]);
        }
        // Flow is conserved at very low frequencies
        assert_relative_eq!(s.magnitude(0), 1.0, max_relative = 0.05);
    }

    #[test]
    fn open_velum_is_nasal() {
        let mut tl = TlModel::new();
        let mut tube = uniform_tube(17.0, 3.0);
        tube.set_velum_opening(0.5);
        tl.set_tube(&tube);
        assert!(tl.formants(4).is_nasal);
    }

    #[test]
    fn impedances_are_finite() {
        let tl = TlModel::new();
        for kind in [
            SpectrumType::Radiation,
            SpectrumType::PressureSourceTf,
            SpectrumType::InputImpedance,
            SpectrumType::OutputImpedance,
        ] {
            for f in [0.0, 500.0, 5000.0] {
                let v = tl.spectrum_value(kind, UPPER_GLOTTIS_SECTION + 1, f);
                assert!(v.re.is_finite() && v.im.is_finite(), "{kind:?} at {f}");
            }
        }
    }
}

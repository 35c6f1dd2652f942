//! Branched, piecewise cylindrical duct network of the vocal system.
//!
//! Index layout (fixed for the lifetime of the program):
//!
//! ```text
//! lungs -> trachea (23) -> lower glottis -> upper glottis -> pharynx/mouth (40) -> lips
//!                                                              |       |
//!                                           piriform fossa (5) +       + nose (19) -> nostrils
//!                                                                          |
//!                                                                    sinuses (4)
//! ```

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::constants::{
    MIN_AREA_CM2, MIN_LENGTH_CM, WALL_MASS_CGS, WALL_RESISTANCE_CGS, WALL_STIFFNESS_CGS,
};

pub const NUM_TRACHEA_SECTIONS: usize = 23;
pub const NUM_GLOTTIS_SECTIONS: usize = 2;
pub const NUM_PHARYNX_MOUTH_SECTIONS: usize = 40;
pub const NUM_NOSE_SECTIONS: usize = 19;
pub const NUM_FOSSA_SECTIONS: usize = 5;
pub const NUM_SINUS_SECTIONS: usize = 4;

pub const FIRST_TRACHEA_SECTION: usize = 0;
pub const LAST_TRACHEA_SECTION: usize = FIRST_TRACHEA_SECTION + NUM_TRACHEA_SECTIONS - 1;
pub const LOWER_GLOTTIS_SECTION: usize = LAST_TRACHEA_SECTION + 1;
pub const UPPER_GLOTTIS_SECTION: usize = LOWER_GLOTTIS_SECTION + 1;
pub const FIRST_PHARYNX_SECTION: usize = UPPER_GLOTTIS_SECTION + 1;
pub const LAST_MOUTH_SECTION: usize = FIRST_PHARYNX_SECTION + NUM_PHARYNX_MOUTH_SECTIONS - 1;
pub const FIRST_NOSE_SECTION: usize = LAST_MOUTH_SECTION + 1;
pub const LAST_NOSE_SECTION: usize = FIRST_NOSE_SECTION + NUM_NOSE_SECTIONS - 1;
pub const FIRST_FOSSA_SECTION: usize = LAST_NOSE_SECTION + 1;
pub const LAST_FOSSA_SECTION: usize = FIRST_FOSSA_SECTION + NUM_FOSSA_SECTIONS - 1;
pub const FIRST_SINUS_SECTION: usize = LAST_FOSSA_SECTION + 1;
pub const NUM_SECTIONS: usize = FIRST_SINUS_SECTION + NUM_SINUS_SECTIONS;

/// Pharynx section the velopharyngeal port opens from
pub const NOSE_COUPLING_SECTION: usize = FIRST_PHARYNX_SECTION + 16;
/// Pharynx section the piriform fossa opens from
pub const FOSSA_COUPLING_SECTION: usize = FIRST_PHARYNX_SECTION + 1;

pub const TRACHEA_RANGE: Range<usize> = FIRST_TRACHEA_SECTION..LAST_TRACHEA_SECTION + 1;
pub const PHARYNX_MOUTH_RANGE: Range<usize> = FIRST_PHARYNX_SECTION..LAST_MOUTH_SECTION + 1;
pub const NOSE_RANGE: Range<usize> = FIRST_NOSE_SECTION..LAST_NOSE_SECTION + 1;
pub const FOSSA_RANGE: Range<usize> = FIRST_FOSSA_SECTION..LAST_FOSSA_SECTION + 1;
pub const SINUS_RANGE: Range<usize> = FIRST_SINUS_SECTION..NUM_SECTIONS;

/// A paranasal sinus: Helmholtz resonator hanging off one nose section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinusSpec {
    /// Nose section the neck opens into
    pub coupling_section: usize,
    pub volume_cm3: f64,
    pub neck_area_cm2: f64,
    pub neck_length_cm: f64,
}

pub const SINUSES: [SinusSpec; NUM_SINUS_SECTIONS] = [
    // Sphenoidal
    SinusSpec {
        coupling_section: FIRST_NOSE_SECTION + 3,
        volume_cm3: 7.0,
        neck_area_cm2: 0.05,
        neck_length_cm: 0.5,
    },
    // Frontal
    SinusSpec {
        coupling_section: FIRST_NOSE_SECTION + 7,
        volume_cm3: 7.0,
        neck_area_cm2: 0.05,
        neck_length_cm: 1.0,
    },
    // Maxillary
    SinusSpec {
        coupling_section: FIRST_NOSE_SECTION + 10,
        volume_cm3: 22.0,
        neck_area_cm2: 0.1,
        neck_length_cm: 0.5,
    },
    // Ethmoidal
    SinusSpec {
        coupling_section: FIRST_NOSE_SECTION + 14,
        volume_cm3: 2.0,
        neck_area_cm2: 0.2,
        neck_length_cm: 0.3,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Articulator {
    VocalFolds,
    Tongue,
    LowerIncisors,
    LowerLip,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionType {
    Trachea,
    LowerGlottis,
    UpperGlottis,
    PharynxMouth,
    Nose,
    Fossa,
    Sinus,
}

impl SectionType {
    pub fn of(index: usize) -> Self {
        match index {
            i if i <= LAST_TRACHEA_SECTION => Self::Trachea,
            LOWER_GLOTTIS_SECTION => Self::LowerGlottis,
            UPPER_GLOTTIS_SECTION => Self::UpperGlottis,
            i if i <= LAST_MOUTH_SECTION => Self::PharynxMouth,
            i if i <= LAST_NOSE_SECTION => Self::Nose,
            i if i <= LAST_FOSSA_SECTION => Self::Fossa,
            _ => Self::Sinus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Position of the section entrance along its branch (cm)
    pub pos_cm: f64,
    pub length_cm: f64,
    pub area_cm2: f64,
    pub volume_cm3: f64,
    pub articulator: Articulator,
    pub section_type: SectionType,
    /// Whether the walls of this section yield to the pressure
    pub soft_wall: bool,
    /// Wall mass (g)
    pub wall_mass_cgs: f64,
    /// Wall resistance (dyn*s/cm)
    pub wall_resistance_cgs: f64,
    /// Wall stiffness (dyn/cm)
    pub wall_stiffness_cgs: f64,
}

impl Section {
    fn new(section_type: SectionType, length_cm: f64, area_cm2: f64) -> Self {
        let mut s = Self {
            pos_cm: 0.0,
            length_cm,
            area_cm2,
            volume_cm3: 0.0,
            articulator: Articulator::Other,
            section_type,
            soft_wall: !matches!(section_type, SectionType::Trachea | SectionType::Sinus),
            wall_mass_cgs: 0.0,
            wall_resistance_cgs: 0.0,
            wall_stiffness_cgs: 0.0,
        };
        s.update_derived();
        s
    }

    /// Clamp geometry, then recompute volume and the wall constants, which
    /// scale with the wall surface (circumference x length).
    fn update_derived(&mut self) {
        if !self.area_cm2.is_finite() || self.area_cm2 < 0.0 {
            self.area_cm2 = 0.0;
        }
        if !self.length_cm.is_finite() || self.length_cm < MIN_LENGTH_CM {
            self.length_cm = MIN_LENGTH_CM;
        }
        self.volume_cm3 = self.area_cm2 * self.length_cm;
        let surface = 2.0 * (std::f64::consts::PI * self.area_cm2.max(MIN_AREA_CM2)).sqrt() * self.length_cm;
        self.wall_mass_cgs = WALL_MASS_CGS * surface;
        self.wall_resistance_cgs = WALL_RESISTANCE_CGS * surface;
        self.wall_stiffness_cgs = WALL_STIFFNESS_CGS * surface;
    }

    /// Area clamped to the numerical floor, for use as a divisor
    #[inline(always)]
    pub fn safe_area(&self) -> f64 {
        self.area_cm2.max(MIN_AREA_CM2)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TubeError {
    #[error("Expected {expected} values for {what}, got {got}")]
    WrongLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),
}

/// Complete geometry snapshot of the duct network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tube {
    sections: Vec<Section>,
    /// Position of the incisors along the pharynx/mouth branch (cm)
    pub teeth_position_cm: f64,
    /// Lateral elevation of the tongue tip, 0..1
    pub tongue_tip_side_elevation: f64,
    /// Area of the velopharyngeal port (cm^2)
    pub velum_opening_cm2: f64,
    /// Strength of glottal aspiration noise (dB)
    pub aspiration_strength_db: f64,
}

impl Default for Tube {
    fn default() -> Self {
        Self::new()
    }
}

/// Nasal cavity of an adult male, area per section (cm^2)
const STANDARD_NOSE_AREAS: [f64; NUM_NOSE_SECTIONS] = [
    0.0, 1.2, 1.6, 2.0, 2.4, 2.8, 3.0, 3.2, 3.4, 3.4, 3.3, 3.2, 3.0, 2.8, 2.5, 2.1, 1.7, 1.4, 1.2,
];
const NOSE_LENGTH_CM: f64 = 11.4;

/// Piriform fossa, closed at the far end
const STANDARD_FOSSA_AREAS: [f64; NUM_FOSSA_SECTIONS] = [1.5, 1.5, 1.2, 0.9, 0.5];
const FOSSA_LENGTH_CM: f64 = 2.5;

const TRACHEA_LENGTH_CM: f64 = 23.0;
const TRACHEA_AREA_CM2: f64 = 2.5;
const BRONCHI_AREA_CM2: f64 = 5.0;

impl Tube {
    /// Standard adult anatomy: neutral 17 cm vocal tract, closed glottis, closed velum.
    pub fn new() -> Self {
        let mut sections = Vec::with_capacity(NUM_SECTIONS);
        for i in 0..NUM_SECTIONS {
            let t = SectionType::of(i);
            let section = match t {
                SectionType::Trachea => {
                    // The lowest sections widen towards the bronchi
                    let k = i - FIRST_TRACHEA_SECTION;
                    let area = if k < 4 {
                        BRONCHI_AREA_CM2 - (BRONCHI_AREA_CM2 - TRACHEA_AREA_CM2) * k as f64 / 4.0
                    } else {
                        TRACHEA_AREA_CM2
                    };
                    Section::new(t, TRACHEA_LENGTH_CM / NUM_TRACHEA_SECTIONS as f64, area)
                }
                SectionType::LowerGlottis | SectionType::UpperGlottis => Section::new(t, 0.15, 0.0),
                SectionType::PharynxMouth => {
                    Section::new(t, 17.0 / NUM_PHARYNX_MOUTH_SECTIONS as f64, 3.0)
                }
                SectionType::Nose => Section::new(
                    t,
                    NOSE_LENGTH_CM / NUM_NOSE_SECTIONS as f64,
                    STANDARD_NOSE_AREAS[i - FIRST_NOSE_SECTION],
                ),
                SectionType::Fossa => Section::new(
                    t,
                    FOSSA_LENGTH_CM / NUM_FOSSA_SECTIONS as f64,
                    STANDARD_FOSSA_AREAS[i - FIRST_FOSSA_SECTION],
                ),
                SectionType::Sinus => {
                    let sinus = &SINUSES[i - FIRST_SINUS_SECTION];
                    let length = 2.0;
                    Section::new(t, length, sinus.volume_cm3 / length)
                }
            };
            sections.push(section);
        }
        sections[LOWER_GLOTTIS_SECTION].articulator = Articulator::VocalFolds;
        sections[UPPER_GLOTTIS_SECTION].articulator = Articulator::VocalFolds;

        let mut tube = Self {
            sections,
            teeth_position_cm: 15.5,
            tongue_tip_side_elevation: 0.0,
            velum_opening_cm2: 0.0,
            aspiration_strength_db: -40.0,
        };
        tube.calc_positions();
        tube
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> &Section {
        &self.sections[index]
    }

    pub fn section_mut(&mut self, index: usize) -> &mut Section {
        &mut self.sections[index]
    }

    fn check(what: &'static str, values: &[f64], expected: usize) -> Result<(), TubeError> {
        if values.len() != expected {
            return Err(TubeError::WrongLength {
                what,
                expected,
                got: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(TubeError::NonFinite(what));
        }
        Ok(())
    }

    /// Set the main supraglottal branch.
    pub fn set_pharynx_mouth_geometry(
        &mut self,
        length_cm: &[f64],
        area_cm2: &[f64],
        articulator: &[Articulator],
        teeth_position_cm: f64,
        tongue_tip_side_elevation: f64,
    ) -> Result<(), TubeError> {
        Self::check("pharynx/mouth lengths", length_cm, NUM_PHARYNX_MOUTH_SECTIONS)?;
        Self::check("pharynx/mouth areas", area_cm2, NUM_PHARYNX_MOUTH_SECTIONS)?;
        if articulator.len() != NUM_PHARYNX_MOUTH_SECTIONS {
            return Err(TubeError::WrongLength {
                what: "pharynx/mouth articulators",
                expected: NUM_PHARYNX_MOUTH_SECTIONS,
                got: articulator.len(),
            });
        }
        for (k, s) in self.sections[PHARYNX_MOUTH_RANGE].iter_mut().enumerate() {
            s.length_cm = length_cm[k];
            s.area_cm2 = area_cm2[k];
            s.articulator = articulator[k];
            s.update_derived();
        }
        self.teeth_position_cm = teeth_position_cm;
        self.tongue_tip_side_elevation = tongue_tip_side_elevation.clamp(0.0, 1.0);
        self.calc_positions();
        Ok(())
    }

    /// Set the two glottal sections from `[lower, upper]` lengths and areas.
    pub fn set_glottis_geometry(&mut self, length_cm: [f64; 2], area_cm2: [f64; 2]) {
        for (k, index) in [LOWER_GLOTTIS_SECTION, UPPER_GLOTTIS_SECTION].into_iter().enumerate() {
            let s = &mut self.sections[index];
            s.length_cm = length_cm[k];
            s.area_cm2 = area_cm2[k];
            s.update_derived();
        }
        self.calc_positions();
    }

    pub fn set_subglottal_geometry(&mut self, length_cm: &[f64], area_cm2: &[f64]) -> Result<(), TubeError> {
        Self::check("trachea lengths", length_cm, NUM_TRACHEA_SECTIONS)?;
        Self::check("trachea areas", area_cm2, NUM_TRACHEA_SECTIONS)?;
        for (k, s) in self.sections[TRACHEA_RANGE].iter_mut().enumerate() {
            s.length_cm = length_cm[k];
            s.area_cm2 = area_cm2[k];
            s.update_derived();
        }
        self.calc_positions();
        Ok(())
    }

    /// Set the nasal cavity. The first nose section is the velopharyngeal port,
    /// so its area is taken from `velum_opening_cm2`.
    pub fn set_nasal_cavity_geometry(
        &mut self,
        length_cm: &[f64],
        area_cm2: &[f64],
        velum_opening_cm2: f64,
    ) -> Result<(), TubeError> {
        Self::check("nose lengths", length_cm, NUM_NOSE_SECTIONS)?;
        Self::check("nose areas", area_cm2, NUM_NOSE_SECTIONS)?;
        for (k, s) in self.sections[NOSE_RANGE].iter_mut().enumerate() {
            s.length_cm = length_cm[k];
            s.area_cm2 = area_cm2[k];
            s.update_derived();
        }
        self.set_velum_opening(velum_opening_cm2);
        Ok(())
    }

    pub fn set_velum_opening(&mut self, area_cm2: f64) {
        let area = if area_cm2.is_finite() { area_cm2.max(0.0) } else { 0.0 };
        self.velum_opening_cm2 = area;
        let port = &mut self.sections[FIRST_NOSE_SECTION];
        port.area_cm2 = area;
        port.update_derived();
    }

    pub fn set_fossa_geometry(&mut self, length_cm: &[f64], area_cm2: &[f64]) -> Result<(), TubeError> {
        Self::check("fossa lengths", length_cm, NUM_FOSSA_SECTIONS)?;
        Self::check("fossa areas", area_cm2, NUM_FOSSA_SECTIONS)?;
        for (k, s) in self.sections[FOSSA_RANGE].iter_mut().enumerate() {
            s.length_cm = length_cm[k];
            s.area_cm2 = area_cm2[k];
            s.update_derived();
        }
        self.calc_positions();
        Ok(())
    }

    /// Overwrite one section. Positions are not recomputed; call
    /// [`Tube::calc_positions`] after a batch of updates.
    pub fn set_section_geometry(&mut self, index: usize, length_cm: f64, area_cm2: f64) {
        let s = &mut self.sections[index];
        s.length_cm = length_cm;
        s.area_cm2 = area_cm2;
        s.update_derived();
    }

    pub fn set_aspiration_strength(&mut self, db: f64) {
        self.aspiration_strength_db = db.clamp(-40.0, 0.0);
    }

    /// Recompute entrance positions and volumes. Each branch starts counting at 0,
    /// except the trachea, which ends at the glottis (position 0).
    pub fn calc_positions(&mut self) {
        let mut pos = -self.sections[TRACHEA_RANGE].iter().map(|s| s.length_cm).sum::<f64>();
        for s in &mut self.sections[TRACHEA_RANGE] {
            s.pos_cm = pos;
            pos += s.length_cm;
        }
        for range in [
            LOWER_GLOTTIS_SECTION..FIRST_PHARYNX_SECTION,
            PHARYNX_MOUTH_RANGE,
            NOSE_RANGE,
            FOSSA_RANGE,
        ] {
            let mut pos = 0.0;
            for s in &mut self.sections[range] {
                s.pos_cm = pos;
                pos += s.length_cm;
                s.volume_cm3 = s.area_cm2 * s.length_cm;
            }
        }
    }

    /// Total length of the pharynx/mouth branch (cm)
    pub fn vocal_tract_length(&self) -> f64 {
        self.sections[PHARYNX_MOUTH_RANGE].iter().map(|s| s.length_cm).sum()
    }

    /// Smallest area in `range` and the section where it occurs.
    pub fn min_area(&self, range: Range<usize>) -> Option<(usize, f64)> {
        self.sections[range.clone()]
            .iter()
            .zip(range)
            .map(|(s, i)| (i, s.area_cm2))
            .fold(None, |acc, (i, a)| match acc {
                Some((_, best)) if best <= a => acc,
                _ => Some((i, a)),
            })
    }

    /// Linear interpolation `(1-ratio)*a + ratio*b` of lengths, areas and scalar values.
    /// Articulator tags come from whichever tube is closer.
    pub fn interpolate(a: &Tube, b: &Tube, ratio: f64) -> Tube {
        let r = ratio.clamp(0.0, 1.0);
        let lerp = |x: f64, y: f64| (1.0 - r) * x + r * y;
        let mut out = a.clone();
        for (k, s) in out.sections.iter_mut().enumerate() {
            let sb = &b.sections[k];
            s.length_cm = lerp(s.length_cm, sb.length_cm);
            s.area_cm2 = lerp(s.area_cm2, sb.area_cm2);
            if r >= 0.5 {
                s.articulator = sb.articulator;
            }
            s.update_derived();
        }
        out.teeth_position_cm = lerp(a.teeth_position_cm, b.teeth_position_cm);
        out.tongue_tip_side_elevation = lerp(a.tongue_tip_side_elevation, b.tongue_tip_side_elevation);
        out.velum_opening_cm2 = lerp(a.velum_opening_cm2, b.velum_opening_cm2);
        out.aspiration_strength_db = lerp(a.aspiration_strength_db, b.aspiration_strength_db);
        out.calc_positions();
        out
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn topology_constants() {
        assert_eq!(LOWER_GLOTTIS_SECTION, 23);
        assert_eq!(FIRST_PHARYNX_SECTION, 25);
        assert_eq!(FIRST_NOSE_SECTION, 65);
        assert_eq!(FIRST_FOSSA_SECTION, 84);
        assert_eq!(NUM_SECTIONS, 93);
        assert!(PHARYNX_MOUTH_RANGE.contains(&NOSE_COUPLING_SECTION));
        assert!(SINUSES.iter().all(|s| NOSE_RANGE.contains(&s.coupling_section)));
        for i in 0..NUM_SECTIONS {
            assert_eq!(Tube::new().section(i).section_type, SectionType::of(i));
        }
    }

    #[test]
    fn default_glottis_closed() {
        let tube = Tube::new();
        assert_eq!(tube.section(LOWER_GLOTTIS_SECTION).area_cm2, 0.0);
        assert_eq!(tube.section(UPPER_GLOTTIS_SECTION).area_cm2, 0.0);
        assert_abs_diff_eq!(tube.vocal_tract_length(), 17.0, epsilon = 1.0e-9);
        assert_abs_diff_eq!(tube.section(LAST_TRACHEA_SECTION).pos_cm, -TRACHEA_LENGTH_CM / 23.0, epsilon = 1.0e-9);
    }

    #[test]
    fn rejects_bad_input() {
        let mut tube = Tube::new();
        let err = tube.set_subglottal_geometry(&[1.0; 3], &[1.0; 23]).unwrap_err();
        assert!(matches!(err, TubeError::WrongLength { expected: 23, got: 3, .. }));
        let mut areas = [1.0; NUM_TRACHEA_SECTIONS];
        areas[2] = f64::NAN;
        assert!(tube.set_subglottal_geometry(&[1.0; 23], &areas).is_err());
    }

    #[test]
    fn negative_areas_clamped() {
        let mut tube = Tube::new();
        tube.set_glottis_geometry([0.3, 0.3], [-1.0, 0.1]);
        assert_eq!(tube.section(LOWER_GLOTTIS_SECTION).area_cm2, 0.0);
        assert_abs_diff_eq!(tube.section(UPPER_GLOTTIS_SECTION).volume_cm3, 0.03, epsilon = 1.0e-12);
    }

    #[test]
    fn interpolation_and_min_area() {
        let a = Tube::new();
        let mut b = Tube::new();
        let areas: Vec<f64> = (0..NUM_PHARYNX_MOUTH_SECTIONS).map(|k| 1.0 + k as f64 * 0.1).collect();
        let lengths = vec![0.4; NUM_PHARYNX_MOUTH_SECTIONS];
        b.set_pharynx_mouth_geometry(&lengths, &areas, &[Articulator::Tongue; 40], 14.0, 0.0)
            .unwrap();
        let mid = Tube::interpolate(&a, &b, 0.5);
        assert_abs_diff_eq!(mid.section(FIRST_PHARYNX_SECTION).area_cm2, 2.0, epsilon = 1.0e-12);
        assert_abs_diff_eq!(mid.teeth_position_cm, 14.75, epsilon = 1.0e-12);
        assert_eq!(b.min_area(PHARYNX_MOUTH_RANGE), Some((FIRST_PHARYNX_SECTION, 1.0)));
    }
}

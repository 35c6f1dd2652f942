use crate::param::Param;
use crate::tube::{Articulator, NUM_PHARYNX_MOUTH_SECTIONS, Tube, TubeError};

use super::{CrossSection, EmaPoint, TractShape, VocalTractModel};

pub const HX: usize = 0;
pub const HY: usize = 1;
pub const JX: usize = 2;
pub const JA: usize = 3;
pub const LP: usize = 4;
pub const LD: usize = 5;
pub const VS: usize = 6;
pub const VO: usize = 7;
pub const TCX: usize = 8;
pub const TCY: usize = 9;
pub const TTX: usize = 10;
pub const TTY: usize = 11;
pub const TBX: usize = 12;
pub const TBY: usize = 13;
pub const TRX: usize = 14;
pub const TRY: usize = 15;
pub const TS1: usize = 16;
pub const TS2: usize = 17;
pub const TS3: usize = 18;
pub const NUM_PARAMS: usize = 19;

const NUM_LIP_SECTIONS: usize = 3;
/// Velum port area at full opening (cm^2)
const MAX_VELUM_OPENING_CM2: f64 = 1.5;

fn gauss(x: f64, center: f64, width: f64) -> f64 {
    let d = (x - center) / width;
    (-d * d).exp()
}

fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Compact parametric area function model.
///
/// Each articulator contributes a smooth bump to a base area function along
/// the normalized tract axis; the lips form the last sections.
#[derive(Debug, Clone)]
pub struct AreaFunctionTract {
    params: Vec<Param>,
    shapes: Vec<TractShape>,
    cross_sections: Vec<CrossSection>,
    lengths: Vec<f64>,
    teeth_position_cm: f64,
    velum_opening_cm2: f64,
}

impl Default for AreaFunctionTract {
    fn default() -> Self {
        Self::new()
    }
}

impl AreaFunctionTract {
    pub fn new() -> Self {
        let params = vec![
            Param::new("Horizontal hyoid position", "HX", "cm", 0.0, 1.0, 1.0),
            Param::new("Vertical hyoid position", "HY", "cm", -6.0, -3.5, -4.75),
            Param::new("Horizontal jaw position", "JX", "cm", -0.5, 0.0, 0.0),
            Param::new("Jaw angle", "JA", "deg", -7.0, 0.0, -2.0),
            Param::new("Lip protrusion", "LP", "cm", -1.0, 1.0, -0.07),
            Param::new("Lip distance", "LD", "cm", -2.0, 4.0, 0.95),
            Param::new("Velum shape", "VS", "", 0.0, 1.0, 0.0),
            Param::new("Velic opening", "VO", "", -0.1, 1.0, -0.1),
            Param::new("Tongue body center X", "TCX", "cm", -3.0, 4.0, -0.4),
            Param::new("Tongue body center Y", "TCY", "cm", -3.0, 1.0, -1.46),
            Param::new("Tongue tip X", "TTX", "cm", 1.5, 5.5, 3.5),
            Param::new("Tongue tip Y", "TTY", "cm", -3.0, 2.5, -1.0),
            Param::new("Tongue blade X", "TBX", "cm", -3.0, 4.0, 2.0),
            Param::new("Tongue blade Y", "TBY", "cm", -3.0, 5.0, 0.5),
            Param::new("Tongue root X", "TRX", "cm", -4.0, 2.0, 0.0),
            Param::new("Tongue root Y", "TRY", "cm", -6.0, 0.0, 0.0),
            Param::new("Tongue side elevation 1", "TS1", "cm", -1.0, 1.0, 0.0),
            Param::new("Tongue side elevation 2", "TS2", "cm", -1.0, 1.0, 0.0),
            Param::new("Tongue side elevation 3", "TS3", "cm", -1.0, 1.0, 0.0),
        ];

        let neutral: Vec<f64> = params.iter().map(|p| p.neutral).collect();
        let shape = |name: &str, changes: &[(usize, f64)]| {
            let mut values = neutral.clone();
            for &(i, x) in changes {
                values[i] = x;
            }
            TractShape {
                name: name.to_string(),
                params: values,
            }
        };
        let shapes = vec![
            shape(
                "a",
                &[(HX, 0.8), (JA, -6.0), (LD, 1.5), (TCX, -1.5), (TCY, -2.4), (TRX, -0.5)],
            ),
            shape(
                "i",
                &[(JA, -1.0), (LP, -0.3), (LD, 0.7), (TCX, 2.0), (TCY, -0.2), (TTY, -1.2), (TS2, 0.5)],
            ),
            shape("u", &[(JA, -1.5), (LP, 0.8), (LD, 0.3), (TCX, -1.0), (TCY, -0.6)]),
            shape("ll-labial-closure", &[(LD, -0.5)]),
            shape("tt-alveolar-closure", &[(TTX, 4.0), (TTY, 2.0), (TS3, 0.5)]),
            shape("tb-velar-closure", &[(TCX, 1.0), (TCY, 0.8), (TS2, 0.5)]),
        ];

        let mut tract = Self {
            params,
            shapes,
            cross_sections: Vec::with_capacity(NUM_PHARYNX_MOUTH_SECTIONS),
            lengths: Vec::with_capacity(NUM_PHARYNX_MOUTH_SECTIONS),
            teeth_position_cm: 0.0,
            velum_opening_cm2: 0.0,
        };
        tract.calculate_all();
        tract
    }

    fn value(&self, i: usize) -> f64 {
        self.params[i].x
    }

    /// Area of the tract in front of the lips, where `x` is the normalized position.
    fn oral_area(&self, x: f64) -> f64 {
        let v = |i| self.value(i);

        let base = 2.2 + 0.6 * gauss(x, 0.55, 0.25);
        let jaw = -v(JA) * 0.3 * smoothstep(0.55, 0.95, x);
        let hyoid = (v(HX) - 0.5) * 1.2 * gauss(x, 0.12, 0.08);
        let root = v(TRX) * 0.5 * gauss(x, 0.22, 0.1) + v(TRY) * 0.1 * gauss(x, 0.3, 0.1);

        let body_center = 0.5 + 0.06 * v(TCX) + 0.03 * v(JX);
        let raise = v(TCY) + 1.46;
        let body = -1.4 * raise * gauss(x, body_center, 0.11) + 0.7 * raise * gauss(x, body_center - 0.3, 0.1);
        let blade = -0.6 * (v(TBY) - 0.5) * gauss(x, 0.68 + 0.04 * v(TBX), 0.06);
        let tip = -1.3 * (v(TTY) + 1.0) * gauss(x, 0.84 + 0.02 * (v(TTX) - 3.5), 0.045);
        let velum = -0.4 * v(VS) * gauss(x, 0.42, 0.05);

        let sides = 1.0
            - 0.12
                * (v(TS1) * gauss(x, 0.55, 0.08) + v(TS2) * gauss(x, 0.68, 0.08) + v(TS3) * gauss(x, 0.82, 0.06));

        ((base + jaw + hyoid + root + body + blade + tip + velum) * sides).max(0.0)
    }
}

impl VocalTractModel for AreaFunctionTract {
    fn params(&self) -> &[Param] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Param] {
        &mut self.params
    }

    fn calculate_all(&mut self) {
        let lip_length = (1.0 + 0.5 * self.value(LP)).max(0.2);
        let inner_length = 13.5 - 0.5 * self.value(HY) + 0.3 * self.value(JX);
        let total = inner_length + lip_length;
        let num_inner = NUM_PHARYNX_MOUTH_SECTIONS - NUM_LIP_SECTIONS;
        let lip_area = (1.1 * self.value(LD)).max(0.0);

        self.lengths.clear();
        self.cross_sections.clear();
        let mut pos = 0.0;
        for k in 0..NUM_PHARYNX_MOUTH_SECTIONS {
            let (length, area, articulator) = if k < num_inner {
                let length = inner_length / num_inner as f64;
                let x = (pos + 0.5 * length) / total;
                let articulator = match x {
                    x if (0.25..0.88).contains(&x) => Articulator::Tongue,
                    x if x >= 0.88 => Articulator::LowerIncisors,
                    _ => Articulator::Other,
                };
                (length, self.oral_area(x), articulator)
            } else {
                (lip_length / NUM_LIP_SECTIONS as f64, lip_area, Articulator::LowerLip)
            };
            self.lengths.push(length);
            self.cross_sections.push(CrossSection {
                pos_cm: pos,
                area_cm2: area,
                articulator,
            });
            pos += length;
        }
        self.teeth_position_cm = (inner_length - 0.5).max(0.0);
        self.velum_opening_cm2 = self.value(VO).max(0.0) * MAX_VELUM_OPENING_CM2;
    }

    fn cross_sections(&self) -> &[CrossSection] {
        &self.cross_sections
    }

    fn get_tube(&self, tube: &mut Tube) -> Result<(), TubeError> {
        let areas: Vec<f64> = self.cross_sections.iter().map(|c| c.area_cm2).collect();
        let articulators: Vec<Articulator> = self.cross_sections.iter().map(|c| c.articulator).collect();
        let side_elevation = 0.5 * (self.value(TS3) + 1.0);
        tube.set_pharynx_mouth_geometry(
            &self.lengths,
            &areas,
            &articulators,
            self.teeth_position_cm,
            side_elevation,
        )?;
        tube.set_velum_opening(self.velum_opening_cm2);
        Ok(())
    }

    fn shapes(&self) -> &[TractShape] {
        &self.shapes
    }

    fn ema_points(&self) -> Vec<EmaPoint> {
        let point = |name: &str, x_cm: f64, y_cm: f64| EmaPoint {
            name: name.to_string(),
            x_cm,
            y_cm,
        };
        vec![
            point("tongue-body", self.value(TCX), self.value(TCY)),
            point("tongue-tip", self.value(TTX), self.value(TTY)),
            point("lower-lip", 8.0 + self.value(LP), -0.5 * self.value(LD)),
        ]
    }

    fn consonant_dominance(&self, index: usize) -> f64 {
        match index {
            HX | HY | JX | TRX | TRY | TBX => 0.2,
            _ => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MIN_ADVISED_VOWEL_AREA_CM2;
    use crate::tube::{FIRST_NOSE_SECTION, PHARYNX_MOUTH_RANGE};

    fn min_area(tract: &AreaFunctionTract) -> f64 {
        tract.cross_sections().iter().map(|c| c.area_cm2).fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn vowels_are_open_and_closures_closed() {
        let mut tract = AreaFunctionTract::new();
        for vowel in ["a", "i", "u"] {
            assert!(tract.apply_shape(vowel));
            assert!(min_area(&tract) >= MIN_ADVISED_VOWEL_AREA_CM2, "{vowel}: {}", min_area(&tract));
        }
        for closure in ["ll-labial-closure", "tt-alveolar-closure", "tb-velar-closure"] {
            assert!(tract.apply_shape(closure));
            assert_eq!(min_area(&tract), 0.0, "{closure}");
        }
        assert!(!tract.apply_shape("schwa-raw"));
    }

    #[test]
    fn tube_takes_geometry() {
        let mut tract = AreaFunctionTract::new();
        tract.params_mut()[VO].set(0.5);
        tract.calculate_all();
        let mut tube = Tube::new();
        tract.get_tube(&mut tube).unwrap();
        let total: f64 = tract.cross_sections().len() as f64;
        assert_eq!(total as usize, PHARYNX_MOUTH_RANGE.len());
        assert!((tube.vocal_tract_length() - 16.84).abs() < 0.5);
        assert_eq!(tube.section(FIRST_NOSE_SECTION).area_cm2, 0.75);
        assert_eq!(tube.section(PHARYNX_MOUTH_RANGE.end - 1).articulator, Articulator::LowerLip);
    }

    #[test]
    fn coarticulation_keeps_constriction() {
        let tract = AreaFunctionTract::new();
        let velar = &tract.shapes()[tract.shape_index("tb-velar-closure").unwrap()].params;
        let a = &tract.shapes()[tract.shape_index("a").unwrap()].params;
        let mixed = tract.context_dependent_consonant(velar, a);
        assert_eq!(mixed[TCY], velar[TCY]);
        assert!((mixed[HX] - (a[HX] + 0.2 * (velar[HX] - a[HX]))).abs() < 1.0e-12);
    }
}

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::param::Param;

use super::VocalTractModel;

pub const TONGUE_HEIGHT: usize = 0;
pub const TONGUE_FRONTNESS: usize = 1;
pub const LIP_ROUNDING: usize = 2;
pub const VELUM_POSITION: usize = 3;
pub const BILABIAL_CONSTRICTION: usize = 4;
pub const APICAL_CONSTRICTION: usize = 5;
pub const DORSAL_CONSTRICTION: usize = 6;
pub const NUM_PHONETIC_PARAMS: usize = 7;

const EPSILON: f64 = 1.0e-6;

const VOWEL_SHAPES: [&str; 3] = ["a", "i", "u"];
/// Closure shapes for the bilabial, apical and dorsal constriction degrees.
const CONSONANT_SHAPES: [&str; 3] = ["ll-labial-closure", "tt-alveolar-closure", "tb-velar-closure"];
/// Articulatory parameters owned by each consonant when the degrees compete.
const PRIORITY: [&[&str]; 3] = [&["LP", "LD"], &["TTX", "TTY", "TS3"], &["TCX", "TCY", "TS2"]];

/// Phonetic description of a vocal tract configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneticParams {
    pub params: Vec<Param>,
}

impl Default for PhoneticParams {
    fn default() -> Self {
        Self {
            params: vec![
                Param::new("Tongue height", "height", "", 0.0, 1.0, 0.5),
                Param::new("Tongue frontness", "frontness", "", 0.0, 1.0, 0.5),
                Param::new("Lip rounding", "rounding", "", 0.0, 1.0, 0.3),
                Param::new("Velum position", "velum", "", 0.0, 1.0, 0.0),
                Param::new("Bilabial constriction degree", "bilabial", "", 0.0, 1.0, 0.0),
                Param::new("Apical constriction degree", "apical", "", 0.0, 1.0, 0.0),
                Param::new("Dorsal constriction degree", "dorsal", "", 0.0, 1.0, 0.0),
            ],
        }
    }
}

impl PhoneticParams {
    pub fn value(&self, i: usize) -> f64 {
        self.params[i].x
    }

    pub fn set(&mut self, i: usize, x: f64) {
        self.params[i].set(x);
    }
}

/// Weight of each consonant shape for one articulatory parameter.
///
/// If the degrees add up to more than 1, the consonant owning the parameter
/// keeps its full degree and the others share what is left; parameters
/// without an owner are normalized.
fn consonant_weights(abbr: &str, degrees: [f64; 3]) -> [f64; 3] {
    let sum: f64 = degrees.iter().sum();
    if sum <= 1.0 + EPSILON {
        return degrees;
    }
    match PRIORITY.iter().position(|owned| owned.contains(&abbr)) {
        Some(owner) => {
            let rest = (1.0 - degrees[owner]).max(0.0);
            let others = sum - degrees[owner];
            let scale = if others > EPSILON { (rest / others).min(1.0) } else { 0.0 };
            let mut w = degrees.map(|d| d * scale);
            w[owner] = degrees[owner];
            w
        }
        None => degrees.map(|d| d / sum),
    }
}

/// Set the articulatory parameters of `tract` from phonetic parameters.
///
/// Returns false, leaving `tract` untouched, if a required shape is missing.
pub fn phonetic_params_to_tract<T: VocalTractModel + ?Sized>(phonetic: &PhoneticParams, tract: &mut T) -> bool {
    let lookup = |name: &str| -> Option<Vec<f64>> {
        let i = tract.shape_index(name)?;
        Some(tract.shapes()[i].params.clone())
    };
    let mut vowels = Vec::with_capacity(3);
    for name in VOWEL_SHAPES {
        match lookup(name) {
            Some(v) => vowels.push(v),
            None => {
                warn!(shape = name, "missing vowel shape for phonetic mapping");
                return false;
            }
        }
    }
    let mut consonants = Vec::with_capacity(3);
    for name in CONSONANT_SHAPES {
        match lookup(name) {
            Some(c) => consonants.push(c),
            None => {
                warn!(shape = name, "missing consonant shape for phonetic mapping");
                return false;
            }
        }
    }

    let height = phonetic.value(TONGUE_HEIGHT);
    let front = phonetic.value(TONGUE_FRONTNESS);
    let rounding = phonetic.value(LIP_ROUNDING);
    let w_a = 1.0 - height;
    let w_i = height * front;
    let w_u = height * (1.0 - front);
    let degrees = [
        phonetic.value(BILABIAL_CONSTRICTION),
        phonetic.value(APICAL_CONSTRICTION),
        phonetic.value(DORSAL_CONSTRICTION),
    ];
    let velum = phonetic.value(VELUM_POSITION);

    let mut values = Vec::with_capacity(tract.params().len());
    for (j, p) in tract.params().iter().enumerate() {
        let (a, i, u) = (vowels[0][j], vowels[1][j], vowels[2][j]);
        let mut v = w_a * a + w_i * i + w_u * u;
        match p.abbr.as_str() {
            // Rounding moves the lips towards /u/ regardless of tongue position
            "LP" | "LD" => {
                let unrounded = (w_a * a + w_i * i) / (w_a + w_i).max(EPSILON);
                let unrounded = if w_a + w_i > EPSILON { unrounded } else { u };
                v = unrounded + rounding * (u - unrounded);
            }
            "VO" => v = p.min + velum * (p.max - p.min),
            _ => {}
        }
        let w = consonant_weights(&p.abbr, degrees);
        let target: f64 = (0..3).map(|c| w[c] * (consonants[c][j] - v)).sum();
        values.push(v + target);
    }
    tract.set_param_values(&values);
    true
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::tract::AreaFunctionTract;
    use crate::tract::area_function::{LD, TCY, TTY};

    #[test]
    fn weights_keep_owner() {
        assert_eq!(consonant_weights("LD", [0.5, 0.3, 0.0]), [0.5, 0.3, 0.0]);
        let w = consonant_weights("LD", [1.0, 1.0, 0.0]);
        assert_eq!(w, [1.0, 0.0, 0.0]);
        let w = consonant_weights("TTY", [0.6, 0.8, 0.2]);
        assert_abs_diff_eq!(w[1], 0.8);
        assert_abs_diff_eq!(w[0] + w[2], 0.2, epsilon = 1.0e-12);
        let w = consonant_weights("JA", [1.0, 1.0, 0.0]);
        assert_eq!(w, [0.5, 0.5, 0.0]);
    }

    #[test]
    fn vowel_corners() {
        let mut tract = AreaFunctionTract::new();
        let mut phonetic = PhoneticParams::default();
        phonetic.set(TONGUE_HEIGHT, 0.0);
        phonetic.set(LIP_ROUNDING, 0.0);
        assert!(phonetic_params_to_tract(&phonetic, &mut tract));
        let a = &tract.shapes()[tract.shape_index("a").unwrap()].params;
        assert_abs_diff_eq!(tract.params()[TCY].x, a[TCY], epsilon = 1.0e-12);
        assert_abs_diff_eq!(tract.params()[LD].x, a[LD], epsilon = 1.0e-12);
    }

    #[test]
    fn full_apical_closure() {
        let mut tract = AreaFunctionTract::new();
        let mut phonetic = PhoneticParams::default();
        phonetic.set(APICAL_CONSTRICTION, 1.0);
        phonetic.set(BILABIAL_CONSTRICTION, 1.0);
        assert!(phonetic_params_to_tract(&phonetic, &mut tract));
        let d = &tract.shapes()[tract.shape_index("tt-alveolar-closure").unwrap()].params;
        let b = &tract.shapes()[tract.shape_index("ll-labial-closure").unwrap()].params;
        assert_abs_diff_eq!(tract.params()[TTY].x, d[TTY], epsilon = 1.0e-12);
        assert_abs_diff_eq!(tract.params()[LD].x, b[LD], epsilon = 1.0e-12);
    }
}

//! Articulatory geometry: the interface consumed by the acoustic models, plus
//! the mapping from phonetic features to articulatory parameters.

use serde::{Deserialize, Serialize};

use crate::param::{Param, find_param};
use crate::tube::{Articulator, Tube, TubeError};

pub mod area_function;
pub mod phonetic;

pub use self::area_function::AreaFunctionTract;
pub use self::phonetic::{PhoneticParams, phonetic_params_to_tract};

/// One point of the area function along the centerline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    /// Distance from the glottis (cm)
    pub pos_cm: f64,
    pub area_cm2: f64,
    pub articulator: Articulator,
}

/// Named preset of articulatory parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TractShape {
    pub name: String,
    pub params: Vec<f64>,
}

/// Virtual sensor position in the midsagittal plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaPoint {
    pub name: String,
    pub x_cm: f64,
    pub y_cm: f64,
}

/// A geometry model that turns articulatory parameters into a [`Tube`].
///
/// After changing parameters, call [`VocalTractModel::calculate_all`] before
/// reading geometry.
pub trait VocalTractModel {
    fn params(&self) -> &[Param];

    fn params_mut(&mut self) -> &mut [Param];

    fn param_index(&self, abbr: &str) -> Option<usize> {
        find_param(self.params(), abbr)
    }

    fn param_values(&self) -> Vec<f64> {
        crate::param::values(self.params())
    }

    /// Set all parameters from `values` (clamped), then recalculate.
    fn set_param_values(&mut self, values: &[f64]) {
        for (p, &x) in self.params_mut().iter_mut().zip(values) {
            p.set(x);
        }
        self.calculate_all();
    }

    /// Recompute the geometry from the current parameters.
    fn calculate_all(&mut self);

    fn cross_sections(&self) -> &[CrossSection];

    /// Write the pharynx/mouth geometry and the velum opening into `tube`.
    fn get_tube(&self, tube: &mut Tube) -> Result<(), TubeError>;

    fn shapes(&self) -> &[TractShape];

    fn shape_index(&self, name: &str) -> Option<usize> {
        self.shapes().iter().position(|s| s.name == name)
    }

    /// Load a named shape. Returns false if there is no such shape.
    fn apply_shape(&mut self, name: &str) -> bool {
        let Some(i) = self.shape_index(name) else {
            return false;
        };
        let values = self.shapes()[i].params.clone();
        self.set_param_values(&values);
        true
    }

    fn ema_points(&self) -> Vec<EmaPoint> {
        Vec::new()
    }

    /// How strongly a consonant controls parameter `index` against its vowel context, 0..1.
    fn consonant_dominance(&self, _index: usize) -> f64 {
        1.0
    }

    /// Consonant parameters coarticulated with a vowel context.
    fn context_dependent_consonant(&self, consonant: &[f64], vowel: &[f64]) -> Vec<f64> {
        self.params()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let c = consonant.get(i).copied().unwrap_or(p.neutral);
                let v = vowel.get(i).copied().unwrap_or(p.neutral);
                let d = self.consonant_dominance(i);
                (d * c + (1.0 - d) * v).clamp(p.min, p.max)
            })
            .collect()
    }
}

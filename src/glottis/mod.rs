//! Glottal source models.
//!
//! All models share the parameter layout of [`GlottisParams`]: static parameters
//! describe the speaker, control parameters change over time (index 0 is F0,
//! index 1 the subglottal pressure), derived parameters are read-only outputs.
//! The synthesis loop dispatches over [`Glottis`] by `match`.

use serde::{Deserialize, Serialize};

use crate::param::{Param, find_param};

mod geometric;
pub mod triangular;
mod two_mass;

pub use self::geometric::GeometricGlottis;
pub use self::triangular::TriangularGlottis;
pub use self::two_mass::TwoMassModel;

/// Control parameter index of the fundamental frequency.
pub const FREQUENCY: usize = 0;
/// Control parameter index of the subglottal pressure.
pub const PRESSURE: usize = 1;

/// Index of the subglottal, lower glottis, upper glottis and supraglottal pressure.
pub const PRESSURE_SUBGLOTTAL: usize = 0;
pub const PRESSURE_LOWER_GLOTTIS: usize = 1;
pub const PRESSURE_UPPER_GLOTTIS: usize = 2;
pub const PRESSURE_SUPRAGLOTTAL: usize = 3;

/// Width below which the glottis counts as closed (cm)
const CLOSED_AREA_CM2: f64 = 1.0e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlottisKind {
    Geometric,
    TwoMass,
    Triangular,
}

impl GlottisKind {
    pub const ALL: [GlottisKind; 3] = [Self::Geometric, Self::TwoMass, Self::Triangular];

    /// Identifier used in speaker files.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Geometric => "Geometric glottis",
            Self::TwoMass => "Two-mass model",
            Self::Triangular => "Triangular glottis",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }
}

/// Named preset for the control parameters.
///
/// F0 and pressure are stored but not applied, since they belong to the prosody.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlottisShape {
    pub name: String,
    pub control_param: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GlottisParams {
    pub static_params: Vec<Param>,
    pub control_params: Vec<Param>,
    pub derived_params: Vec<Param>,
    pub shapes: Vec<GlottisShape>,
}

impl GlottisParams {
    /// F0, pressure and aspiration are common to every model and lead the list.
    fn common_control_params() -> Vec<Param> {
        vec![
            Param::new("F0", "f0", "Hz", 40.0, 600.0, 120.0),
            Param::new("Subglottal pressure", "pressure", "dPa", 0.0, 20000.0, 8000.0),
        ]
    }

    fn aspiration_param() -> Param {
        Param::new("Aspiration strength", "aspiration_strength", "dB", -40.0, 0.0, -10.0)
    }

    pub fn control(&self, index: usize) -> f64 {
        self.control_params[index].x
    }

    pub fn static_value(&self, index: usize) -> f64 {
        self.static_params[index].x
    }

    fn set_derived(&mut self, index: usize, x: f64) {
        self.derived_params[index].x = x;
    }

    pub fn shape_index(&self, name: &str) -> Option<usize> {
        self.shapes.iter().position(|s| s.name == name)
    }

    /// Copy the shape's control values, keeping F0 and pressure.
    pub fn apply_shape(&mut self, name: &str) -> bool {
        let Some(index) = self.shape_index(name) else {
            return false;
        };
        let values = self.shapes[index].control_param.clone();
        for (k, (p, x)) in self.control_params.iter_mut().zip(values).enumerate() {
            if k != FREQUENCY && k != PRESSURE {
                p.set(x);
            }
        }
        true
    }

    fn make_shape(&self, name: &str, values: &[(&str, f64)]) -> GlottisShape {
        let mut control_param: Vec<f64> = self.control_params.iter().map(|p| p.neutral).collect();
        for (abbr, x) in values {
            if let Some(i) = find_param(&self.control_params, abbr) {
                control_param[i] = *x;
            }
        }
        GlottisShape {
            name: name.to_string(),
            control_param,
        }
    }
}

/// Behaviour shared by the glottis models.
pub trait GlottisModel {
    fn kind(&self) -> GlottisKind;
    fn params(&self) -> &GlottisParams;
    fn params_mut(&mut self) -> &mut GlottisParams;

    /// Put the vocal folds at rest.
    fn reset_motion(&mut self);
    /// Advance the fold motion by `dt` seconds given the four tracked pressures (dPa).
    fn inc_time(&mut self, dt: f64, pressures: &[f64; 4]);
    /// Update the derived parameters from the current state.
    fn calc_geometry(&mut self);
    /// Length (cm) and area (cm^2) of the lower and upper glottis sections.
    fn tube_data(&self) -> ([f64; 2], [f64; 2]);

    fn aspiration_strength_db(&self) -> f64;

    fn is_closed(&self) -> bool {
        let (_, area) = self.tube_data();
        area[0].min(area[1]) < CLOSED_AREA_CM2
    }

    /// Column names for the glottis signal export.
    fn print_param_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.params().control_params.iter().map(|p| p.abbr.clone()).collect();
        names.extend(self.params().derived_params.iter().map(|p| p.abbr.clone()));
        names
    }

    /// Column values matching [`GlottisModel::print_param_names`].
    fn print_param_values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.params().control_params.iter().map(|p| p.x).collect();
        values.extend(self.params().derived_params.iter().map(|p| p.x));
        values
    }
}

macro_rules! dispatch {
    ($self:expr, $g:ident => $body:expr) => {
        match $self {
            Glottis::Geometric($g) => $body,
            Glottis::TwoMass($g) => $body,
            Glottis::Triangular($g) => $body,
        }
    };
}

#[derive(Debug, Clone)]
pub enum Glottis {
    Geometric(GeometricGlottis),
    TwoMass(TwoMassModel),
    Triangular(TriangularGlottis),
}

impl Glottis {
    pub fn new(kind: GlottisKind) -> Self {
        match kind {
            GlottisKind::Geometric => Self::Geometric(GeometricGlottis::new()),
            GlottisKind::TwoMass => Self::TwoMass(TwoMassModel::new()),
            GlottisKind::Triangular => Self::Triangular(TriangularGlottis::new()),
        }
    }

    pub fn f0(&self) -> f64 {
        self.params().control(FREQUENCY)
    }

    pub fn set_f0(&mut self, f0: f64) {
        self.params_mut().control_params[FREQUENCY].set(f0);
    }

    pub fn pressure(&self) -> f64 {
        self.params().control(PRESSURE)
    }

    pub fn set_pressure(&mut self, pressure: f64) {
        self.params_mut().control_params[PRESSURE].set(pressure);
    }

    /// Set all control parameters from a value vector (missing values are left alone).
    pub fn set_control_values(&mut self, values: &[f64]) {
        for (p, x) in self.params_mut().control_params.iter_mut().zip(values) {
            p.set(*x);
        }
    }
}

impl GlottisModel for Glottis {
    fn kind(&self) -> GlottisKind {
        dispatch!(self, g => g.kind())
    }
    fn params(&self) -> &GlottisParams {
        dispatch!(self, g => g.params())
    }
    fn params_mut(&mut self) -> &mut GlottisParams {
        dispatch!(self, g => g.params_mut())
    }
    fn reset_motion(&mut self) {
        dispatch!(self, g => g.reset_motion())
    }
    #[inline]
    fn inc_time(&mut self, dt: f64, pressures: &[f64; 4]) {
        dispatch!(self, g => g.inc_time(dt, pressures))
    }
    #[inline]
    fn calc_geometry(&mut self) {
        dispatch!(self, g => g.calc_geometry())
    }
    #[inline]
    fn tube_data(&self) -> ([f64; 2], [f64; 2]) {
        dispatch!(self, g => g.tube_data())
    }
    fn aspiration_strength_db(&self) -> f64 {
        dispatch!(self, g => g.aspiration_strength_db())
    }
    fn is_closed(&self) -> bool {
        dispatch!(self, g => g.is_closed())
    }
}

/// Pressures (dPa) on the lower and upper mass of a fold, from quasi-steady
/// flow between the subglottal and supraglottal pressure.
///
/// The jet separates at the narrowest point, so the upper mass only sees the
/// supraglottal pressure. A closure at either mass exposes the lower mass to
/// the full subglottal pressure.
fn flow_pressures(pressures: &[f64; 4], area: [f64; 2]) -> [f64; 2] {
    let sub = pressures[PRESSURE_SUBGLOTTAL];
    let supra = pressures[PRESSURE_SUPRAGLOTTAL];
    let min_area = area[0].min(area[1]);
    if min_area <= 0.0 || sub <= supra {
        return [sub, supra];
    }
    let ratio = min_area / area[0];
    [sub - (sub - supra) * ratio * ratio, supra]
}

/// Klatt-style F0 flutter. `level` is in percent; at 100 % and F0 = 100 Hz the
/// deviation reaches about +-6 Hz.
fn flutter(f0: f64, level: f64, time_s: f64) -> f64 {
    let w = crate::constants::TWO_PI * time_s;
    let wobble = (12.7 * w).sin() + (7.1 * w).sin() + (4.7 * w).sin();
    f0 + (level / 50.0) * (f0 / 100.0) * wobble
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(glottis: &mut Glottis, steps: usize) -> (f64, f64) {
        let dt = 1.0 / 44100.0;
        let mut min: f64 = f64::MAX;
        let mut max: f64 = 0.0;
        for _ in 0..steps {
            let p = glottis.pressure();
            glottis.inc_time(dt, &[p, 0.6 * p, 0.1 * p, 0.0]);
            glottis.calc_geometry();
            let (length, area) = glottis.tube_data();
            assert!(length.iter().chain(area.iter()).all(|x| x.is_finite()));
            assert!(area.iter().all(|a| *a >= 0.0));
            min = min.min(area[0]);
            max = max.max(area[0]);
        }
        (min, max)
    }

    #[test]
    fn all_models_stay_finite() {
        for kind in GlottisKind::ALL {
            let mut g = Glottis::new(kind);
            g.reset_motion();
            assert_eq!(g.kind(), kind);
            assert_eq!(g.params().control_params[FREQUENCY].abbr, "f0");
            assert_eq!(g.params().control_params[PRESSURE].abbr, "pressure");
            let (min, max) = run(&mut g, 4410);
            assert!(max >= min, "{kind:?}");
            assert_eq!(g.print_param_names().len(), g.print_param_values().len());
        }
    }

    #[test]
    fn geometric_glottis_oscillates() {
        let mut g = Glottis::new(GlottisKind::Geometric);
        g.params_mut().apply_shape("modal");
        let (min, max) = run(&mut g, 4410);
        assert!(max > 0.05, "{max}");
        assert!(min < 0.01, "{min}");
    }

    #[test]
    fn convergent_glottis_pushes_lower_mass() {
        let p = [8000.0, 0.0, 0.0, 0.0];
        // Narrowest at the upper mass: pressure recovers towards the inlet
        assert_eq!(flow_pressures(&p, [0.2, 0.1]), [6000.0, 0.0]);
        // Narrowest at the lower mass: the jet carries the whole pressure drop
        assert_eq!(flow_pressures(&p, [0.1, 0.2]), [0.0, 0.0]);
        assert_eq!(flow_pressures(&p, [0.1, 0.0]), [8000.0, 0.0]);
        assert_eq!(flow_pressures(&[0.0, 0.0, 0.0, 50.0], [0.1, 0.1]), [0.0, 50.0]);
    }

    #[test]
    fn mechanical_models_self_oscillate() {
        let dt = 1.0 / 44100.0;
        for kind in [GlottisKind::TwoMass, GlottisKind::Triangular] {
            let mut g = Glottis::new(kind);
            g.set_f0(120.0);
            g.set_pressure(8000.0);
            let mut area = Vec::new();
            for n in 0..22050 {
                // A short supraglottal pulse breaks the symmetric rest position
                let supra = if n < 20 { 100.0 } else { 0.0 };
                g.inc_time(dt, &[8000.0, 0.0, 0.0, supra]);
                g.calc_geometry();
                let (_, a) = g.tube_data();
                area.push(a[0].min(a[1]));
            }
            let settled = &area[11025..];
            let min = settled.iter().copied().fold(f64::MAX, f64::min);
            let max = settled.iter().copied().fold(0.0, f64::max);
            assert!(min < 0.01, "{kind:?} never closes: {min}");
            assert!(max > 0.05, "{kind:?} never opens: {max}");

            let mean = settled.iter().sum::<f64>() / settled.len() as f64;
            let crossings: Vec<usize> = (1..settled.len())
                .filter(|&i| settled[i - 1] < mean && settled[i] >= mean)
                .collect();
            let periods = (crossings.len() - 1) as f64;
            let f0 = 44100.0 * periods / (crossings[crossings.len() - 1] - crossings[0]) as f64;
            assert!((90.0..=160.0).contains(&f0), "{kind:?} at {f0} Hz");
        }
    }

    #[test]
    fn type_names_round_trip() {
        for kind in GlottisKind::ALL {
            assert_eq!(GlottisKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(GlottisKind::from_type_name("Four-mass model"), None);
    }

    #[test]
    fn shapes_keep_prosody() {
        let mut g = Glottis::new(GlottisKind::Triangular);
        g.set_f0(200.0);
        assert!(g.params_mut().apply_shape("breathy"));
        assert_eq!(g.f0(), 200.0);
        assert!(!g.params_mut().apply_shape("no-such-shape"));
    }

    #[test]
    fn flutter_is_bounded() {
        for n in 0..1000 {
            let f = flutter(100.0, 25.0, n as f64 * 0.01);
            assert!((85.0..=115.0).contains(&f));
        }
    }
}

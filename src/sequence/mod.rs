//! Drivers that produce one geometry and excitation per simulated sample.
//!
//! A sequence starts at position 0, advances by one sample per
//! [`TubeSequence::inc_pos`] and is finished at [`TubeSequence::duration_pt`].
//! Glottis models stay owned by the caller and are lent to each call.

use crate::glottis::{Glottis, GlottisModel};
use crate::tube::Tube;

mod gestural_score;
mod impulse;
mod static_phone;
mod vowel_lf;

pub use self::gestural_score::{FRAME_PT, GesturalScoreSequence, ScoreSource};
pub use self::impulse::{ImpulseExcitation, ImpulsePreset};
pub use self::static_phone::StaticPhone;
pub use self::vowel_lf::VowelLf;

/// Length of the lung pressure onset and offset ramps (s)
const PRESSURE_RAMP_S: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    StaticPhone,
    GesturalScore,
    VowelLf,
    Impulse(ImpulsePreset),
}

impl SequenceKind {
    pub fn is_impulse(self) -> bool {
        matches!(self, Self::Impulse(_))
    }
}

pub trait TubeSequence {
    fn kind(&self) -> SequenceKind;

    /// Geometry at the current position.
    fn get_tube(&mut self, tube: &mut Tube, glottis: &Glottis);

    /// Volume flow (cm^3/s) injected at a section, if any.
    fn flow_source(&self) -> Option<(f64, usize)> {
        None
    }

    /// Pressure (dPa) in the inlet of a section, if any.
    fn pressure_source(&self) -> Option<(f64, usize)> {
        None
    }

    /// Advance by one sample. `pressures` are the four glottis pressures of the
    /// step just simulated.
    fn inc_pos(&mut self, glottis: &mut Glottis, pressures: &[f64; 4]);

    fn duration_pt(&self) -> usize;

    fn pos_pt(&self) -> usize;

    fn reset_sequence(&mut self, glottis: &mut Glottis);

    fn is_finished(&self) -> bool {
        self.pos_pt() >= self.duration_pt()
    }
}

/// Write the glottis geometry and aspiration level into `tube`.
pub(crate) fn apply_glottis(tube: &mut Tube, glottis: &Glottis) {
    let (length, area) = glottis.tube_data();
    tube.set_glottis_geometry(length, area);
    tube.set_aspiration_strength(glottis.aspiration_strength_db());
}

/// Lung pressure with linear onset and offset ramps.
pub(crate) fn ramped_pressure(pressure: f64, pos_pt: usize, duration_pt: usize) -> f64 {
    let ramp = (PRESSURE_RAMP_S * crate::constants::SAMPLING_RATE as f64).max(1.0);
    let from_start = pos_pt as f64 / ramp;
    let to_end = duration_pt.saturating_sub(pos_pt) as f64 / ramp;
    pressure * from_start.min(to_end).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_ramps() {
        let d = 44100;
        assert_eq!(ramped_pressure(8000.0, 0, d), 0.0);
        assert_eq!(ramped_pressure(8000.0, 441, d), 4000.0);
        assert_eq!(ramped_pressure(8000.0, 22050, d), 8000.0);
        assert_eq!(ramped_pressure(8000.0, d, d), 0.0);
    }
}

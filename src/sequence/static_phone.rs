use crate::constants::{SAMPLING_RATE, time_step};
use crate::glottis::{Glottis, GlottisModel};
use crate::tube::{FIRST_TRACHEA_SECTION, Tube};

use super::{SequenceKind, TubeSequence, apply_glottis, ramped_pressure};

/// Relative F0 decline over a phone without a fixed F0
const F0_DECLINATION: f64 = 0.1;

/// A phone on a fixed tube, or on a tube moving linearly to a second shape,
/// excited by the selected glottis model.
#[derive(Debug, Clone)]
pub struct StaticPhone {
    start: Tube,
    target: Option<Tube>,
    duration_pt: usize,
    pos_pt: usize,
    /// Lung pressure on the plateau (dPa)
    pressure_dpa: f64,
    start_f0: f64,
    const_f0: bool,
}

impl StaticPhone {
    pub fn new(tube: &Tube, duration_s: f64, pressure_dpa: f64, f0: f64, const_f0: bool) -> Self {
        Self {
            start: tube.clone(),
            target: None,
            duration_pt: (duration_s * SAMPLING_RATE as f64).round().max(0.0) as usize,
            pos_pt: 0,
            pressure_dpa,
            start_f0: f0,
            const_f0,
        }
    }

    /// Move the geometry linearly from the start tube to `target` over the phone.
    pub fn with_transition(mut self, target: &Tube) -> Self {
        self.target = Some(target.clone());
        self
    }

    fn current_pressure(&self) -> f64 {
        ramped_pressure(self.pressure_dpa, self.pos_pt, self.duration_pt)
    }

    fn current_f0(&self) -> f64 {
        if self.const_f0 || self.duration_pt == 0 {
            self.start_f0
        } else {
            let ratio = self.pos_pt as f64 / self.duration_pt as f64;
            self.start_f0 * (1.0 - F0_DECLINATION * ratio)
        }
    }
}

impl TubeSequence for StaticPhone {
    fn kind(&self) -> SequenceKind {
        SequenceKind::StaticPhone
    }

    fn get_tube(&mut self, tube: &mut Tube, glottis: &Glottis) {
        *tube = match &self.target {
            Some(target) if self.duration_pt > 0 => {
                Tube::interpolate(&self.start, target, self.pos_pt as f64 / self.duration_pt as f64)
            }
            _ => self.start.clone(),
        };
        apply_glottis(tube, glottis);
    }

    fn pressure_source(&self) -> Option<(f64, usize)> {
        Some((self.current_pressure(), FIRST_TRACHEA_SECTION))
    }

    fn inc_pos(&mut self, glottis: &mut Glottis, pressures: &[f64; 4]) {
        glottis.set_pressure(self.current_pressure());
        glottis.set_f0(self.current_f0());
        glottis.inc_time(time_step(), pressures);
        glottis.calc_geometry();
        if self.pos_pt < self.duration_pt {
            self.pos_pt += 1;
        }
    }

    fn duration_pt(&self) -> usize {
        self.duration_pt
    }

    fn pos_pt(&self) -> usize {
        self.pos_pt
    }

    fn reset_sequence(&mut self, glottis: &mut Glottis) {
        self.pos_pt = 0;
        glottis.reset_motion();
        glottis.set_pressure(0.0);
        glottis.set_f0(self.start_f0);
        glottis.calc_geometry();
    }
}

use crate::constants::SAMPLING_RATE;
use crate::glottis::Glottis;
use crate::lf_pulse::LfPulse;
use crate::signal::Signal;
use crate::tube::{FIRST_PHARYNX_SECTION, Tube};

use super::{SequenceKind, TubeSequence};

/// Default length of an LF vowel (s)
pub const VOWEL_LF_DURATION_S: f64 = 0.6;

/// Vowel on a fixed tube, excited by a train of LF flow pulses injected above
/// the closed glottis.
#[derive(Debug, Clone)]
pub struct VowelLf {
    tube: Tube,
    pulse: Signal,
    duration_pt: usize,
    pos_pt: usize,
}

impl VowelLf {
    pub fn new(tube: &Tube, lf: &LfPulse, duration_s: f64) -> Self {
        let mut tube = tube.clone();
        tube.set_glottis_geometry([0.3, 0.3], [0.0, 0.0]);
        let mut pulse = Signal::new(0);
        lf.get_pulse(&mut pulse, SAMPLING_RATE, false);
        Self {
            tube,
            pulse,
            duration_pt: (duration_s * SAMPLING_RATE as f64).round().max(0.0) as usize,
            pos_pt: 0,
        }
    }

    fn flow(&self) -> f64 {
        if self.pulse.is_empty() {
            0.0
        } else {
            self.pulse[self.pos_pt % self.pulse.len()]
        }
    }
}

impl TubeSequence for VowelLf {
    fn kind(&self) -> SequenceKind {
        SequenceKind::VowelLf
    }

    fn get_tube(&mut self, tube: &mut Tube, _glottis: &Glottis) {
        tube.clone_from(&self.tube);
    }

    fn flow_source(&self) -> Option<(f64, usize)> {
        Some((self.flow(), FIRST_PHARYNX_SECTION))
    }

    fn inc_pos(&mut self, _glottis: &mut Glottis, _pressures: &[f64; 4]) {
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

    fn reset_sequence(&mut self, _glottis: &mut Glottis) {
        self.pos_pt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glottis::GlottisKind;
    use crate::tube::UPPER_GLOTTIS_SECTION;

    #[test]
    fn pulses_repeat() {
        let lf = LfPulse::default();
        let mut vowel = VowelLf::new(&Tube::new(), &lf, VOWEL_LF_DURATION_S);
        assert_eq!(vowel.duration_pt(), 26460);
        let period = lf.period_samples(SAMPLING_RATE);
        let mut glottis = Glottis::new(GlottisKind::Geometric);
        let mut first = Vec::new();
        for _ in 0..2 * period {
            first.push(vowel.flow_source().unwrap().0);
            vowel.inc_pos(&mut glottis, &[0.0; 4]);
        }
        assert_eq!(first[..period], first[period..]);
        assert!(first.iter().cloned().fold(0.0, f64::max) > 100.0);

        let mut tube = Tube::new();
        vowel.get_tube(&mut tube, &glottis);
        assert_eq!(tube.section(UPPER_GLOTTIS_SECTION).area_cm2, 0.0);
    }
}

use crate::constants::TDS_BUFFER_LENGTH;
use crate::glottis::Glottis;
use crate::tube::{FIRST_PHARYNX_SECTION, LAST_TRACHEA_SECTION, Tube};

use super::{SequenceKind, TubeSequence};

/// Strength of the measurement impulse (cm^3/s or dPa)
const IMPULSE_AMPLITUDE: f64 = 1000.0;

/// What an impulse run measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpulsePreset {
    /// Input impedance of the subglottal system, seen from the glottis
    SubglottalImpedance,
    /// Input impedance of the vocal tract, seen from the glottis
    SupraglottalImpedance,
    /// Volume velocity transfer function from the glottis to the mouth
    TransferFunction,
}

impl ImpulsePreset {
    /// Section receiving the impulse and its signed amplitude.
    pub fn excitation(self) -> (usize, f64) {
        match self {
            Self::SubglottalImpedance => (LAST_TRACHEA_SECTION, -IMPULSE_AMPLITUDE),
            Self::SupraglottalImpedance | Self::TransferFunction => (FIRST_PHARYNX_SECTION, IMPULSE_AMPLITUDE),
        }
    }

    /// Section whose pressure is recorded by the internal probe.
    pub fn probe_section(self) -> Option<usize> {
        match self {
            Self::SubglottalImpedance => Some(LAST_TRACHEA_SECTION),
            Self::SupraglottalImpedance => Some(FIRST_PHARYNX_SECTION),
            Self::TransferFunction => None,
        }
    }
}

/// Single-sample flow or pressure impulse into a static tube with the glottis closed.
#[derive(Debug, Clone)]
pub struct ImpulseExcitation {
    preset: ImpulsePreset,
    tube: Tube,
    pressure_impulse: bool,
    pos_pt: usize,
}

impl ImpulseExcitation {
    pub fn new(preset: ImpulsePreset, tube: &Tube, pressure_impulse: bool) -> Self {
        let mut tube = tube.clone();
        tube.set_glottis_geometry([0.3, 0.3], [0.0, 0.0]);
        Self {
            preset,
            tube,
            pressure_impulse,
            pos_pt: 0,
        }
    }

    pub fn preset(&self) -> ImpulsePreset {
        self.preset
    }

    fn source(&self) -> (f64, usize) {
        let (section, amplitude) = self.preset.excitation();
        (if self.pos_pt == 0 { amplitude } else { 0.0 }, section)
    }
}

impl TubeSequence for ImpulseExcitation {
    fn kind(&self) -> SequenceKind {
        SequenceKind::Impulse(self.preset)
    }

    fn get_tube(&mut self, tube: &mut Tube, _glottis: &Glottis) {
        tube.clone_from(&self.tube);
    }

    fn flow_source(&self) -> Option<(f64, usize)> {
        (!self.pressure_impulse).then(|| self.source())
    }

    fn pressure_source(&self) -> Option<(f64, usize)> {
        self.pressure_impulse.then(|| self.source())
    }

    fn inc_pos(&mut self, _glottis: &mut Glottis, _pressures: &[f64; 4]) {
        if self.pos_pt < TDS_BUFFER_LENGTH {
            self.pos_pt += 1;
        }
    }

    fn duration_pt(&self) -> usize {
        TDS_BUFFER_LENGTH
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

    #[test]
    fn single_sample_impulse() {
        let mut seq = ImpulseExcitation::new(ImpulsePreset::SubglottalImpedance, &Tube::new(), false);
        let mut glottis = Glottis::new(GlottisKind::TwoMass);
        assert_eq!(seq.flow_source(), Some((-1000.0, LAST_TRACHEA_SECTION)));
        assert_eq!(seq.pressure_source(), None);
        seq.inc_pos(&mut glottis, &[0.0; 4]);
        assert_eq!(seq.flow_source(), Some((0.0, LAST_TRACHEA_SECTION)));
        assert_eq!(seq.duration_pt(), 32768);
        assert_eq!(seq.kind(), SequenceKind::Impulse(ImpulsePreset::SubglottalImpedance));
    }

    #[test]
    fn transfer_function_has_no_probe() {
        assert_eq!(ImpulsePreset::TransferFunction.probe_section(), None);
        assert_eq!(ImpulsePreset::SupraglottalImpedance.excitation(), (FIRST_PHARYNX_SECTION, 1000.0));
        let seq = ImpulseExcitation::new(ImpulsePreset::TransferFunction, &Tube::new(), true);
        assert_eq!(seq.pressure_source(), Some((1000.0, FIRST_PHARYNX_SECTION)));
    }
}

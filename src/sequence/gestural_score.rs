use crate::constants::{SAMPLING_RATE, time_step};
use crate::glottis::{Glottis, GlottisModel};
use crate::tract::VocalTractModel;
use crate::tube::{FIRST_TRACHEA_SECTION, Tube, TubeError};

use super::{SequenceKind, TubeSequence, apply_glottis};

/// Samples between two evaluations of the score (about 2.5 ms)
pub const FRAME_PT: usize = 110;

/// Time-varying articulatory and glottal control, typically a gestural score.
pub trait ScoreSource {
    fn duration_s(&self) -> f64;

    /// Parameter vectors at `t` seconds. Both slices are prefilled with the
    /// current values; entries the score does not control may be left alone.
    fn get_params(&self, t: f64, tract: &mut [f64], glottis: &mut [f64]);
}

#[derive(Debug, Clone)]
struct Frame {
    tube: Tube,
    glottis_params: Vec<f64>,
}

/// Geometry from a [`VocalTractModel`] driven by a [`ScoreSource`], evaluated
/// every [`FRAME_PT`] samples and linearly interpolated in between.
pub struct GesturalScoreSequence<S, T> {
    score: S,
    tract: T,
    pos_pt: usize,
    duration_pt: usize,
    /// Frames at the start and end of the current interval
    frames: Option<(usize, Frame, Frame)>,
    glottis_params: Vec<f64>,
}

impl<S: ScoreSource, T: VocalTractModel> GesturalScoreSequence<S, T> {
    pub fn new(score: S, tract: T) -> Self {
        let duration_pt = (score.duration_s() * SAMPLING_RATE as f64).round().max(0.0) as usize;
        Self {
            score,
            tract,
            pos_pt: 0,
            duration_pt,
            frames: None,
            glottis_params: Vec::new(),
        }
    }

    pub fn tract(&self) -> &T {
        &self.tract
    }

    pub fn score(&self) -> &S {
        &self.score
    }

    /// Evaluate the score at frame `k` into a tube and glottis controls.
    fn frame(&mut self, k: usize, template: &Tube, glottis: &Glottis) -> Result<Frame, TubeError> {
        let t = (k * FRAME_PT) as f64 / SAMPLING_RATE as f64;
        let mut tract_params = self.tract.param_values();
        let mut glottis_params: Vec<f64> = glottis.params().control_params.iter().map(|p| p.x).collect();
        self.score.get_params(t, &mut tract_params, &mut glottis_params);
        self.tract.set_param_values(&tract_params);
        let mut tube = template.clone();
        self.tract.get_tube(&mut tube)?;
        Ok(Frame { tube, glottis_params })
    }

    fn ensure_frames(&mut self, template: &Tube, glottis: &Glottis) {
        let k = self.pos_pt / FRAME_PT;
        if matches!(&self.frames, Some((current, _, _)) if *current == k) {
            return;
        }
        let first = match self.frames.take() {
            Some((current, _, next)) if current + 1 == k => Ok(next),
            _ => self.frame(k, template, glottis),
        };
        let frames = first.and_then(|a| Ok((a, self.frame(k + 1, template, glottis)?)));
        match frames {
            Ok((a, b)) => self.frames = Some((k, a, b)),
            Err(e) => tracing::warn!(error = %e, frame = k, "vocal tract model produced an invalid tube"),
        }
    }
}

impl<S: ScoreSource, T: VocalTractModel> TubeSequence for GesturalScoreSequence<S, T> {
    fn kind(&self) -> SequenceKind {
        SequenceKind::GesturalScore
    }

    fn get_tube(&mut self, tube: &mut Tube, glottis: &Glottis) {
        self.ensure_frames(tube, glottis);
        if let Some((k, a, b)) = &self.frames {
            let ratio = (self.pos_pt - k * FRAME_PT) as f64 / FRAME_PT as f64;
            *tube = Tube::interpolate(&a.tube, &b.tube, ratio);
            self.glottis_params = a
                .glottis_params
                .iter()
                .zip(&b.glottis_params)
                .map(|(x, y)| x + ratio * (y - x))
                .collect();
        }
        apply_glottis(tube, glottis);
    }

    fn pressure_source(&self) -> Option<(f64, usize)> {
        let pressure = self
            .glottis_params
            .get(crate::glottis::PRESSURE)
            .copied()
            .unwrap_or(0.0);
        Some((pressure, FIRST_TRACHEA_SECTION))
    }

    fn inc_pos(&mut self, glottis: &mut Glottis, pressures: &[f64; 4]) {
        glottis.set_control_values(&self.glottis_params);
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
        self.frames = None;
        self.glottis_params.clear();
        glottis.reset_motion();
        glottis.calc_geometry();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glottis::{GlottisKind, PRESSURE};
    use crate::tract::AreaFunctionTract;
    use crate::tract::area_function::LD;
    use crate::tube::LAST_MOUTH_SECTION;

    /// Opens the lips linearly and raises the lung pressure.
    struct LipOpening;

    impl ScoreSource for LipOpening {
        fn duration_s(&self) -> f64 {
            0.05
        }

        fn get_params(&self, t: f64, tract: &mut [f64], glottis: &mut [f64]) {
            tract[LD] = -0.5 + 40.0 * t;
            glottis[PRESSURE] = 8000.0 * (t / 0.05).min(1.0);
        }
    }

    #[test]
    fn follows_the_score() {
        let mut sequence = GesturalScoreSequence::new(LipOpening, AreaFunctionTract::new());
        let mut glottis = Glottis::new(GlottisKind::Triangular);
        sequence.reset_sequence(&mut glottis);
        assert_eq!(sequence.duration_pt(), 2205);

        let mut tube = Tube::new();
        sequence.get_tube(&mut tube, &glottis);
        assert_eq!(tube.section(LAST_MOUTH_SECTION).area_cm2, 0.0);

        let mut last_area = 0.0;
        while !sequence.is_finished() {
            sequence.get_tube(&mut tube, &glottis);
            let area = tube.section(LAST_MOUTH_SECTION).area_cm2;
            assert!(area >= last_area - 1.0e-12);
            last_area = area;
            sequence.inc_pos(&mut glottis, &[0.0; 4]);
        }
        assert!(last_area > 1.0);
        let (p, section) = sequence.pressure_source().unwrap();
        assert!(p > 7000.0);
        assert_eq!(section, FIRST_TRACHEA_SECTION);
    }
}

//! The session object: one instance of every model plus the synthesis buffers.

use std::io::Write;
use std::ops::ControlFlow;

use tracing::{info, warn};

use crate::glottis::{Glottis, GlottisKind, GlottisModel};
use crate::glottis::triangular::{F0_DIV_Q, NATURAL_F0};
use crate::lf_pulse::LfPulse;
use crate::sequence::{StaticPhone, TubeSequence};
use crate::signal::ComplexSignal;
use crate::signal::f0::F0EstimatorYin;
use crate::synthesis::{
    CancelToken, SynthesisError, SynthesisOutputs, SynthesisProgress, SynthesisReport, SynthesisRun,
    SynthesisSettings, run_synthesis,
};
use crate::tds::TdsModel;
use crate::tl::TlModel;
use crate::tract::{AreaFunctionTract, PhoneticParams, VocalTractModel, phonetic_params_to_tract};
use crate::tube::Tube;

/// F0 values (Hz) of the calibration runs. With NATURAL_F0 and F0_DIV_Q at
/// 100 Hz they correspond to Q = 1.0, 0.7 and 1.3.
const CALIBRATION_F0: [f64; 3] = [100.0, 70.0, 130.0];
const CALIBRATION_PRESSURE_DPA: f64 = 8000.0;
const CALIBRATION_DURATION_S: f64 = 0.5;
/// Span of Q between the low and the high calibration run
const CALIBRATION_Q_SPAN: f64 = 0.6;
/// Measured F0 at or below this counts as unvoiced (Hz)
const MIN_VOICED_F0: f64 = 0.1;

/// Fit NATURAL_F0 and F0_DIV_Q from the F0 measured at Q = 1.0, 0.7 and 1.3.
pub fn fit_triangular_f0_params(measured: [f64; 3]) -> Option<(f64, f64)> {
    if measured.iter().any(|f| !(*f > MIN_VOICED_F0)) {
        return None;
    }
    let [natural, low, high] = measured;
    let f0_div_q = (high - low) / CALIBRATION_Q_SPAN;
    (f0_div_q >= 0.0).then_some((natural, f0_div_q))
}

pub struct Session {
    pub tds: TdsModel,
    pub tl: TlModel,
    glottis: Vec<Glottis>,
    selected_glottis: GlottisKind,
    pub lf_pulse: LfPulse,
    pub phonetic: PhoneticParams,
    pub tract: Box<dyn VocalTractModel + Send>,
    pub outputs: SynthesisOutputs,
    /// Spectrum of the last impulse run
    pub tds_spectrum: ComplexSignal,
    pub settings: SynthesisSettings,
    pub cancel: CancelToken,
    glottis_signals: Option<Box<dyn Write + Send>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let tl = TlModel::new();
        let mut tds = TdsModel::new();
        tds.adapt_options_from(&tl.options);
        Self {
            tds,
            tl,
            glottis: GlottisKind::ALL.iter().map(|k| Glottis::new(*k)).collect(),
            selected_glottis: GlottisKind::Triangular,
            lf_pulse: LfPulse::default(),
            phonetic: PhoneticParams::default(),
            tract: Box::new(AreaFunctionTract::new()),
            outputs: SynthesisOutputs::default(),
            tds_spectrum: ComplexSignal::default(),
            settings: SynthesisSettings::default(),
            cancel: CancelToken::new(),
            glottis_signals: None,
        }
    }

    fn glottis_slot(kind: GlottisKind) -> usize {
        GlottisKind::ALL.iter().position(|k| *k == kind).unwrap_or(0)
    }

    pub fn glottis(&self, kind: GlottisKind) -> &Glottis {
        &self.glottis[Self::glottis_slot(kind)]
    }

    pub fn glottis_mut(&mut self, kind: GlottisKind) -> &mut Glottis {
        &mut self.glottis[Self::glottis_slot(kind)]
    }

    pub fn selected_glottis_kind(&self) -> GlottisKind {
        self.selected_glottis
    }

    pub fn select_glottis(&mut self, kind: GlottisKind) {
        self.selected_glottis = kind;
    }

    pub fn selected_glottis(&self) -> &Glottis {
        self.glottis(self.selected_glottis)
    }

    pub fn selected_glottis_mut(&mut self) -> &mut Glottis {
        self.glottis_mut(self.selected_glottis)
    }

    pub fn glottis_models(&self) -> &[Glottis] {
        &self.glottis
    }

    pub fn glottis_models_mut(&mut self) -> &mut [Glottis] {
        &mut self.glottis
    }

    /// Write one row of glottis signals per sample of the following runs.
    pub fn set_glottis_signal_sink(&mut self, sink: Option<Box<dyn Write + Send>>) {
        self.glottis_signals = sink;
    }

    /// Map the phonetic parameters onto the tract model.
    pub fn apply_phonetic_params(&mut self) -> bool {
        phonetic_params_to_tract(&self.phonetic, self.tract.as_mut())
    }

    /// Tube of the current tract shape.
    pub fn tract_tube(&self) -> Result<Tube, SynthesisError> {
        let mut tube = self.tl.tube().clone();
        self.tract.get_tube(&mut tube)?;
        Ok(tube)
    }

    /// Clear the acoustic state and all buffers.
    pub fn reset_tds(&mut self) {
        self.tds.reset_motion();
        self.outputs.reset();
        self.cancel.reset();
    }

    /// Start `sequence` from the beginning with the selected glottis.
    pub fn start_synthesis<F>(
        &mut self,
        sequence: &mut (dyn TubeSequence + Send),
        on_progress: F,
    ) -> Result<SynthesisReport, SynthesisError>
    where
        F: FnMut(&SynthesisProgress, &SynthesisOutputs) -> ControlFlow<()>,
    {
        self.reset_tds();
        sequence.reset_sequence(self.selected_glottis_mut());
        self.resume_synthesis(sequence, on_progress)
    }

    /// Continue `sequence` from its current position, keeping the acoustic state.
    pub fn resume_synthesis<F>(
        &mut self,
        sequence: &mut (dyn TubeSequence + Send),
        on_progress: F,
    ) -> Result<SynthesisReport, SynthesisError>
    where
        F: FnMut(&SynthesisProgress, &SynthesisOutputs) -> ControlFlow<()>,
    {
        let slot = Self::glottis_slot(self.selected_glottis);
        let run = SynthesisRun {
            tds: &mut self.tds,
            glottis: &mut self.glottis[slot],
            sequence,
            settings: &self.settings,
            glottis_signals: self.glottis_signals.as_deref_mut(),
        };
        let report = run_synthesis(run, &mut self.outputs, &self.cancel, on_progress)?;
        if let Some(spectrum) = &report.spectrum {
            self.tds_spectrum.clone_from(spectrum);
        }
        Ok(report)
    }

    /// Synthesize a phone on a fixed tube with the user F0 and lung pressure.
    pub fn synthesize_static_phoneme(
        &mut self,
        tube: &Tube,
        duration_s: f64,
        const_f0: bool,
    ) -> Result<SynthesisReport, SynthesisError> {
        let mut phone = StaticPhone::new(
            tube,
            duration_s,
            self.settings.user_pressure_dpa,
            self.settings.user_f0_hz,
            const_f0,
        );
        self.start_synthesis(&mut phone, |_, _| ControlFlow::Continue(()))
    }

    /// Calibrate NATURAL_F0 and F0_DIV_Q of the triangular glottis.
    ///
    /// Synthesizes the current tract shape three times and measures the F0 in
    /// the middle of each run. On failure the previous values are kept.
    /// The control parameters are restored in either case.
    pub fn calc_triangular_glottis_f0_params(&mut self) -> Result<Option<(f64, f64)>, SynthesisError> {
        let tube = self.tract_tube()?;
        let selected = self.selected_glottis;
        self.selected_glottis = GlottisKind::Triangular;

        let glottis = self.glottis_mut(GlottisKind::Triangular);
        let saved_controls: Vec<f64> = glottis.params().control_params.iter().map(|p| p.x).collect();
        let saved_static = (glottis.params().static_value(NATURAL_F0), glottis.params().static_value(F0_DIV_Q));
        set_triangular_f0_params(glottis, 100.0, 100.0);

        let estimator = F0EstimatorYin::default();
        let mut measured = [0.0; 3];
        let mut result = Ok(());
        for (f0, m) in CALIBRATION_F0.iter().zip(measured.iter_mut()) {
            let mut phone = StaticPhone::new(&tube, CALIBRATION_DURATION_S, CALIBRATION_PRESSURE_DPA, *f0, true);
            if let Err(e) = self.start_synthesis(&mut phone, |_, _| ControlFlow::Continue(())) {
                result = Err(e);
                break;
            }
            let len = phone.duration_pt();
            let samples = &self.outputs.buffers.filtered_output_pressure.as_slice()[..len];
            *m = estimator.estimate_at(samples, crate::constants::SAMPLING_RATE, len / 2);
        }

        let fit = result.as_ref().ok().and_then(|_| fit_triangular_f0_params(measured));
        let glottis = self.glottis_mut(GlottisKind::Triangular);
        match fit {
            Some((natural, f0_div_q)) => {
                set_triangular_f0_params(glottis, natural, f0_div_q);
                info!(natural, f0_div_q, "calibrated the triangular glottis");
            }
            None => {
                set_triangular_f0_params(glottis, saved_static.0, saved_static.1);
                warn!(?measured, "triangular glottis calibration failed");
            }
        }
        glottis.set_control_values(&saved_controls);
        self.selected_glottis = selected;
        result.map(|_| fit)
    }

    /// Write the `<glottis_models>` section of a speaker file.
    #[cfg(feature = "speaker")]
    pub fn write_glottis_xml<W: Write>(&self, writer: &mut W, indent: usize) -> std::io::Result<()> {
        crate::speaker::write_glottis_models(writer, &self.glottis, self.selected_glottis, indent)
    }

    /// Load glottis parameters from a speaker file and select the flagged model.
    #[cfg(feature = "speaker")]
    pub fn read_glottis_xml(
        &mut self,
        input: &str,
    ) -> Result<crate::speaker::GlottisReadReport, crate::speaker::SpeakerError> {
        let report = crate::speaker::read_glottis_models(input, &mut self.glottis)?;
        if let Some(kind) = report.selected {
            self.selected_glottis = kind;
        }
        Ok(report)
    }
}

fn set_triangular_f0_params(glottis: &mut Glottis, natural: f64, f0_div_q: f64) {
    let params = glottis.params_mut();
    params.static_params[NATURAL_F0].set(natural);
    params.static_params[F0_DIV_Q].set(f0_div_q);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SAMPLING_RATE;
    use crate::sequence::ImpulseExcitation;
    use crate::sequence::ImpulsePreset;
    use crate::tube::FIRST_PHARYNX_SECTION;

    #[test]
    fn defaults() {
        let session = Session::new();
        assert_eq!(session.selected_glottis_kind(), GlottisKind::Triangular);
        assert_eq!(session.selected_glottis().kind(), GlottisKind::Triangular);
        assert_eq!(session.settings.user_probe_section(), Some(20));
        assert_eq!(session.settings.user_f0_hz, 120.0);
        assert_eq!(session.settings.user_pressure_dpa, 8000.0);
        assert_eq!(session.glottis_models().len(), 3);
        assert_eq!(session.outputs.track.len(), 60 * SAMPLING_RATE);
    }

    #[test]
    fn fit_accepts_rising_f0() {
        let (natural, f0_div_q) = fit_triangular_f0_params([110.0, 90.0, 132.0]).unwrap();
        assert_eq!(natural, 110.0);
        assert!((f0_div_q - 70.0).abs() < 1.0e-9);
    }

    #[test]
    fn fit_rejects_unvoiced_and_falling() {
        assert_eq!(fit_triangular_f0_params([110.0, 0.0, 130.0]), None);
        assert_eq!(fit_triangular_f0_params([110.0, 120.0, 100.0]), None);
        assert_eq!(fit_triangular_f0_params([110.0, f64::NAN, 130.0]), None);
        assert!(fit_triangular_f0_params([110.0, 110.0, 110.0]).is_some());
    }

    #[test]
    fn phonetic_params_reach_the_tube() {
        let mut session = Session::new();
        session.phonetic.set(crate::tract::phonetic::VELUM_POSITION, 1.0);
        assert!(session.apply_phonetic_params());
        let tube = session.tract_tube().unwrap();
        assert!(tube.velum_opening_cm2 > 0.5);
    }

    #[test]
    fn static_phoneme_fills_the_track() {
        let mut session = Session::new();
        session.select_glottis(GlottisKind::Geometric);
        let tube = session.tract_tube().unwrap();
        let report = session.synthesize_static_phoneme(&tube, 0.05, true).unwrap();
        assert_eq!(report.end_pt, 2205);
        assert!(!report.cancelled);
        let track = &session.outputs.track[..2205];
        assert!(track.iter().any(|s| *s != 0));
        assert!(session.outputs.track[2205..].iter().all(|s| *s == 0));
    }

    #[test]
    fn each_glottis_model_voices_a_static_vowel() {
        for kind in GlottisKind::ALL {
            let mut session = Session::new();
            session.select_glottis(kind);
            let tube = session.tract_tube().unwrap();
            let report = session.synthesize_static_phoneme(&tube, 0.3, true).unwrap();
            let len = report.end_pt;
            assert_eq!(len, 13230);
            let samples = &session.outputs.buffers.filtered_output_pressure.as_slice()[..len];
            let f0 = F0EstimatorYin::default().estimate_at(samples, SAMPLING_RATE, len / 2);
            assert!((60.0..=250.0).contains(&f0), "{kind:?} at {f0} Hz");
        }
    }

    #[test]
    fn triangular_calibration_fits_rising_f0() {
        let mut session = Session::new();
        session.select_glottis(GlottisKind::Geometric);
        let controls = session.glottis(GlottisKind::Triangular).params().control_params.clone();

        let (natural, f0_div_q) = session.calc_triangular_glottis_f0_params().unwrap().unwrap();
        assert!(natural > MIN_VOICED_F0);
        assert!(f0_div_q >= 0.0);

        let params = session.glottis(GlottisKind::Triangular).params();
        assert_eq!(params.static_value(NATURAL_F0), natural);
        assert_eq!(params.static_value(F0_DIV_Q), f0_div_q);
        assert_eq!(params.control_params, controls);
        assert_eq!(session.selected_glottis_kind(), GlottisKind::Geometric);
    }

    #[cfg(feature = "speaker")]
    #[test]
    fn glottis_xml_selects_the_flagged_model() {
        let mut source = Session::new();
        source.select_glottis(GlottisKind::TwoMass);
        source.glottis_mut(GlottisKind::TwoMass).set_f0(150.0);
        let mut out = Vec::new();
        source.write_glottis_xml(&mut out, 0).unwrap();

        let mut session = Session::new();
        let report = session.read_glottis_xml(std::str::from_utf8(&out).unwrap()).unwrap();
        assert!(report.issues.is_empty());
        assert_eq!(session.selected_glottis_kind(), GlottisKind::TwoMass);
        assert_eq!(session.selected_glottis().f0(), 150.0);
    }

    #[test]
    fn impulse_run_updates_the_spectrum() {
        let mut session = Session::new();
        session.settings.set_internal_probe_section(Some(FIRST_PHARYNX_SECTION)).unwrap();
        let tube = session.tract_tube().unwrap();
        let mut impulse = ImpulseExcitation::new(ImpulsePreset::SupraglottalImpedance, &tube, false);
        let report = session
            .start_synthesis(&mut impulse, |progress, _| {
                if progress.pos_pt >= 4000 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
            })
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.end_pt, 4000);
        assert!(report.spectrum.is_some());
        assert_eq!(session.tds_spectrum.len(), crate::constants::TDS_BUFFER_LENGTH);
        assert!((0..session.tds_spectrum.len()).all(|i| session.tds_spectrum.magnitude(i).is_finite()));
    }
}

//! The synthesis loop and the worker thread it runs on.
//!
//! The worker owns the output buffers while it simulates. At every progress
//! point it hands them to the controller together with the progress message
//! and blocks until it gets them back, so the two threads never touch the
//! buffers at the same time.

use std::io::Write;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::constants::{
    MIN_AREA_CM2, SAMPLING_RATE, SYNTHETIC_SPEECH_BANDWIDTH_HZ, TDS_BUFFER_EXPONENT, TDS_BUFFER_LENGTH, time_step,
};
use crate::export::{GlottisSignalRow, GlottisSignalWriter};
use crate::glottis::Glottis;
use crate::sequence::{ImpulsePreset, SequenceKind, TubeSequence};
use crate::signal::iir::IirFilter;
use crate::signal::{CircularBuffer, ComplexSignal, Signal16, SignalError, right_half_hann_window};
use crate::tds::{TdsModel, TimeStepFlow};
use crate::tube::{
    FIRST_PHARYNX_SECTION, LAST_TRACHEA_SECTION, LOWER_GLOTTIS_SECTION, NUM_SECTIONS, Tube, TubeError,
    UPPER_GLOTTIS_SECTION,
};

/// Samples between progress messages without animation
pub const PROGRESS_INTERVAL_PT: usize = 200;
/// Length of the main track (s)
pub const TRACK_DURATION_S: usize = 60;
/// Output pressure to 16-bit sample scale
const TRACK_SCALE: f64 = 0.003;
const OUTPUT_FILTER_POLES: usize = 8;
const TRANSFER_FUNCTION_FACTOR: f64 = 30.0;
const IMPEDANCE_FACTOR: f64 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("Probe section {0} is outside the tube")]
    InvalidProbeSection(usize),
    #[error("The synthesis worker panicked")]
    WorkerPanicked,
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),
    #[error("Invalid tube: {0}")]
    Tube(#[from] TubeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared flag for cooperative cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisSettings {
    speed_percent: usize,
    /// Report progress every `speed_percent` samples
    pub show_animation: bool,
    user_probe_section: Option<usize>,
    internal_probe_section: Option<usize>,
    /// F0 of static phones (Hz)
    pub user_f0_hz: f64,
    /// Lung pressure of static phones (dPa)
    pub user_pressure_dpa: f64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            speed_percent: 100,
            show_animation: false,
            user_probe_section: Some(20),
            internal_probe_section: None,
            user_f0_hz: 120.0,
            user_pressure_dpa: 8000.0,
        }
    }
}

impl SynthesisSettings {
    pub fn speed_percent(&self) -> usize {
        self.speed_percent
    }

    pub fn set_speed_percent(&mut self, speed_percent: usize) {
        self.speed_percent = speed_percent.clamp(1, 100);
    }

    pub fn user_probe_section(&self) -> Option<usize> {
        self.user_probe_section
    }

    pub fn set_user_probe_section(&mut self, section: Option<usize>) -> Result<(), SynthesisError> {
        self.user_probe_section = check_section(section)?;
        Ok(())
    }

    pub fn internal_probe_section(&self) -> Option<usize> {
        self.internal_probe_section
    }

    pub fn set_internal_probe_section(&mut self, section: Option<usize>) -> Result<(), SynthesisError> {
        self.internal_probe_section = check_section(section)?;
        Ok(())
    }

    fn progress_interval(&self) -> usize {
        if self.show_animation {
            self.speed_percent.clamp(1, 100)
        } else {
            PROGRESS_INTERVAL_PT
        }
    }
}

fn check_section(section: Option<usize>) -> Result<Option<usize>, SynthesisError> {
    match section {
        Some(s) if s >= NUM_SECTIONS => Err(SynthesisError::InvalidProbeSection(s)),
        _ => Ok(section),
    }
}

/// Ring buffers of the last [`TDS_BUFFER_LENGTH`] simulated samples.
#[derive(Debug, Clone)]
pub struct TdsBuffers {
    pub output_flow: CircularBuffer<f64>,
    /// Radiated pressure, the time derivative of the output flow
    pub output_pressure: CircularBuffer<f64>,
    pub filtered_output_pressure: CircularBuffer<f64>,
    pub user_probe_flow: CircularBuffer<f64>,
    pub user_probe_pressure: CircularBuffer<f64>,
    pub user_probe_area: CircularBuffer<f64>,
    pub user_probe_velocity: CircularBuffer<f64>,
    pub internal_probe_flow: CircularBuffer<f64>,
    pub internal_probe_pressure: CircularBuffer<f64>,
    output_pressure_filter: IirFilter,
}

impl Default for TdsBuffers {
    fn default() -> Self {
        let buffer = || CircularBuffer::with_exponent(TDS_BUFFER_EXPONENT);
        Self {
            output_flow: buffer(),
            output_pressure: buffer(),
            filtered_output_pressure: buffer(),
            user_probe_flow: buffer(),
            user_probe_pressure: buffer(),
            user_probe_area: buffer(),
            user_probe_velocity: buffer(),
            internal_probe_flow: buffer(),
            internal_probe_pressure: buffer(),
            output_pressure_filter: IirFilter::chebyshev_lowpass(
                SYNTHETIC_SPEECH_BANDWIDTH_HZ / SAMPLING_RATE as f64,
                OUTPUT_FILTER_POLES,
            ),
        }
    }
}

impl TdsBuffers {
    pub fn reset(&mut self) {
        for buffer in [
            &mut self.output_flow,
            &mut self.output_pressure,
            &mut self.filtered_output_pressure,
            &mut self.user_probe_flow,
            &mut self.user_probe_pressure,
            &mut self.user_probe_area,
            &mut self.user_probe_velocity,
            &mut self.internal_probe_flow,
            &mut self.internal_probe_pressure,
        ] {
            buffer.reset();
        }
        self.output_pressure_filter.reset_buffers();
    }
}

/// Everything the synthesis loop writes.
#[derive(Debug, Clone)]
pub struct SynthesisOutputs {
    pub buffers: TdsBuffers,
    /// Filtered radiated pressure as 16-bit samples, indexed by sequence position
    pub track: Signal16,
}

impl Default for SynthesisOutputs {
    fn default() -> Self {
        Self {
            buffers: TdsBuffers::default(),
            track: Signal16::new(TRACK_DURATION_S * SAMPLING_RATE),
        }
    }
}

impl SynthesisOutputs {
    pub fn reset(&mut self) {
        self.buffers.reset();
        let len = self.track.len();
        self.track.reset(len);
    }

    /// Store the results of sample `pos`. Returns the filtered output pressure.
    fn record(&mut self, pos: usize, flow: &TimeStepFlow, tds: &TdsModel, settings: &SynthesisSettings) -> f64 {
        let b = &mut self.buffers;
        b.output_flow.set(pos, flow.total);
        let pressure = (flow.total - b.output_flow.get(pos.wrapping_sub(1))) / time_step();
        b.output_pressure.set(pos, pressure);
        let filtered = b.output_pressure_filter.output_sample(pressure);
        b.filtered_output_pressure.set(pos, filtered);
        self.track.set_value(pos, filtered * TRACK_SCALE);

        if let Some(section) = settings.user_probe_section {
            let (inflow, _) = tds.section_flow(section);
            let area = tds.section(section).area_cm2.max(MIN_AREA_CM2);
            b.user_probe_flow.set(pos, inflow);
            b.user_probe_pressure.set(pos, tds.section_pressure(section));
            b.user_probe_area.set(pos, area);
            b.user_probe_velocity.set(pos, inflow / area);
        }
        if let Some(section) = settings.internal_probe_section {
            let (inflow, _) = tds.section_flow(section);
            b.internal_probe_flow.set(pos, inflow);
            b.internal_probe_pressure.set(pos, tds.section_pressure(section));
        }
        filtered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisProgress {
    pub pos_pt: usize,
    pub percent: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisReport {
    pub start_pt: usize,
    /// Position of the sequence when the loop ended
    pub end_pt: usize,
    pub cancelled: bool,
    /// Spectrum of the impulse response for impulse runs
    pub spectrum: Option<ComplexSignal>,
}

/// Mutable state lent to one synthesis run.
pub struct SynthesisRun<'a> {
    pub tds: &'a mut TdsModel,
    pub glottis: &'a mut Glottis,
    pub sequence: &'a mut (dyn TubeSequence + Send),
    pub settings: &'a SynthesisSettings,
    /// Receives one row of glottis signals per sample
    pub glottis_signals: Option<&'a mut (dyn Write + Send + 'static)>,
}

struct ProgressMessage {
    progress: SynthesisProgress,
    outputs: SynthesisOutputs,
}

/// Run `run.sequence` from its current position to its end on a worker thread.
///
/// `on_progress` is called on the calling thread at every progress point while
/// the worker waits; returning [`ControlFlow::Break`] cancels the run. A
/// cancelled run keeps everything simulated so far.
pub fn run_synthesis<F>(
    run: SynthesisRun<'_>,
    outputs: &mut SynthesisOutputs,
    cancel: &CancelToken,
    mut on_progress: F,
) -> Result<SynthesisReport, SynthesisError>
where
    F: FnMut(&SynthesisProgress, &SynthesisOutputs) -> ControlFlow<()>,
{
    let (progress_tx, progress_rx) = mpsc::sync_channel::<ProgressMessage>(0);
    let (ack_tx, ack_rx) = mpsc::sync_channel::<SynthesisOutputs>(0);
    let worker_outputs = std::mem::take(outputs);
    let worker_cancel = cancel.clone();

    let joined = std::thread::scope(|s| {
        let worker = s.spawn(move || synthesis_loop(run, worker_outputs, &worker_cancel, &progress_tx, &ack_rx));
        for message in progress_rx.iter() {
            if on_progress(&message.progress, &message.outputs).is_break() {
                cancel.cancel();
            }
            if ack_tx.send(message.outputs).is_err() {
                break;
            }
        }
        worker.join()
    });

    match joined {
        Ok((worker_outputs, report)) => {
            *outputs = worker_outputs;
            Ok(report)
        }
        Err(_) => {
            error!("synthesis worker panicked");
            Err(SynthesisError::WorkerPanicked)
        }
    }
}

/// The worker side of [`run_synthesis`].
fn synthesis_loop(
    run: SynthesisRun<'_>,
    mut outputs: SynthesisOutputs,
    cancel: &CancelToken,
    progress_tx: &SyncSender<ProgressMessage>,
    ack_rx: &Receiver<SynthesisOutputs>,
) -> (SynthesisOutputs, SynthesisReport) {
    let SynthesisRun {
        tds,
        glottis,
        sequence,
        settings,
        glottis_signals,
    } = run;

    // Impedance measurements record the pressure at the excited section.
    let routed;
    let settings = match sequence.kind() {
        SequenceKind::Impulse(preset) if preset.probe_section().is_some() => {
            routed = SynthesisSettings {
                internal_probe_section: preset.probe_section(),
                ..settings.clone()
            };
            &routed
        }
        _ => settings,
    };

    let duration = sequence.duration_pt();
    let start = sequence.pos_pt();
    let interval = settings.progress_interval();
    let mut signals = glottis_signals.and_then(|w| match GlottisSignalWriter::new(w, glottis) {
        Ok(writer) => Some(writer),
        Err(e) => {
            warn!(error = %e, "cannot write the glottis signals");
            None
        }
    });

    let started = std::time::Instant::now();
    let mut tube = tds.tube().clone();
    let mut pos = start;
    while pos < duration && !cancel.is_cancelled() {
        if pos % interval == 0 {
            let message = ProgressMessage {
                progress: SynthesisProgress {
                    pos_pt: pos,
                    percent: 100 * pos / duration,
                },
                outputs,
            };
            if let Err(mpsc::SendError(message)) = progress_tx.send(message) {
                outputs = message.outputs;
                break;
            }
            match ack_rx.recv() {
                Ok(returned) => outputs = returned,
                Err(_) => {
                    error!("controller went away during a progress rendezvous");
                    return (SynthesisOutputs::default(), report(start, pos, true, None));
                }
            }
            if cancel.is_cancelled() {
                break;
            }
        }

        let pressures = simulate_step(tds, glottis, sequence, &mut tube, pos);
        let flow = tds.proceed_time_step();
        let output_pressure = outputs.record(pos, &flow, tds, settings);

        if let Some(writer) = signals.as_mut() {
            let row = GlottisSignalRow {
                glottis_flow: tds.section_flow(UPPER_GLOTTIS_SECTION).0,
                pressures,
                flow,
                output_pressure,
            };
            if let Err(e) = writer.write_row(glottis, &row) {
                warn!(error = %e, "stopped writing the glottis signals");
                signals = None;
            }
        }
        pos += 1;
    }
    info!(samples = pos - start, elapsed_ms = started.elapsed().as_millis() as u64, "synthesis finished");

    let cancelled = pos < duration;
    let spectrum = match sequence.kind() {
        SequenceKind::Impulse(preset) if pos > 0 => match impulse_spectrum(preset, &outputs.buffers) {
            Ok(spectrum) => Some(spectrum),
            Err(e) => {
                warn!(error = %e, "impulse response analysis failed");
                None
            }
        },
        _ => None,
    };
    (outputs, report(start, pos, cancelled, spectrum))
}

fn report(start_pt: usize, end_pt: usize, cancelled: bool, spectrum: Option<ComplexSignal>) -> SynthesisReport {
    SynthesisReport {
        start_pt,
        end_pt,
        cancelled,
        spectrum,
    }
}

/// Hand the geometry and sources of sample `pos` to the TDS and advance the
/// sequence. Returns the glottis pressures the sequence was given.
fn simulate_step(
    tds: &mut TdsModel,
    glottis: &mut Glottis,
    sequence: &mut (dyn TubeSequence + Send),
    tube: &mut Tube,
    pos: usize,
) -> [f64; 4] {
    sequence.get_tube(tube, glottis);
    let (flow, flow_section) = sequence.flow_source().map_or((0.0, None), |(v, s)| (v, Some(s)));
    let (pressure, pressure_section) = sequence.pressure_source().map_or((0.0, None), |(v, s)| (v, Some(s)));

    tds.set_tube(tube, pos > 0);
    tds.set_flow_source(flow, flow_section);
    tds.set_pressure_source(pressure, pressure_section);

    let pressures = [LAST_TRACHEA_SECTION, LOWER_GLOTTIS_SECTION, UPPER_GLOTTIS_SECTION, FIRST_PHARYNX_SECTION]
        .map(|s| tds.section_pressure(s));
    sequence.inc_pos(glottis, &pressures);
    pressures
}

/// Spectrum of the impulse response held in the buffers: low passed,
/// faded out with the right half of a Hann window and scaled.
pub fn impulse_spectrum(preset: ImpulsePreset, buffers: &TdsBuffers) -> Result<ComplexSignal, SignalError> {
    let (source, factor) = match preset {
        ImpulsePreset::TransferFunction => (&buffers.output_flow, TRANSFER_FUNCTION_FACTOR),
        ImpulsePreset::SubglottalImpedance | ImpulsePreset::SupraglottalImpedance => {
            (&buffers.internal_probe_pressure, IMPEDANCE_FACTOR)
        }
    };
    let mut response: Vec<f64> = source.as_slice()[..TDS_BUFFER_LENGTH].to_vec();
    IirFilter::chebyshev_lowpass(SYNTHETIC_SPEECH_BANDWIDTH_HZ / SAMPLING_RATE as f64, OUTPUT_FILTER_POLES)
        .filter_in_place(&mut response);
    for (x, w) in response.iter_mut().zip(right_half_hann_window(TDS_BUFFER_LENGTH)) {
        *x *= w;
    }
    let mut spectrum = ComplexSignal::from_real(&response, TDS_BUFFER_LENGTH)?;
    spectrum.scale(factor);
    debug!(?preset, "computed impulse response spectrum");
    Ok(spectrum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glottis::GlottisKind;
    use crate::sequence::{ImpulseExcitation, StaticPhone};

    fn short_phone(duration_s: f64) -> StaticPhone {
        StaticPhone::new(&Tube::new(), duration_s, 8000.0, 120.0, false)
    }

    #[test]
    fn speed_is_clamped() {
        let mut settings = SynthesisSettings::default();
        settings.set_speed_percent(0);
        assert_eq!(settings.speed_percent(), 1);
        settings.set_speed_percent(500);
        assert_eq!(settings.speed_percent(), 100);
        assert!(matches!(
            settings.set_user_probe_section(Some(NUM_SECTIONS)),
            Err(SynthesisError::InvalidProbeSection(_))
        ));
        assert_eq!(settings.user_probe_section(), Some(20));
        settings.set_internal_probe_section(None).unwrap();
    }

    #[test]
    fn progress_alternates_with_the_worker() {
        let mut tds = TdsModel::new();
        let mut glottis = Glottis::new(GlottisKind::Geometric);
        let mut phone = short_phone(0.02);
        phone.reset_sequence(&mut glottis);
        let settings = SynthesisSettings::default();
        let mut outputs = SynthesisOutputs::default();
        let mut seen = Vec::new();

        let run = SynthesisRun {
            tds: &mut tds,
            glottis: &mut glottis,
            sequence: &mut phone,
            settings: &settings,
            glottis_signals: None,
        };
        let report = run_synthesis(run, &mut outputs, &CancelToken::new(), |progress, _| {
            seen.push(progress.pos_pt);
            ControlFlow::Continue(())
        })
        .unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.end_pt, 882);
        assert_eq!(seen, vec![0, 200, 400, 600, 800]);
        assert!(report.spectrum.is_none());
        assert!(outputs.buffers.output_flow.as_slice()[..882].iter().all(|x| x.is_finite()));
        assert!(outputs.buffers.user_probe_area.as_slice()[..882].iter().all(|a| *a >= MIN_AREA_CM2));
    }

    #[test]
    fn cancel_keeps_partial_results_and_resumes() {
        let mut tds = TdsModel::new();
        let mut glottis = Glottis::new(GlottisKind::Geometric);
        let mut phone = short_phone(0.02);
        phone.reset_sequence(&mut glottis);
        let mut settings = SynthesisSettings::default();
        settings.show_animation = true;
        settings.set_speed_percent(50);
        let mut outputs = SynthesisOutputs::default();
        let cancel = CancelToken::new();

        let run = SynthesisRun {
            tds: &mut tds,
            glottis: &mut glottis,
            sequence: &mut phone,
            settings: &settings,
            glottis_signals: None,
        };
        let report = run_synthesis(run, &mut outputs, &cancel, |progress, _| {
            if progress.pos_pt >= 300 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        })
        .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.end_pt, 300);
        assert_eq!(phone.pos_pt(), 300);

        cancel.reset();
        let mut calls = 0;
        let run = SynthesisRun {
            tds: &mut tds,
            glottis: &mut glottis,
            sequence: &mut phone,
            settings: &settings,
            glottis_signals: None,
        };
        let report = run_synthesis(run, &mut outputs, &cancel, |_, _| {
            calls += 1;
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(report.start_pt, 300);
        assert_eq!(report.end_pt, 882);
        assert!(!report.cancelled);
        assert_eq!(calls, 12);
    }

    #[test]
    fn aborted_impulse_run_has_no_spectrum() {
        let mut tds = TdsModel::new();
        let mut glottis = Glottis::new(GlottisKind::Geometric);
        let mut impulse = ImpulseExcitation::new(ImpulsePreset::TransferFunction, &Tube::new(), false);
        let settings = SynthesisSettings::default();
        let mut outputs = SynthesisOutputs::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let run = SynthesisRun {
            tds: &mut tds,
            glottis: &mut glottis,
            sequence: &mut impulse,
            settings: &settings,
            glottis_signals: None,
        };
        let report = run_synthesis(run, &mut outputs, &cancel, |_, _| ControlFlow::Continue(())).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.end_pt, 0);
        assert!(report.spectrum.is_none());
    }

    #[test]
    fn impedance_runs_record_the_excited_section() {
        for preset in [ImpulsePreset::SubglottalImpedance, ImpulsePreset::SupraglottalImpedance] {
            let mut tds = TdsModel::new();
            let mut glottis = Glottis::new(GlottisKind::Geometric);
            let mut impulse = ImpulseExcitation::new(preset, &Tube::new(), false);
            let settings = SynthesisSettings::default();
            assert_eq!(settings.internal_probe_section(), None);
            let mut outputs = SynthesisOutputs::default();

            let run = SynthesisRun {
                tds: &mut tds,
                glottis: &mut glottis,
                sequence: &mut impulse,
                settings: &settings,
                glottis_signals: None,
            };
            let report = run_synthesis(run, &mut outputs, &CancelToken::new(), |progress, _| {
                if progress.pos_pt >= 2000 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
            })
            .unwrap();
            assert_eq!(report.end_pt, 2000);
            let recorded = &outputs.buffers.internal_probe_pressure.as_slice()[..2000];
            assert!(recorded.iter().any(|p| *p != 0.0), "{preset:?}");
            let spectrum = report.spectrum.unwrap();
            let peak = (0..spectrum.len() / 2).map(|i| spectrum.magnitude(i)).fold(0.0, f64::max);
            assert!(peak > 0.0 && peak.is_finite(), "{preset:?}: {peak}");
        }
    }

    #[test]
    fn glottis_signals_are_written() {
        let mut tds = TdsModel::new();
        let mut glottis = Glottis::new(GlottisKind::TwoMass);
        let mut phone = short_phone(0.005);
        phone.reset_sequence(&mut glottis);
        let settings = SynthesisSettings::default();
        let mut outputs = SynthesisOutputs::default();
        let mut sink: Vec<u8> = Vec::new();

        let run = SynthesisRun {
            tds: &mut tds,
            glottis: &mut glottis,
            sequence: &mut phone,
            settings: &settings,
            glottis_signals: Some(&mut sink),
        };
        run_synthesis(run, &mut outputs, &CancelToken::new(), |_, _| ControlFlow::Continue(())).unwrap();
        let text = String::from_utf8(sink).unwrap();
        assert_eq!(text.lines().count(), 1 + 221);
    }

    #[test]
    fn impulse_spectrum_of_a_delta() {
        let mut buffers = TdsBuffers::default();
        buffers.output_flow.set(0, 1.0);
        let spectrum = impulse_spectrum(ImpulsePreset::TransferFunction, &buffers).unwrap();
        assert_eq!(spectrum.len(), TDS_BUFFER_LENGTH);
        // The low pass keeps the low frequencies of a unit impulse at unit gain.
        assert!((spectrum.magnitude(10) - TRANSFER_FUNCTION_FACTOR).abs() < 0.5);
        assert!(spectrum.magnitude(TDS_BUFFER_LENGTH / 2) < 1.0);
    }
}

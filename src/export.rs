//! Plain text exports. Every writer takes any [`std::io::Write`]; opening and
//! closing files is left to the caller.

use std::io::{self, Write};

use crate::constants::SAMPLING_RATE;
use crate::glottis::{Glottis, GlottisModel};
use crate::sequence::ScoreSource;
use crate::signal::{ComplexSignal, SignalError};
use crate::tds::TimeStepFlow;
use crate::tl::{SpectrumType, TRANSFER_FUNCTION_SECTION, TlModel};
use crate::tract::VocalTractModel;
use crate::tube::TubeError;

/// Points of an exported transfer function
pub const TRANSFER_FUNCTION_LENGTH: usize = 8192;
pub const TRANSFER_FUNCTION_FRAMES_PER_S: f64 = 1000.0;
/// Decimal places of exported magnitudes and phases
pub const TRANSFER_FUNCTION_PRECISION: usize = 5;
/// Time between two rows of an EMA export (s)
pub const EMA_FRAME_S: f64 = 0.005;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),
    #[error("Invalid tube: {0}")]
    Tube(#[from] TubeError),
    #[error("The score is empty")]
    EmptyScore,
}

fn frame_count(duration_s: f64, frames_per_s: f64) -> Result<usize, ExportError> {
    let frames = (duration_s * frames_per_s).floor();
    if !(frames >= 1.0) {
        return Err(ExportError::EmptyScore);
    }
    Ok(frames as usize)
}

/// Set the tract to the score's parameters at `t`.
fn apply_score<S: ScoreSource, T: VocalTractModel + ?Sized>(score: &S, tract: &mut T, glottis: &Glottis, t: f64) {
    let mut tract_params = tract.param_values();
    let mut glottis_params: Vec<f64> = glottis.params().control_params.iter().map(|p| p.x).collect();
    score.get_params(t, &mut tract_params, &mut glottis_params);
    tract.set_param_values(&tract_params);
}

/// Volume velocity transfer functions of a score, one frame per millisecond.
///
/// The header line holds the number of frames, the number of points and the
/// sampling rate. Each frame is a line of magnitudes followed by a line of
/// phases for the frequencies `k * SAMPLING_RATE / len`, `k` in `0..len`.
/// Returns the number of frames written.
pub fn write_transfer_functions<W, S, T>(
    writer: &mut W,
    score: &S,
    tract: &mut T,
    glottis: &Glottis,
    tl: &mut TlModel,
    len: usize,
) -> Result<usize, ExportError>
where
    W: Write,
    S: ScoreSource,
    T: VocalTractModel + ?Sized,
{
    let frames = frame_count(score.duration_s(), TRANSFER_FUNCTION_FRAMES_PER_S)?;
    writeln!(writer, "{frames} {len} {SAMPLING_RATE}")?;

    let mut spectrum = ComplexSignal::new(len);
    for k in 0..frames {
        apply_score(score, tract, glottis, k as f64 / TRANSFER_FUNCTION_FRAMES_PER_S);
        let mut tube = tl.tube().clone();
        tract.get_tube(&mut tube)?;
        tl.set_tube(&tube);
        tl.spectrum(SpectrumType::FlowSourceTf, &mut spectrum, len, TRANSFER_FUNCTION_SECTION);

        write_line(writer, (0..len).map(|i| spectrum.magnitude(i)))?;
        write_line(writer, (0..len).map(|i| spectrum.phase(i)))?;
    }
    Ok(frames)
}

fn write_line<W: Write>(writer: &mut W, values: impl Iterator<Item = f64>) -> io::Result<()> {
    for (i, v) in values.enumerate() {
        if i > 0 {
            writer.write_all(b" ")?;
        }
        write!(writer, "{v:.prec$}", prec = TRANSFER_FUNCTION_PRECISION)?;
    }
    writeln!(writer)
}

/// Virtual EMA sensor trajectories of a score, one row every [`EMA_FRAME_S`].
/// Returns the number of rows written.
pub fn write_ema_trajectories<W, S, T>(
    writer: &mut W,
    score: &S,
    tract: &mut T,
    glottis: &Glottis,
) -> Result<usize, ExportError>
where
    W: Write,
    S: ScoreSource,
    T: VocalTractModel + ?Sized,
{
    let frames = frame_count(score.duration_s(), 1.0 / EMA_FRAME_S)?;

    write!(writer, "time[s]")?;
    for p in tract.ema_points() {
        write!(writer, " {0}-x[cm] {0}-y[cm]", p.name)?;
    }
    writeln!(writer)?;

    for k in 0..frames {
        let t = k as f64 * EMA_FRAME_S;
        apply_score(score, tract, glottis, t);
        write!(writer, "{t:.3}")?;
        for p in tract.ema_points() {
            write!(writer, " {:.4} {:.4}", p.x_cm, p.y_cm)?;
        }
        writeln!(writer)?;
    }
    Ok(frames)
}

/// Everything besides the glottis parameters that goes into one row of a
/// glottis signal export.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlottisSignalRow {
    /// Flow through the upper glottis section (cm^3/s)
    pub glottis_flow: f64,
    /// Subglottal, lower glottis, upper glottis and supraglottal pressures (dPa)
    pub pressures: [f64; 4],
    pub flow: TimeStepFlow,
    /// Filtered radiated pressure
    pub output_pressure: f64,
}

/// Writes one row of glottis signals per simulated sample.
pub struct GlottisSignalWriter<W: Write> {
    writer: W,
}

impl<W: Write> GlottisSignalWriter<W> {
    /// Write the header for `glottis` and return the writer.
    pub fn new(mut writer: W, glottis: &Glottis) -> io::Result<Self> {
        let mut names = glottis.print_param_names();
        names.extend(
            [
                "glottis_flow[cm3/s]",
                "p_subglottal[dPa]",
                "p_lower_glottis[dPa]",
                "p_upper_glottis[dPa]",
                "p_supraglottal[dPa]",
                "mouth_flow[cm3/s]",
                "nostril_flow[cm3/s]",
                "skin_flow[cm3/s]",
                "output_pressure[dPa]",
            ]
            .map(String::from),
        );
        writeln!(writer, "{}", names.join(" "))?;
        Ok(Self { writer })
    }

    pub fn write_row(&mut self, glottis: &Glottis, row: &GlottisSignalRow) -> io::Result<()> {
        let mut values = glottis.print_param_values();
        values.push(row.glottis_flow);
        values.extend_from_slice(&row.pressures);
        values.extend([row.flow.mouth, row.flow.nostril, row.flow.skin, row.output_pressure]);
        let line: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
        writeln!(self.writer, "{}", line.join(" "))
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glottis::GlottisKind;
    use crate::tract::AreaFunctionTract;
    use crate::tract::area_function::TCY;

    struct Raise;

    impl ScoreSource for Raise {
        fn duration_s(&self) -> f64 {
            0.02
        }

        fn get_params(&self, t: f64, tract: &mut [f64], _glottis: &mut [f64]) {
            tract[TCY] = -1.46 + 20.0 * t;
        }
    }

    struct Empty;

    impl ScoreSource for Empty {
        fn duration_s(&self) -> f64 {
            0.0
        }

        fn get_params(&self, _t: f64, _tract: &mut [f64], _glottis: &mut [f64]) {}
    }

    #[test]
    fn transfer_function_layout() {
        let mut out = Vec::new();
        let mut tract = AreaFunctionTract::new();
        let glottis = Glottis::new(GlottisKind::Triangular);
        let mut tl = TlModel::new();
        let frames = write_transfer_functions(&mut out, &Raise, &mut tract, &glottis, &mut tl, 64).unwrap();
        assert_eq!(frames, 20);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "20 64 44100");
        assert_eq!(lines.len(), 1 + 2 * frames);
        for line in &lines[1..] {
            let values: Vec<f64> = line.split(' ').map(|v| v.parse().unwrap()).collect();
            assert_eq!(values.len(), 64);
            assert!(values.iter().all(|v| v.is_finite()));
            assert!(line.split(' ').all(|v| v.split('.').nth(1).is_some_and(|d| d.len() == 5)));
        }
    }

    #[test]
    fn ema_rows() {
        let mut out = Vec::new();
        let mut tract = AreaFunctionTract::new();
        let glottis = Glottis::new(GlottisKind::Geometric);
        let rows = write_ema_trajectories(&mut out, &Raise, &mut tract, &glottis).unwrap();
        assert_eq!(rows, 4);

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("time[s] tongue-body-x[cm] tongue-body-y[cm]"));
        let columns = header.split(' ').count();
        let rows: Vec<&str> = lines.collect();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.split(' ').count() == columns));
        assert!(rows[1].starts_with("0.005 "));
    }

    #[test]
    fn empty_score_is_rejected() {
        let mut tract = AreaFunctionTract::new();
        let glottis = Glottis::new(GlottisKind::Geometric);
        let result = write_ema_trajectories(&mut Vec::new(), &Empty, &mut tract, &glottis);
        assert!(matches!(result, Err(ExportError::EmptyScore)));
    }

    #[test]
    fn glottis_rows_match_header() {
        let glottis = Glottis::new(GlottisKind::TwoMass);
        let mut writer = GlottisSignalWriter::new(Vec::new(), &glottis).unwrap();
        writer.write_row(&glottis, &GlottisSignalRow::default()).unwrap();
        writer.write_row(&glottis, &GlottisSignalRow::default()).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let columns = lines[0].split(' ').count();
        assert_eq!(columns, glottis.print_param_names().len() + 9);
        assert!(lines[1..].iter().all(|l| l.split(' ').count() == columns));
    }
}

use std::error::Error;

use vocaltube::constants::SAMPLING_RATE;
use vocaltube::glottis::GlottisKind;
use vocaltube::session::Session;

/// Usage: vocaltube [shape] [output.wav]
fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let shape = args.next().unwrap_or_else(|| "a".to_string());
    let path = args.next().unwrap_or_else(|| format!("{shape}.wav"));

    let mut session = Session::new();
    if !session.tract.apply_shape(&shape) {
        return Err(format!("unknown vocal tract shape '{shape}'").into());
    }
    session.select_glottis(GlottisKind::Triangular);
    let tube = session.tract_tube()?;

    let report = session.synthesize_static_phoneme(&tube, 0.6, false)?;
    session.outputs.track.normalize_amplitude(report.start_pt..report.end_pt);

    let mut writer = hound::WavWriter::create(
        &path,
        hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLING_RATE as u32,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        },
    )?;
    for sample in &session.outputs.track[report.start_pt..report.end_pt] {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    println!("{} samples written to {path}", report.end_pt - report.start_pt);
    Ok(())
}

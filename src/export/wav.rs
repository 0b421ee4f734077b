//! WAV rendering

use super::{apply_fade_out, normalize_samples, ExportConfig};
use crate::{AudioDispatcher, ChiprollError, Result};
use std::path::Path;
use tracing::info;

/// Render `seconds` of the dispatcher's output to a 16-bit stereo WAV.
///
/// Rendering stops early when playback stops, for example at the end of a
/// MIDI sequence. Returns the number of frames written.
pub fn render_wav<P: AsRef<Path>>(
    dispatcher: &mut AudioDispatcher,
    output_path: P,
    seconds: f64,
) -> Result<usize> {
    render_wav_with_config(dispatcher, output_path, seconds, &ExportConfig::default())
}

/// [`render_wav`] with post-processing options.
pub fn render_wav_with_config<P: AsRef<Path>>(
    dispatcher: &mut AudioDispatcher,
    output_path: P,
    seconds: f64,
    config: &ExportConfig,
) -> Result<usize> {
    let sample_rate = dispatcher.sample_rate();
    let total_frames = (seconds.max(0.0) * f64::from(sample_rate)) as usize;
    let block_frames = dispatcher.block_frames();

    let mut samples = Vec::with_capacity(total_frames * 2);
    let mut block = vec![0.0f32; block_frames * 2];
    let mut rendered = 0;
    while rendered < total_frames {
        if config.stop_at_end && rendered > 0 && !dispatcher.is_playing() {
            break;
        }
        let frames = block_frames.min(total_frames - rendered);
        let out = &mut block[..frames * 2];
        dispatcher.render(out);
        samples.extend_from_slice(out);
        rendered += frames;
    }

    if config.normalize {
        normalize_samples(&mut samples);
    }
    apply_fade_out(&mut samples, config.fade_out_duration, sample_rate);

    write_wav_file(output_path.as_ref(), &samples, sample_rate)?;
    info!(
        path = %output_path.as_ref().display(),
        frames = rendered,
        "WAV export complete"
    );
    Ok(rendered)
}

fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| ChiprollError::ExportError(format!("failed to create WAV file: {}", e)))?;
    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| ChiprollError::ExportError(format!("failed to write sample: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| ChiprollError::ExportError(format!("failed to finalize WAV file: {}", e)))?;
    Ok(())
}

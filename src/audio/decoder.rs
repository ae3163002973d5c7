use std::fs::File;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::resample::linear_resample;
use super::Waveform;

/// Decode `path` to mono samples at its native rate.
pub fn decode_file(path: &Path) -> Result<Waveform> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unrecognised audio container {}", path.display()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("no decodable audio track")?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .context("audio track does not declare a sample rate")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("failed to create audio decoder")?;

    let mut mono = Vec::new();
    let mut interleaved: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(err).context("failed to read audio packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .context("failed to decode audio packet")?;
        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let too_small = interleaved
            .as_ref()
            .map_or(true, |buffer| buffer.capacity() < decoded.capacity() * channels);
        if too_small {
            interleaved = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        let Some(buffer) = interleaved.as_mut() else {
            continue;
        };
        buffer.copy_interleaved_ref(decoded);
        mono.extend(
            buffer
                .samples()
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    Ok(Waveform {
        samples: mono,
        sample_rate,
    })
}

/// Decode `path` and resample it to `target_rate`.
///
/// Corrupt or unreadable input is reported as an error, never a panic.
pub fn load(path: &Path, target_rate: u32) -> Result<Waveform> {
    let native = decode_file(path)?;
    ensure!(
        !native.samples.is_empty(),
        "audio file {} contains no samples",
        path.display()
    );
    if native.sample_rate == target_rate {
        return Ok(native);
    }
    let samples = linear_resample(&native.samples, native.sample_rate, target_rate)
        .with_context(|| {
            format!(
                "failed to resample {} from {} Hz to {} Hz",
                path.display(),
                native.sample_rate,
                target_rate
            )
        })?;
    Ok(Waveform {
        samples,
        sample_rate: target_rate,
    })
}

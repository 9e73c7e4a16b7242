//! Audio file decoding, resampling and WAV writing
//!
//! Decoding uses symphonia (MP3, FLAC, AAC, WAV, OGG, ...), resampling uses
//! rubato, writing uses hound. All functions here are blocking; async callers
//! go through `spawn_blocking`.

use crate::error::{PipelineError, PipelineResult};
use crate::models::AudioBuffer;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decode an audio file to planar f32 at its native sample rate
pub fn decode_audio_file(file_path: &Path) -> PipelineResult<AudioBuffer> {
    tracing::debug!(path = %file_path.display(), "Decoding audio file");

    let file = std::fs::File::open(file_path).map_err(|e| {
        PipelineError::Audio(format!("Failed to open {}: {}", file_path.display(), e))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PipelineError::Audio(format!("Failed to probe {}: {}", file_path.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PipelineError::Audio(format!("No audio track in {}", file_path.display())))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::Audio("Sample rate unknown".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::Audio(format!("Failed to create decoder: {}", e)))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(PipelineError::Audio(format!("Error reading packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(path = %file_path.display(), error = %e, "Skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(PipelineError::Audio(format!("Decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        let channel_count = spec.channels.count();
        if channels.is_empty() {
            channels = vec![Vec::new(); channel_count];
        }

        let too_small = sample_buf
            .as_ref()
            .map(|b| b.capacity() < decoded.capacity() * channel_count)
            .unwrap_or(true);
        if too_small {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        for frame in buf.samples().chunks_exact(channel_count) {
            for (ch, sample) in frame.iter().enumerate() {
                channels[ch].push(*sample);
            }
        }
    }

    let buffer = AudioBuffer::new(channels, sample_rate);
    tracing::debug!(
        path = %file_path.display(),
        sample_rate,
        channels = buffer.channel_count(),
        duration_seconds = format!("{:.2}", buffer.duration_secs()),
        "Audio decoding complete"
    );
    Ok(buffer)
}

/// Resample every channel to `target_rate`
///
/// Returns the input unchanged when it is already at the target rate.
pub fn resample(buffer: AudioBuffer, target_rate: u32) -> PipelineResult<AudioBuffer> {
    if buffer.sample_rate == target_rate || buffer.frames() == 0 {
        return Ok(AudioBuffer::new(buffer.channels, target_rate));
    }

    tracing::debug!(
        from = buffer.sample_rate,
        to = target_rate,
        channels = buffer.channel_count(),
        "Resampling audio"
    );

    let mut resampler = FastFixedIn::<f32>::new(
        target_rate as f64 / buffer.sample_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        buffer.frames(),
        buffer.channel_count(),
    )
    .map_err(|e| PipelineError::Audio(format!("Failed to create resampler: {}", e)))?;

    let output = resampler
        .process(&buffer.channels, None)
        .map_err(|e| PipelineError::Audio(format!("Resampling failed: {}", e)))?;

    Ok(AudioBuffer::new(output, target_rate))
}

/// Write a buffer as a 32-bit float WAV file
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: buffer.channel_count().max(1) as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let audio_err = |e: hound::Error| PipelineError::Audio(format!("WAV write {}: {}", path.display(), e));
    let mut writer = hound::WavWriter::create(path, spec).map_err(audio_err)?;

    if buffer.channel_count() == 0 {
        writer.finalize().map_err(audio_err)?;
        return Ok(());
    }

    for i in 0..buffer.frames() {
        for channel in &buffer.channels {
            writer.write_sample(channel[i]).map_err(audio_err)?;
        }
    }
    writer.finalize().map_err(audio_err)?;
    Ok(())
}

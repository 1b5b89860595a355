//! WAV decoding through `hound`, compressed formats through `symphonia`.
//!
//! Multichannel input is downmixed to mono by averaging each frame.

use super::DecodedAudio;
use crate::error::{LipSyncError, Result};
use std::path::Path;
use tracing::debug;

/// Decode an audio file to mono `f32` samples.
///
/// # Errors
///
/// Returns [`LipSyncError::Config`] when the file is missing or cannot be
/// decoded.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    if !path.is_file() {
        return Err(LipSyncError::Config(format!(
            "audio file not found: {}",
            path.display()
        )));
    }

    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

    let audio = if is_wav {
        match decode_wav(path) {
            Ok(audio) => audio,
            // Some encoders write WAV flavors hound rejects (e.g. extensible float).
            Err(e) => {
                debug!(path = %path.display(), error = %e, "hound rejected wav, retrying with symphonia");
                decode_symphonia(path)?
            }
        }
    } else {
        decode_symphonia(path)?
    };

    debug!(
        path = %path.display(),
        samples = audio.samples.len(),
        sample_rate = audio.sample_rate,
        "audio decoded"
    );
    Ok(audio)
}

fn decode_wav(path: &Path) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| LipSyncError::Config(format!("failed to open wav: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| LipSyncError::Config(format!("wav read error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| LipSyncError::Config(format!("wav read error: {e}")))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_symphonia(path: &Path) -> Result<DecodedAudio> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = std::fs::File::open(path)
        .map_err(|e| LipSyncError::Config(format!("failed to open audio: {e}")))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| LipSyncError::Config(format!("failed to probe audio: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| LipSyncError::Config("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| LipSyncError::Config("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| LipSyncError::Config(format!("failed to create decoder: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(LipSyncError::Config(format!("audio read error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(LipSyncError::Config(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;
        let required = usize::try_from(frames)
            .unwrap_or(usize::MAX)
            .saturating_mul(channels);

        match sample_buf.as_mut() {
            Some(b) if b.capacity() >= required => b.clear(),
            _ => sample_buf = Some(SampleBuffer::<f32>::new(frames, spec)),
        }

        if let Some(b) = sample_buf.as_mut() {
            b.copy_interleaved_ref(decoded);
            samples.extend(downmix(b.samples(), channels));
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

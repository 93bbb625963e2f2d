//! Decoding of transported audio payloads to mono `f32` PCM.

use crate::audio::context::AudioBuffer;
use crate::error::{Result, SpeechError};
use std::io::Cursor;

/// Decode an encoded payload and resample it to `target_rate`.
///
/// `content_type` is used as a probe hint; the container is still sniffed
/// from the bytes, so a wrong or empty MIME type only costs probing time.
///
/// # Errors
///
/// Returns [`SpeechError::Decode`] for empty, truncated or unsupported audio.
pub fn decode_audio(bytes: &[u8], content_type: &str, target_rate: u32) -> Result<AudioBuffer> {
    if bytes.is_empty() {
        return Err(SpeechError::Decode("empty audio payload".into()));
    }
    let (samples, rate) = decode_to_mono_f32(bytes.to_vec(), content_type)?;
    if samples.is_empty() {
        return Err(SpeechError::Decode("audio payload decoded to no samples".into()));
    }
    let samples = if rate == target_rate {
        samples
    } else {
        resample_linear(&samples, rate, target_rate)?
    };
    Ok(AudioBuffer {
        samples,
        sample_rate: target_rate,
    })
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    match mime {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/wave" | "audio/x-wav" => Some("wav"),
        "audio/ogg" | "audio/opus" => Some("ogg"),
        "audio/aac" => Some("aac"),
        "audio/mp4" | "audio/m4a" => Some("m4a"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}

fn decode_to_mono_f32(bytes: Vec<u8>, content_type: &str) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension_for(content_type) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SpeechError::Decode(format!("unrecognized audio ({content_type}): {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| SpeechError::Decode("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let rate = codec_params
        .sample_rate
        .ok_or_else(|| SpeechError::Decode("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| SpeechError::Decode(format!("no decoder for track: {e}")))?;

    let mut out = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphError::ResetRequired) => break,
            Err(e) => return Err(SpeechError::Decode(format!("audio read error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Skip corrupt frames, keep the rest.
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(SpeechError::Decode(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let required = decoded.capacity().saturating_mul(channels);
        if sample_buf.as_ref().is_none_or(|b| b.capacity() < required) {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        let data = buf.samples();
        if channels == 1 {
            out.extend_from_slice(data);
        } else {
            out.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }
    Ok((out, rate))
}

/// Linear-interpolation resampler.
///
/// # Errors
///
/// Returns an error if either rate is zero.
pub fn resample_linear(samples: &[f32], in_rate: u32, out_rate: u32) -> Result<Vec<f32>> {
    if in_rate == 0 || out_rate == 0 {
        return Err(SpeechError::Decode("invalid sample rate".into()));
    }
    if samples.is_empty() || in_rate == out_rate {
        return Ok(samples.to_vec());
    }
    let ratio = f64::from(out_rate) / f64::from(in_rate);
    let out_len = (samples.len() as f64 * ratio).round() as usize;
    let last = samples.len() - 1;
    Ok((0..out_len)
        .map(|i| {
            let src = i as f64 / ratio;
            let idx = (src.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (src - idx as f64).clamp(0.0, 1.0) as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect())
}

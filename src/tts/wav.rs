//! WAV container helpers: exact duration from the header and PCM wrapping.

use crate::error::{Result, SpeechError};
use std::io::Cursor;

/// Duration in milliseconds of a WAV payload, read from its header.
///
/// Streamed WAV often carries placeholder sizes (`0xFFFFFFFF`) or declares
/// more data than was sent. In that case the duration is measured from the
/// sample bytes actually present.
///
/// # Errors
///
/// Returns an error if the bytes are not a RIFF/WAVE stream with `fmt `
/// and `data` chunks, or declare a zero byte rate.
pub fn wav_duration_ms(bytes: &[u8]) -> Result<f64> {
    let layout = scan_layout(bytes)?;
    if layout.byte_rate == 0 {
        return Err(SpeechError::Decode("WAV declares 0 byte rate".into()));
    }
    let available = bytes.len() - layout.offset;
    let declared = usize::try_from(layout.declared).unwrap_or(usize::MAX);
    let sized = layout.declared != u32::MAX && declared <= available;

    if sized
        && let Ok(reader) = hound::WavReader::new(Cursor::new(bytes))
        && reader.spec().sample_rate != 0
    {
        // `duration()` counts frames (samples per channel).
        return Ok(f64::from(reader.duration()) * 1000.0 / f64::from(reader.spec().sample_rate));
    }

    let usable = if sized { declared } else { available };
    let align = usize::from(layout.block_align.max(1));
    let whole = usable - usable % align;
    Ok(whole as f64 * 1000.0 / f64::from(layout.byte_rate))
}

/// Position and rate of the sample data in a WAV payload.
struct DataLayout {
    byte_rate: u32,
    block_align: u16,
    /// Byte offset of the first sample.
    offset: usize,
    /// Size the `data` chunk header claims.
    declared: u32,
}

/// Walk the RIFF chunks up to `data`.
fn scan_layout(bytes: &[u8]) -> Result<DataLayout> {
    if !is_wav(bytes) {
        return Err(SpeechError::Decode("missing RIFF/WAVE signature".into()));
    }
    let mut fmt: Option<(u32, u16)> = None;
    let mut pos = 12usize;
    while let Some(header) = bytes.get(pos..pos + 8) {
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let body = pos + 8;
        match &header[0..4] {
            b"fmt " => {
                let f = bytes
                    .get(body..body + 16)
                    .ok_or_else(|| SpeechError::Decode("truncated WAV fmt chunk".into()))?;
                let byte_rate = u32::from_le_bytes([f[8], f[9], f[10], f[11]]);
                let block_align = u16::from_le_bytes([f[12], f[13]]);
                fmt = Some((byte_rate, block_align));
            }
            b"data" => {
                let (byte_rate, block_align) = fmt.ok_or_else(|| {
                    SpeechError::Decode("WAV data chunk precedes fmt chunk".into())
                })?;
                return Ok(DataLayout {
                    byte_rate,
                    block_align,
                    offset: body,
                    declared: size,
                });
            }
            _ => {}
        }
        // Chunk bodies are padded to an even length.
        let Some(next) = usize::try_from(size)
            .ok()
            .and_then(|s| s.checked_add(s & 1))
            .and_then(|s| body.checked_add(s))
        else {
            break;
        };
        pos = next;
    }
    Err(SpeechError::Decode("invalid WAV header: no data chunk".into()))
}

/// Whether the payload starts with a RIFF/WAVE signature.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Wrap raw little-endian 16-bit mono PCM into a WAV container.
///
/// A trailing odd byte is ignored.
///
/// # Errors
///
/// Returns an error if the WAV writer fails.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Vec::with_capacity(pcm.len() + 44);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec)
            .map_err(|e| SpeechError::Tts(format!("failed to create wav writer: {e}")))?;
        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| SpeechError::Tts(format!("failed to write wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SpeechError::Tts(format!("failed to finalize wav: {e}")))?;
    }
    Ok(buf)
}

/// Duration in milliseconds of raw 16-bit mono PCM.
pub fn pcm16_duration_ms(byte_len: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    (byte_len / 2) as f64 * 1000.0 / f64::from(sample_rate)
}

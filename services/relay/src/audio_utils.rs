use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};

/// Sample rate of the PCM16 audio streamed by the OpenAI Realtime API.
pub const OPENAI_REALTIME_API_PCM16_SAMPLE_RATE: u32 = 24000;

/// Size of the canonical RIFF/WAVE header written in front of every chunk.
pub const WAV_HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Failed to decode base64 audio fragment: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("PCM payload of {0} bytes does not fit in a WAV container")]
    TooLong(usize),
}

/// Writes a mono, 16-bit PCM WAV header describing `data_len` bytes of samples.
///
/// Nothing is written when the RIFF size fields cannot hold `data_len`.
pub fn put_wav_header(
    buf: &mut impl BufMut,
    sample_rate: u32,
    data_len: usize,
) -> Result<(), AudioError> {
    let data_len = u32::try_from(data_len)
        .ok()
        .filter(|len| len.checked_add(36).is_some())
        .ok_or(AudioError::TooLong(data_len))?;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + data_len);
    buf.put_slice(b"WAVE");
    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(1); // PCM
    buf.put_u16_le(CHANNELS);
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(byte_rate);
    buf.put_u16_le(block_align);
    buf.put_u16_le(BITS_PER_SAMPLE);
    buf.put_slice(b"data");
    buf.put_u32_le(data_len);
    Ok(())
}

/// Turns a base64 PCM16 fragment into a standalone, playable WAV buffer.
pub fn reassemble(base64_fragment: &str, sample_rate: u32) -> Result<Bytes, AudioError> {
    let pcm = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    let mut buf = BytesMut::with_capacity(WAV_HEADER_LEN + pcm.len());
    put_wav_header(&mut buf, sample_rate, pcm.len())?;
    buf.put_slice(&pcm);
    Ok(buf.freeze())
}

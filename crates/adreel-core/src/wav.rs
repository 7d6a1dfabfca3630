use crate::audio::RenderedAudio;

const BITS_PER_SAMPLE: u16 = 16;
const PCM_FORMAT: u16 = 1;
const HEADER_LEN: usize = 44;

/// Encodes planar float PCM as an interleaved 16-bit RIFF/WAVE file.
#[must_use]
pub fn encode_wav(audio: &RenderedAudio) -> Vec<u8> {
    let channels = audio.channels.len().max(1);
    let frames = audio.frames();
    let block_align = channels * usize::from(BITS_PER_SAMPLE / 8);
    let data_len = frames * block_align;

    let mut bytes = Vec::with_capacity(HEADER_LEN + data_len);
    bytes.extend_from_slice(b"RIFF");
    push_u32(&mut bytes, (36 + data_len) as u32);
    bytes.extend_from_slice(b"WAVE");

    bytes.extend_from_slice(b"fmt ");
    push_u32(&mut bytes, 16);
    push_u16(&mut bytes, PCM_FORMAT);
    push_u16(&mut bytes, channels as u16);
    push_u32(&mut bytes, audio.sample_rate);
    push_u32(&mut bytes, audio.sample_rate * block_align as u32);
    push_u16(&mut bytes, block_align as u16);
    push_u16(&mut bytes, BITS_PER_SAMPLE);

    bytes.extend_from_slice(b"data");
    push_u32(&mut bytes, data_len as u32);
    for frame in 0..frames {
        for channel in 0..channels {
            let sample = audio
                .channels
                .get(channel)
                .and_then(|samples| samples.get(frame))
                .copied()
                .unwrap_or(0.0);
            bytes.extend_from_slice(&quantize(sample).to_le_bytes());
        }
    }
    bytes
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

fn push_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

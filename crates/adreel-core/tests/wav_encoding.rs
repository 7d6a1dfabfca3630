use std::io::Cursor;

use adreel_core::{RenderedAudio, wav::encode_wav};

#[test]
fn encoded_wav_is_readable_interleaved_pcm() {
    let audio = RenderedAudio {
        sample_rate: 44_100,
        channels: vec![vec![0.0, 0.5, -1.0], vec![0.25, 1.5, 0.0]],
    };

    let bytes = encode_wav(&audio);
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).expect("wav should parse");
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    assert_eq!(reader.duration(), 3);

    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .expect("samples should decode");
    assert_eq!(samples, vec![0, 8_192, 16_384, 32_767, -32_767, 0]);
}

#[test]
fn empty_render_still_has_a_valid_header() {
    let audio = RenderedAudio {
        sample_rate: 48_000,
        channels: vec![Vec::new(), Vec::new()],
    };

    let reader =
        hound::WavReader::new(Cursor::new(encode_wav(&audio))).expect("empty wav should parse");
    assert_eq!(reader.duration(), 0);
    assert_eq!(reader.spec().channels, 2);
}

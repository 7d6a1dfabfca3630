use std::{f64::consts::TAU, sync::Arc};

use uuid::Uuid;

use crate::{
    engine::{Engine, EngineError, EngineOptions},
    media::DecodedAudio,
    model::{
        AnimationDefinition, AnimationKind, AudioTrack, Color, DEFAULT_ARTBOARD_HEIGHT,
        DEFAULT_ARTBOARD_WIDTH, DEFAULT_TIMELINE_DURATION_MS, Direction, ObjectKind, ObjectProps,
        Page, SceneObject, ShapeData, ShapeKind, TextData, Timing, VideoData,
    },
};

pub const DEMO_HEADLINE_ID: Uuid = Uuid::from_u128(0x6f1c_2b0e_4d7a_4c59_9e31_0a8b_51d2_c001);
pub const DEMO_LOGO_ID: Uuid = Uuid::from_u128(0x6f1c_2b0e_4d7a_4c59_9e31_0a8b_51d2_c002);
pub const DEMO_LOGO_MASK_ID: Uuid = Uuid::from_u128(0x6f1c_2b0e_4d7a_4c59_9e31_0a8b_51d2_c003);
pub const DEMO_VIDEO_ID: Uuid = Uuid::from_u128(0x6f1c_2b0e_4d7a_4c59_9e31_0a8b_51d2_c004);
pub const DEMO_BAND_ID: Uuid = Uuid::from_u128(0x6f1c_2b0e_4d7a_4c59_9e31_0a8b_51d2_c005);
pub const DEMO_MUSIC_ID: Uuid = Uuid::from_u128(0x6f1c_2b0e_4d7a_4c59_9e31_0a8b_51d2_c0a1);

const DEMO_TONE_HZ: f64 = 220.0;
const DEMO_TONE_AMPLITUDE: f64 = 0.3;
const DEMO_MUSIC_SECS: f64 = 6.0;

/// Five-second square ad with stable ids: a fading headline, a popping and
/// spinning masked logo, a sliding video and a background music bed.
#[must_use]
pub fn demo_page() -> Page {
    let mut page = Page::new(
        DEFAULT_ARTBOARD_WIDTH,
        DEFAULT_ARTBOARD_HEIGHT,
        Color::rgb(0xf4, 0xf1, 0xea),
        DEFAULT_TIMELINE_DURATION_MS,
    );

    let mut band = SceneObject::new(
        "Band",
        ObjectKind::Shape(ShapeData {
            shape: ShapeKind::Rect,
            corner_radius: 0.0,
        }),
        1080.0,
        220.0,
        Timing::new(0.0, 5_000.0),
    );
    band.id = DEMO_BAND_ID;
    band.props = ObjectProps::at(0.0, 860.0, Color::rgb(0x1d, 0x35, 0x57));
    band.animation.entry = AnimationDefinition::new(AnimationKind::Rise, 600.0, "power2.out");

    let mut headline = SceneObject::new(
        "Headline",
        ObjectKind::Text(TextData {
            text: "Fresh every morning".to_string(),
            font_family: "Inter".to_string(),
            font_size: 72.0,
        }),
        800.0,
        120.0,
        Timing::new(0.0, 3_000.0),
    );
    headline.id = DEMO_HEADLINE_ID;
    headline.props = ObjectProps::at(140.0, 120.0, Color::rgb(0x11, 0x11, 0x11));
    headline.animation.entry = AnimationDefinition::new(AnimationKind::Fade, 250.0, "linear");

    let mut logo = SceneObject::new(
        "Logo",
        ObjectKind::Shape(ShapeData {
            shape: ShapeKind::Ellipse,
            corner_radius: 0.0,
        }),
        240.0,
        240.0,
        Timing::new(500.0, 4_500.0),
    );
    logo.id = DEMO_LOGO_ID;
    logo.props = ObjectProps::at(420.0, 380.0, Color::rgb(0xe6, 0x39, 0x46));
    logo.animation.entry = AnimationDefinition::pop();
    logo.animation.exit = AnimationDefinition::new(AnimationKind::Fade, 300.0, "power1.in");
    logo.animation.scene = AnimationDefinition::new(AnimationKind::Rotate, 2_000.0, "linear");

    let mut logo_mask = SceneObject::new(
        "Logo mask",
        ObjectKind::Shape(ShapeData {
            shape: ShapeKind::Rect,
            corner_radius: 0.0,
        }),
        240.0,
        180.0,
        logo.timing,
    );
    logo_mask.id = DEMO_LOGO_MASK_ID;
    logo_mask.mask_of = Some(DEMO_LOGO_ID);
    logo_mask.props = ObjectProps::at(420.0, 410.0, Color::BLACK);

    let mut video = SceneObject::new(
        "Product clip",
        ObjectKind::Video(VideoData {
            source_url: "media/product.mp4".to_string(),
            trim_ms: 1_200.0,
            has_audio: false,
            ..VideoData::default()
        }),
        480.0,
        270.0,
        Timing::new(1_000.0, 3_000.0),
    );
    video.id = DEMO_VIDEO_ID;
    video.props = ObjectProps::at(300.0, 560.0, Color::rgb(0x45, 0x7b, 0x9d));
    video.animation.entry = AnimationDefinition::new(
        AnimationKind::Slide {
            direction: Direction::Left,
        },
        600.0,
        "power2.out",
    );
    video.animation.exit = AnimationDefinition::new(
        AnimationKind::Slide {
            direction: Direction::Left,
        },
        400.0,
        "power2.in",
    );

    page.objects
        .extend([band, headline, logo, logo_mask, video]);

    let mut music = AudioTrack::new("media/music-bed.wav", "Music bed", DEMO_MUSIC_SECS);
    music.id = DEMO_MUSIC_ID;
    music.volume = 0.8;
    music.timeline = 5.0;
    page.audios.push(music);

    page
}

/// Stereo sine tone standing in for the demo music bed.
#[must_use]
pub fn demo_tone(sample_rate: u32, seconds: f64) -> DecodedAudio {
    let frames = (seconds.max(0.0) * f64::from(sample_rate)).round() as usize;
    let samples: Vec<f32> = (0..frames)
        .map(|frame| {
            let time = frame as f64 / f64::from(sample_rate);
            ((TAU * DEMO_TONE_HZ * time).sin() * DEMO_TONE_AMPLITUDE) as f32
        })
        .collect();
    DecodedAudio::new(sample_rate, vec![samples.clone(), samples])
}

/// Engine over `demo_page` with the music bed already decoded.
pub fn demo_engine(options: EngineOptions) -> Result<Engine, EngineError> {
    let mut engine = Engine::with_options(demo_page(), options);
    let tone = demo_tone(options.sample_rate, DEMO_MUSIC_SECS);
    engine.attach_audio_buffer(DEMO_MUSIC_ID, Arc::new(tone))?;
    Ok(engine)
}

use std::{
    collections::HashMap,
    io::{Cursor, ErrorKind},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer},
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    clock::ClockEvent,
    model::{DEFAULT_SAMPLE_RATE, SceneObject},
};

/// Planar PCM: one `Vec<f32>` per channel, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    #[must_use]
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Mono sources feed every output channel; extra output channels reuse
    /// the last source channel.
    #[must_use]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        let Some(last) = self.channels.len().checked_sub(1) else {
            return 0.0;
        };
        self.channels[channel.min(last)]
            .get(frame)
            .copied()
            .unwrap_or(0.0)
    }
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio>;
}

#[async_trait]
pub trait AudioDemuxer: Send + Sync {
    /// Decodes the first audio track of a container; `None` when it has none.
    async fn demux_audio(
        &self,
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<Option<DecodedAudio>>;
}

/// Resolves `file://` urls and plain paths, relative ones against `root`.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    root: Option<PathBuf>,
}

impl FileFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    #[must_use]
    pub fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.resolve(url);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read media asset: {}", path.display()))
    }
}

#[must_use]
pub fn url_extension(url: &str) -> Option<&str> {
    let name = url.rsplit('/').next()?;
    let name = name.split(['?', '#']).next()?;
    name.rsplit_once('.').map(|(_, extension)| extension)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

#[async_trait]
impl AudioDecoder for SymphoniaDecoder {
    async fn decode(&self, bytes: Vec<u8>, extension: Option<&str>) -> Result<DecodedAudio> {
        let extension = extension.map(str::to_owned);
        tokio::task::spawn_blocking(move || {
            let mut format = open_format(bytes, extension.as_deref())?;
            let track_id = format
                .default_track()
                .map(|track| track.id)
                .ok_or_else(|| anyhow::anyhow!("no default audio track found"))?;
            decode_track(format.as_mut(), track_id)
        })
        .await
        .context("audio decode task failed")?
    }
}

#[async_trait]
impl AudioDemuxer for SymphoniaDecoder {
    async fn demux_audio(
        &self,
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<Option<DecodedAudio>> {
        let extension = extension.map(str::to_owned);
        tokio::task::spawn_blocking(move || {
            let mut format = open_format(bytes, extension.as_deref())?;
            let track_id = format
                .tracks()
                .iter()
                .find(|track| {
                    track.codec_params.codec != CODEC_TYPE_NULL
                        && track.codec_params.sample_rate.is_some()
                })
                .map(|track| track.id);
            match track_id {
                Some(track_id) => decode_track(format.as_mut(), track_id).map(Some),
                None => Ok(None),
            }
        })
        .await
        .context("audio demux task failed")?
    }
}

fn open_format(bytes: Vec<u8>, extension: Option<&str>) -> Result<Box<dyn FormatReader>> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("unrecognized media container")?;
    Ok(probed.format)
}

fn decode_track(format: &mut dyn FormatReader, track_id: u32) -> Result<DecodedAudio> {
    let track = format
        .tracks()
        .iter()
        .find(|track| track.id == track_id)
        .ok_or_else(|| anyhow::anyhow!("audio track {track_id} disappeared"))?;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!("audio stream reset required"));
            }
            Err(error) => return Err(error.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(error) => return Err(error.into()),
        };

        sample_rate = decoded.spec().rate;
        push_planar_samples(decoded, &mut channels);
    }

    if channels.first().is_none_or(Vec::is_empty) {
        return Err(anyhow::anyhow!("decoded zero samples"));
    }

    debug!(
        sample_rate,
        channels = channels.len(),
        total_frames = channels[0].len(),
        "audio decode complete"
    );
    Ok(DecodedAudio::new(sample_rate, channels))
}

fn push_planar_samples(decoded: AudioBufferRef<'_>, channels: &mut Vec<Vec<f32>>) {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    if channels.len() < channel_count {
        let frames = channels.first().map_or(0, Vec::len);
        channels.resize_with(channel_count, || vec![0.0; frames]);
    }

    let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buffer.copy_interleaved_ref(decoded);
    for frame in sample_buffer.samples().chunks(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }
}

/// Playback handle for a video object's underlying media.
#[async_trait]
pub trait MediaElement: Send + Sync {
    fn play(&mut self, local_ms: f64);
    fn pause(&mut self);
    /// Resolves once the element shows the frame at `local_ms`.
    async fn seek(&mut self, local_ms: f64) -> Result<()>;
    fn position_ms(&self) -> f64;
    fn is_playing(&self) -> bool;
}

pub trait MediaProvider: Send + Sync {
    fn open(&self, object: &SceneObject) -> Result<Box<dyn MediaElement>>;
}

/// Media element that only tracks its logical position.
#[derive(Debug, Clone, Default)]
pub struct ClockedMedia {
    position_ms: f64,
    playing: bool,
}

#[async_trait]
impl MediaElement for ClockedMedia {
    fn play(&mut self, local_ms: f64) {
        self.position_ms = local_ms;
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    async fn seek(&mut self, local_ms: f64) -> Result<()> {
        tokio::task::yield_now().await;
        self.position_ms = local_ms;
        Ok(())
    }

    fn position_ms(&self) -> f64 {
        self.position_ms
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClockedMediaProvider;

impl MediaProvider for ClockedMediaProvider {
    fn open(&self, _object: &SceneObject) -> Result<Box<dyn MediaElement>> {
        Ok(Box::new(ClockedMedia::default()))
    }
}

/// Open media elements for the video objects of one page.
#[derive(Default)]
pub struct MediaBank {
    elements: HashMap<Uuid, Box<dyn MediaElement>>,
}

impl MediaBank {
    /// Opens every video object; objects whose media fails to open are
    /// logged and left without an element.
    #[must_use]
    pub fn open(objects: &[SceneObject], provider: &dyn MediaProvider) -> Self {
        let mut elements = HashMap::new();
        for object in objects.iter().filter(|object| object.is_video()) {
            match provider.open(object) {
                Ok(element) => {
                    elements.insert(object.id, element);
                }
                Err(error) => {
                    warn!(object_id = %object.id, ?error, "failed to open video media, skipping");
                }
            }
        }
        Self { elements }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&dyn MediaElement> {
        self.elements.get(&id).map(|element| element.as_ref())
    }

    pub async fn seek(&mut self, id: Uuid, local_ms: f64) -> Result<()> {
        match self.elements.get_mut(&id) {
            Some(element) => element.seek(local_ms).await,
            None => Ok(()),
        }
    }

    /// Applies the media side of clock events to the open elements.
    pub async fn apply(&mut self, events: &[ClockEvent]) -> Result<()> {
        for event in events {
            match event {
                ClockEvent::MediaPlay { id, local_ms } => {
                    if let Some(element) = self.elements.get_mut(id) {
                        element.seek(*local_ms).await?;
                        element.play(*local_ms);
                    }
                }
                ClockEvent::MediaPause { id } => {
                    if let Some(element) = self.elements.get_mut(id) {
                        element.pause();
                    }
                }
                ClockEvent::MediaSeek { id, local_ms } => self.seek(*id, *local_ms).await?,
                ClockEvent::Shown { .. } | ClockEvent::Hidden { .. } | ClockEvent::Finished => {}
            }
        }
        Ok(())
    }

    pub fn close(&mut self) {
        for element in self.elements.values_mut() {
            element.pause();
        }
        self.elements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_extension_ignores_query_strings() {
        assert_eq!(url_extension("https://cdn.example/a/track.mp3?v=2"), Some("mp3"));
        assert_eq!(url_extension("clips/intro.webm"), Some("webm"));
        assert_eq!(url_extension("clips/no-extension"), None);
    }

    #[test]
    fn mono_buffers_feed_every_channel() {
        let audio = DecodedAudio::new(8_000, vec![vec![0.25, 0.5]]);
        assert!((audio.sample(1, 1) - 0.5).abs() < f32::EPSILON);
        assert!(audio.sample(0, 9).abs() < f32::EPSILON);
    }

    #[test]
    fn file_fetcher_joins_relative_urls_onto_root() {
        let fetcher = FileFetcher::with_root("/srv/assets");
        assert_eq!(
            fetcher.resolve("file://music/bed.wav"),
            PathBuf::from("/srv/assets/music/bed.wav")
        );
        assert_eq!(fetcher.resolve("/abs/a.wav"), PathBuf::from("/abs/a.wav"));
    }
}

//! Player façade over the video engine
//!
//! [`Player`] owns the primary video slot. It loads content sources, falls
//! back to muted playback when autoplay is refused, turns fatal media errors
//! into [`events::CHANGE_STREAM`] and lends the slot to ad breaks through
//! [`PlayerFacade`].

use crate::error::{Error, Result};
use crate::mediator::{events, Mediator};
use crate::stream::PlaybackSource;
use crate::types::{MediaErrorCode, StreamProtocol, VideoType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

/// The video element as seen from the shell
#[async_trait]
pub trait VideoEngine: Send + Sync {
    /// Replace the current source
    async fn set_source(&self, source: &PlaybackSource) -> Result<()>;

    /// Resolves once metadata for the current source has loaded
    async fn wait_for_metadata(&self) -> Result<()>;

    /// Start playback. Rejected when autoplay is not allowed.
    async fn play(&self, muted: bool) -> Result<()>;

    fn pause(&self);

    fn is_paused(&self) -> bool;

    /// Playhead position in seconds
    fn current_time(&self) -> f64;

    fn seek(&self, seconds: f64);
}

/// Operations the ad scheduler needs from the player
#[async_trait]
pub trait PlayerFacade: Send + Sync {
    /// Pause content and put the filler source in the video slot
    async fn initialize_advertisement(&self) -> Result<()>;

    /// Restore the content source, seek back and resume muted
    async fn resume_plain_video(&self) -> Result<()>;
}

/// Player configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerOptions {
    /// Clip kept in the video slot while an ad renders over it
    #[serde(default = "default_filler_source")]
    pub filler_source: String,
    /// Position to resume content from after a break. Defaults to where the
    /// content was paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_position: Option<f64>,
    /// Timeout for license and certificate requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_filler_source() -> String {
    "/static/filler.mp4".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            filler_source: default_filler_source(),
            resume_position: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

struct ShellState {
    video_type: VideoType,
    source: Option<PlaybackSource>,
    saved_position: f64,
    started: bool,
}

pub struct Player {
    engine: Arc<dyn VideoEngine>,
    mediator: Mediator<serde_json::Value>,
    options: PlayerOptions,
    state: Mutex<ShellState>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Player")
            .field("video_type", &state.video_type)
            .field("source", &state.source.as_ref().map(|s| s.src.as_str()))
            .finish()
    }
}

impl Player {
    pub fn new(engine: Arc<dyn VideoEngine>, mediator: Mediator<serde_json::Value>, options: PlayerOptions) -> Self {
        Self {
            engine,
            mediator,
            options,
            state: Mutex::new(ShellState {
                video_type: VideoType::Plain,
                source: None,
                saved_position: 0.0,
                started: false,
            }),
        }
    }

    pub fn video_type(&self) -> VideoType {
        self.lock().video_type
    }

    /// Content source currently loaded
    pub fn source(&self) -> Option<PlaybackSource> {
        self.lock().source.clone()
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    pub fn current_time(&self) -> f64 {
        self.engine.current_time()
    }

    /// Load a content source
    #[instrument(skip(self, source), fields(src = %source.src, mime = source.mime_type))]
    pub async fn load(&self, source: PlaybackSource) -> Result<()> {
        {
            let mut state = self.lock();
            state.source = Some(source.clone());
            state.started = false;
        }
        self.engine.set_source(&source).await?;
        info!("Content source loaded");
        Ok(())
    }

    /// Play with sound, falling back to muted playback if refused
    pub async fn play(&self) -> Result<()> {
        match self.engine.play(false).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(error = %e, "Playback with sound refused, retrying muted");
                self.play_muted().await
            }
        }
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    /// Handle an engine error. Returns true if a stream change was requested.
    ///
    /// Errors raised while the filler source is in the slot are ignored.
    pub fn handle_error(&self, code: MediaErrorCode) -> bool {
        if self.video_type() == VideoType::Ad {
            debug!(?code, "Ignoring media error during ad break");
            return false;
        }
        if !code.requires_stream_change() {
            warn!(?code, "Media error");
            return false;
        }

        warn!(?code, "Fatal media error, requesting next stream");
        self.mediator.emit(events::CHANGE_STREAM, &json!({ "code": code }));
        true
    }

    /// Handle a time update. The first one for a content source emits
    /// [`events::STARTED`]; returns true when it did.
    pub fn handle_time_update(&self, seconds: f64) -> bool {
        {
            let mut state = self.lock();
            if state.video_type != VideoType::Plain || state.started {
                return false;
            }
            state.started = true;
        }
        info!(seconds, "Content playback started");
        self.mediator.emit(events::STARTED, &json!({ "time": seconds }));
        true
    }

    async fn play_muted(&self) -> Result<()> {
        self.engine
            .play(true)
            .await
            .map_err(|e| Error::AutoplayBlocked(format!("muted playback refused: {}", e)))
    }

    fn lock(&self) -> MutexGuard<'_, ShellState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PlayerFacade for Player {
    #[instrument(skip(self))]
    async fn initialize_advertisement(&self) -> Result<()> {
        self.engine.pause();
        let position = self.engine.current_time();
        {
            let mut state = self.lock();
            state.saved_position = position;
            state.video_type = VideoType::Ad;
        }

        let filler = PlaybackSource::plain(&self.options.filler_source, StreamProtocol::Mp4.mime_type());
        self.engine.set_source(&filler).await?;
        info!(position, "Video slot handed to ads");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resume_plain_video(&self) -> Result<()> {
        let (source, position) = {
            let mut state = self.lock();
            state.video_type = VideoType::Plain;
            let position = self.options.resume_position.unwrap_or(state.saved_position);
            (state.source.clone(), position)
        };
        let source = source.ok_or_else(|| Error::player("no content source to resume"))?;

        self.engine.set_source(&source).await?;
        self.engine.wait_for_metadata().await?;
        self.engine.seek(position);

        if let Err(e) = self.play_muted().await {
            warn!(error = %e, "Content did not resume playing");
        }
        info!(position, "Content resumed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::SimulatedEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(engine: SimulatedEngine) -> (Player, Arc<SimulatedEngine>, Mediator<serde_json::Value>) {
        let engine = Arc::new(engine);
        let mediator = Mediator::new();
        let player = Player::new(engine.clone(), mediator.clone(), PlayerOptions::default());
        (player, engine, mediator)
    }

    fn content() -> PlaybackSource {
        PlaybackSource::plain("https://cdn.example.com/a.m3u8", StreamProtocol::Hls.mime_type())
    }

    #[tokio::test]
    async fn test_break_round_trip_restores_position() {
        let (player, engine, _) = setup(SimulatedEngine::new());
        player.load(content()).await.unwrap();
        player.play().await.unwrap();
        engine.set_time(42.5);

        player.initialize_advertisement().await.unwrap();
        assert_eq!(player.video_type(), VideoType::Ad);
        assert!(engine.is_paused());
        assert_eq!(engine.source().as_deref(), Some("/static/filler.mp4"));

        player.resume_plain_video().await.unwrap();
        assert_eq!(player.video_type(), VideoType::Plain);
        assert_eq!(engine.source().as_deref(), Some("https://cdn.example.com/a.m3u8"));
        assert_eq!(engine.current_time(), 42.5);
        assert!(!engine.is_paused());
        assert!(engine.is_muted());
    }

    #[tokio::test]
    async fn test_resume_position_override() {
        let engine = Arc::new(SimulatedEngine::new());
        let options = PlayerOptions {
            resume_position: Some(10.0),
            ..Default::default()
        };
        let player = Player::new(engine.clone(), Mediator::new(), options);
        player.load(content()).await.unwrap();
        engine.set_time(30.0);

        player.initialize_advertisement().await.unwrap();
        player.resume_plain_video().await.unwrap();
        assert_eq!(engine.current_time(), 10.0);
    }

    #[tokio::test]
    async fn test_resume_without_source() {
        let (player, _, _) = setup(SimulatedEngine::new());
        assert!(matches!(player.resume_plain_video().await, Err(Error::Player(_))));
    }

    #[tokio::test]
    async fn test_play_falls_back_to_muted() {
        let (player, engine, _) = setup(SimulatedEngine::new().blocking_unmuted_autoplay());
        player.load(content()).await.unwrap();
        player.play().await.unwrap();
        assert!(engine.is_muted());

        let (blocked, _, _) = setup(SimulatedEngine::new().blocking_all_autoplay());
        blocked.load(content()).await.unwrap();
        assert!(matches!(blocked.play().await, Err(Error::AutoplayBlocked(_))));
    }

    #[tokio::test]
    async fn test_fatal_errors_request_stream_change() {
        let (player, _, mediator) = setup(SimulatedEngine::new());
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = changes.clone();
        mediator.on(events::CHANGE_STREAM, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(player.handle_error(MediaErrorCode::Decode));
        assert!(!player.handle_error(MediaErrorCode::Network));

        player.load(content()).await.unwrap();
        player.initialize_advertisement().await.unwrap();
        assert!(!player.handle_error(MediaErrorCode::SrcNotSupported));
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_time_update_emits_started() {
        let (player, _, mediator) = setup(SimulatedEngine::new());
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        mediator.on(events::STARTED, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        player.load(content()).await.unwrap();
        assert!(player.handle_time_update(0.1));
        assert!(!player.handle_time_update(0.35));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }
}

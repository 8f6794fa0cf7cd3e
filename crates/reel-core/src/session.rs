//! Playback Session - wires the shell together for one playlist item
//!
//! Coordinates:
//! - Stream selection and fallback on fatal media errors
//! - The player façade and its application mediator
//! - The ad scheduler, fed from content time updates

use crate::ads::{AdSchedule, AdScheduler, AdSdk, AdSettings, BreakReport, TickOutcome};
use crate::capabilities::CapabilitySet;
use crate::error::{Error, Result};
use crate::mediator::{events, Mediator, Subscription};
use crate::player::{Player, PlayerOptions, VideoEngine};
use crate::playlist::PlayerDocument;
use crate::stream::{PlaybackSource, StreamSelector};
use crate::types::{MediaErrorCode, PriorityKey, VideoType};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

struct SessionInner {
    /// Unique session ID
    id: Uuid,
    /// Application event bus
    mediator: Mediator<serde_json::Value>,
    player: Arc<Player>,
    selector: tokio::sync::Mutex<StreamSelector>,
    /// Keys of the streams loaded so far, oldest first
    history: Mutex<Vec<PriorityKey>>,
    /// Client shared by every DRM adapter
    http: reqwest::Client,
    schedule: AdSchedule,
    scheduler: Mutex<Option<AdScheduler>>,
    change_stream: Mutex<Option<Subscription<serde_json::Value>>>,
}

/// Playback session for the document's current playlist item
#[derive(Clone)]
pub struct PlaybackSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.inner.id)
            .field("history", &*self.lock_history())
            .finish()
    }
}

impl PlaybackSession {
    /// Create a session. `history` ranks previously working stream kinds
    /// ahead of the default priority order.
    pub fn new(
        document: &PlayerDocument,
        capabilities: &CapabilitySet,
        engine: Arc<dyn VideoEngine>,
        options: PlayerOptions,
        history: &[PriorityKey],
    ) -> Result<Self> {
        let item = document.current_item()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(options.request_timeout_ms))
            .build()?;

        let mediator = Mediator::new();
        let player = Arc::new(Player::new(engine, mediator.clone(), options));

        let session = Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                mediator,
                player,
                selector: tokio::sync::Mutex::new(StreamSelector::new(&item.streams, capabilities, history)),
                history: Mutex::new(Vec::new()),
                http,
                schedule: AdSchedule::from_document(document)?,
                scheduler: Mutex::new(None),
                change_stream: Mutex::new(None),
            }),
        };

        let weak = Arc::downgrade(&session.inner);
        let subscription = session
            .inner
            .mediator
            .on(events::CHANGE_STREAM, move |_| Self::spawn_change_stream(&weak));
        *session
            .inner
            .change_stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(subscription);

        info!(session_id = %session.inner.id, "Playback session created");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn mediator(&self) -> &Mediator<serde_json::Value> {
        &self.inner.mediator
    }

    pub fn player(&self) -> Arc<Player> {
        Arc::clone(&self.inner.player)
    }

    /// Keys of the streams loaded so far, oldest first
    pub fn history(&self) -> Vec<PriorityKey> {
        self.lock_history().clone()
    }

    pub fn ad_scheduler(&self) -> Option<AdScheduler> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Load the best stream and start playing it
    pub async fn start(&self) -> Result<PlaybackSource> {
        self.next_stream().await
    }

    /// Move to the next stream in priority order.
    ///
    /// Fails with [`Error::NoPlayableStream`] once the candidates run out.
    #[instrument(skip(self), fields(session_id = %self.inner.id))]
    pub async fn next_stream(&self) -> Result<PlaybackSource> {
        let (stream, key) = {
            let mut selector = self.inner.selector.lock().await;
            let Some(stream) = selector.next() else {
                error!("No playable stream left");
                return Err(Error::NoPlayableStream);
            };
            (stream, selector.current_key())
        };

        let source = PlaybackSource::from_stream(&stream, &self.inner.http);
        self.inner.player.load(source.clone()).await?;
        if let Some(key) = key {
            self.lock_history().push(key);
            info!(key = %key, "Stream loaded");
        }

        if let Err(e) = self.inner.player.play().await {
            warn!(error = %e, code = e.error_code(), "Playback did not start");
        }
        Ok(source)
    }

    /// Attach an ad SDK. The returned scheduler is fed by
    /// [`handle_time_update`](Self::handle_time_update).
    pub fn attach_ads(&self, sdk: Arc<dyn AdSdk>, settings: AdSettings) -> AdScheduler {
        let scheduler = AdScheduler::new(
            self.inner.schedule.clone(),
            settings,
            sdk,
            self.inner.player.clone(),
        );
        *self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(scheduler.clone());
        scheduler
    }

    /// Load the ad SDK and play the pre-roll, if any
    pub async fn activate_ads(&self) -> Result<Option<BreakReport>> {
        match self.ad_scheduler() {
            Some(scheduler) => scheduler.activate().await,
            None => Ok(None),
        }
    }

    /// Forward a content time update to the player and the ad scheduler
    pub fn handle_time_update(&self, seconds: f64) -> Option<TickOutcome> {
        let player = &self.inner.player;
        player.handle_time_update(seconds);
        if player.video_type() != VideoType::Plain {
            return None;
        }
        let now = Duration::try_from_secs_f64(seconds.max(0.0)).ok()?;
        let scheduler = self.ad_scheduler()?;
        Some(scheduler.tick(now))
    }

    /// Forward a media error to the player. Fatal errors schedule a stream
    /// change.
    pub fn handle_error(&self, code: MediaErrorCode) -> bool {
        self.inner.player.handle_error(code)
    }

    /// Stop reacting to events and drop cached ad blocks
    pub fn close(&self) {
        let subscription = self
            .inner
            .change_stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(scheduler) = self.ad_scheduler() {
            scheduler.shutdown();
        }
        info!(session_id = %self.inner.id, "Playback session closed");
    }

    fn spawn_change_stream(weak: &Weak<SessionInner>) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Stream change requested outside a runtime");
            return;
        };
        let session = PlaybackSession { inner };
        runtime.spawn(async move {
            if let Err(e) = session.next_stream().await {
                error!(error = %e, code = e.error_code(), "Stream change failed");
            }
        });
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<PriorityKey>> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::SimulatedEngine;
    use crate::types::{DrmType, Stream, StreamProtocol};

    fn document(streams: Vec<Stream>) -> PlayerDocument {
        let mut document = PlayerDocument::default();
        document.playlist.items.push(crate::playlist::PlaylistItem {
            streams,
            ..Default::default()
        });
        document
    }

    fn session(streams: Vec<Stream>, caps: &[&str]) -> (PlaybackSession, Arc<SimulatedEngine>) {
        let engine = Arc::new(SimulatedEngine::new());
        let caps: CapabilitySet = caps.iter().collect();
        let session = PlaybackSession::new(
            &document(streams),
            &caps,
            engine.clone(),
            PlayerOptions::default(),
            &[],
        )
        .unwrap();
        (session, engine)
    }

    #[tokio::test]
    async fn test_start_and_fallback() {
        let (session, engine) = session(
            vec![
                Stream::plain(StreamProtocol::Hls, "https://cdn.example.com/a.m3u8"),
                Stream::protected(
                    StreamProtocol::Dash,
                    DrmType::Widevine,
                    "https://cdn.example.com/a.mpd",
                    "https://ls.example.com/wv",
                ),
            ],
            &["hls", "dash", "widevine"],
        );

        let first = session.start().await.unwrap();
        assert_eq!(first.src, "https://cdn.example.com/a.mpd");
        assert!(first.key_systems.is_some());

        let second = session.next_stream().await.unwrap();
        assert_eq!(second.src, "https://cdn.example.com/a.m3u8");
        assert_eq!(engine.source().as_deref(), Some("https://cdn.example.com/a.m3u8"));
        assert_eq!(
            session.history().iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            vec!["DASH:widevine", "HLS"]
        );

        assert!(matches!(session.next_stream().await, Err(Error::NoPlayableStream)));
    }

    #[tokio::test]
    async fn test_no_playable_stream() {
        let (session, _) = session(
            vec![Stream::plain(StreamProtocol::Mp4, "https://cdn.example.com/a.mp4")],
            &["hls", "dash"],
        );
        assert!(matches!(session.start().await, Err(Error::NoPlayableStream)));
    }

    #[tokio::test]
    async fn test_media_error_changes_stream() {
        let (session, engine) = session(
            vec![
                Stream::plain(StreamProtocol::Hls, "https://cdn.example.com/a.m3u8"),
                Stream::plain(StreamProtocol::Dash, "https://cdn.example.com/a.mpd"),
            ],
            &["hls", "dash"],
        );
        session.start().await.unwrap();
        assert!(session.handle_error(MediaErrorCode::SrcNotSupported));

        for _ in 0..10 {
            if engine.source().as_deref() == Some("https://cdn.example.com/a.mpd") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.source().as_deref(), Some("https://cdn.example.com/a.mpd"));
    }

    #[tokio::test]
    async fn test_close_stops_stream_changes() {
        let (session, _) = session(
            vec![Stream::plain(StreamProtocol::Hls, "https://cdn.example.com/a.m3u8")],
            &["hls"],
        );
        session.close();
        assert_eq!(session.mediator().subscriber_count(events::CHANGE_STREAM), 0);
    }
}

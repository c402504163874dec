//! Playback session
//!
//! Loads a track into a playback graph, then turns control events into graph
//! mutations until the user quits:
//!
//! ```text
//! load_track (Loading) -> Playing <-> Paused -> Stopped
//!                            |           |
//!                            +-> Ended <-+   (a seek resumes playback)
//! ```
//!
//! Loading has no [`SessionPhase`] variant: it is the span of
//! [`load_track`], which returns only once the first block is decoded, and a
//! [`Session`] is built from its result already in `Playing`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::events::{ControlEvent, ControlEventReceiver};
use crate::audio::graph::{BlockSource, LoopCount, PlaybackGraph, SharedGraph};
use crate::audio::remote::{
    HttpRangeFetcher, RangeFetcher, RemoteStream, content_type_to_extension,
    extract_extension_from_url,
};
use crate::audio::{DecodeFeed, FrameDecoder, TrackDecoder};
use crate::error::Result;
use crate::features::{Action, KeyBindings, PlaybackSettings, Settings};
use crate::ui::{StatusSnapshot, StatusView};

/// Phase of a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Playing,
    Paused,
    /// Track finished or a stream fault ended it
    Ended,
    Stopped,
}

impl SessionPhase {
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionPhase::Playing => "Playing",
            SessionPhase::Paused => "Paused",
            SessionPhase::Ended => "Ended",
            SessionPhase::Stopped => "Stopped",
        }
    }
}

/// Step sizes applied per key press
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSteps {
    pub seek_secs: f64,
    pub gain: f32,
    pub speed_up: f64,
    pub speed_down: f64,
}

impl ControlSteps {
    pub fn from_settings(playback: &PlaybackSettings) -> Self {
        Self {
            seek_secs: playback.seek_step_secs,
            gain: playback.gain_step,
            speed_up: playback.speed_step.up(),
            speed_down: playback.speed_step.down(),
        }
    }
}

impl Default for ControlSteps {
    fn default() -> Self {
        Self::from_settings(&PlaybackSettings::default())
    }
}

/// Apply one action to the graph; returns whether playback state changed
///
/// `Quit` never touches the graph.
pub fn apply_action<S: BlockSource>(
    graph: &mut PlaybackGraph<S>,
    action: Action,
    steps: &ControlSteps,
) -> bool {
    match action {
        Action::Quit => false,
        Action::TogglePause => {
            let paused = !graph.is_paused();
            graph.set_paused(paused);
            true
        }
        Action::SeekBackward => {
            let delta = seek_step_frames(graph, steps);
            graph.seek_by(-delta);
            true
        }
        Action::SeekForward => {
            let delta = seek_step_frames(graph, steps);
            graph.seek_by(delta);
            true
        }
        Action::VolumeDown => {
            graph.set_gain(graph.gain() - steps.gain);
            true
        }
        Action::VolumeUp => {
            graph.set_gain(graph.gain() + steps.gain);
            true
        }
        Action::SpeedDown => graph.set_speed_ratio(graph.speed_ratio() * steps.speed_down),
        Action::SpeedUp => graph.set_speed_ratio(graph.speed_ratio() * steps.speed_up),
    }
}

fn seek_step_frames<S: BlockSource>(graph: &PlaybackGraph<S>, steps: &ControlSteps) -> i64 {
    i64::try_from(graph.format().frames_for_secs(steps.seek_secs)).unwrap_or(i64::MAX)
}

/// What the control loop should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Idle,
    Refresh,
    Stop,
}

/// Graph events already written to the log
#[derive(Debug, Default, Clone, PartialEq)]
struct Reported {
    restarts: u32,
    ended: bool,
    fault: Option<String>,
}

/// Control side of one playing track
pub struct Session<S> {
    graph: SharedGraph<S>,
    keybindings: KeyBindings,
    steps: ControlSteps,
    stopped: bool,
    reported: Reported,
}

impl<S: BlockSource> Session<S> {
    pub fn new(graph: SharedGraph<S>, keybindings: KeyBindings, steps: ControlSteps) -> Self {
        Self {
            graph,
            keybindings,
            steps,
            stopped: false,
            reported: Reported::default(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> SessionPhase {
        self.snapshot().phase
    }

    /// Current state for the status view
    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.graph.lock().state();
        let phase = if self.stopped {
            SessionPhase::Stopped
        } else if state.ended {
            SessionPhase::Ended
        } else if state.paused {
            SessionPhase::Paused
        } else {
            SessionPhase::Playing
        };
        StatusSnapshot { state, phase }
    }

    /// Consume events until quit, refreshing `view` as state changes
    ///
    /// The session also stops when every event producer has gone away.
    pub fn run<V: StatusView>(
        &mut self,
        events: &mut ControlEventReceiver,
        view: &mut V,
    ) -> Result<()> {
        info!("Session started");
        self.refresh(view)?;

        while let Some(event) = events.blocking_recv() {
            match self.handle_event(event) {
                Flow::Idle => {}
                Flow::Refresh => self.refresh(view)?,
                Flow::Stop => break,
            }
        }

        self.stopped = true;
        info!("Session stopped");
        Ok(())
    }

    fn refresh<V: StatusView>(&mut self, view: &mut V) -> Result<()> {
        let snapshot = self.snapshot();
        self.report(&snapshot);
        view.render(&snapshot)
    }

    /// Log what the render callback recorded since the last refresh
    fn report(&mut self, snapshot: &StatusSnapshot) {
        let state = &snapshot.state;

        if state.restarts != self.reported.restarts {
            debug!(restarts = state.restarts, "Loop restarted");
        }
        if state.fault != self.reported.fault {
            if let Some(fault) = &state.fault {
                warn!(position = state.position, error = %fault, "Stream fault, playback ended");
            }
        } else if state.ended && !self.reported.ended {
            info!(position = state.position, "End of track");
        }

        self.reported = Reported {
            restarts: state.restarts,
            ended: state.ended,
            fault: state.fault.clone(),
        };
    }

    fn handle_event(&mut self, event: ControlEvent) -> Flow {
        match event {
            ControlEvent::Tick => Flow::Refresh,
            ControlEvent::Quit => Flow::Stop,
            ControlEvent::Key(key) => match self.keybindings.find_action(&key) {
                None => Flow::Idle,
                Some(Action::Quit) => Flow::Stop,
                Some(action) => {
                    let changed = apply_action(&mut *self.graph.lock(), action, &self.steps);
                    debug!(?action, changed, "Action applied");
                    if changed { Flow::Refresh } else { Flow::Idle }
                }
            },
        }
    }
}

/// Open `url`, decode it on a background thread and build the playback graph
///
/// Returns once the first block is decoded. Startup failures (transport,
/// unsupported format, decode) are returned to the caller.
pub fn load_track(url: &str, settings: &Settings) -> Result<SharedGraph<DecodeFeed>> {
    info!(url = %redact_url(url), "Loading track");
    let fetcher = Arc::new(HttpRangeFetcher::new(url, &settings.network)?);
    load_track_from(fetcher, url, settings)
}

fn load_track_from(
    fetcher: Arc<dyn RangeFetcher>,
    url: &str,
    settings: &Settings,
) -> Result<SharedGraph<DecodeFeed>> {
    let stream = RemoteStream::open(fetcher)?;
    let extension = extract_extension_from_url(url)
        .or_else(|| stream.content_type().and_then(content_type_to_extension));
    debug!(?extension, length = ?stream.length(), "Remote stream opened");

    let decoder = TrackDecoder::open(stream, extension.as_deref())?;
    let format = decoder.format();
    let length = decoder.length();
    info!(
        sample_rate = format.sample_rate,
        channels = format.channels,
        frames = length,
        "Track decoded"
    );

    let mut feed = DecodeFeed::spawn(
        decoder,
        settings.audio.decode_block_frames,
        settings.audio.prefetch_blocks,
    )?;
    feed.wait_playable(settings.audio.startup_timeout())?;

    let playback = &settings.playback;
    let mut graph = PlaybackGraph::new(
        feed,
        format,
        length,
        LoopCount::from_setting(playback.loop_count),
    );
    graph.set_gain(playback.initial_gain);
    if !graph.set_speed_ratio(playback.initial_speed) {
        warn!(speed = playback.initial_speed, "Initial speed rejected, using 1.0");
    }

    Ok(graph.into_shared())
}

/// URL without its query string (which may carry an access token)
fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

//! Playback graph
//!
//! Three nodes evaluated in a fixed order for every rendered block:
//! - `LoopNode`: walks the decoded track, restarting it for each extra pass
//! - `ResampleNode`: linear interpolation by `speed_ratio` (pitch follows speed)
//! - `GainNode`: linear amplitude scale
//!
//! The graph is shared between the control thread and the render callback
//! as a [`SharedGraph`]. Every mutation happens under that one lock, so a
//! block is always rendered from a consistent state.
//!
//! Nothing on the render path logs. Loop restarts and stream faults are
//! recorded in [`PlaybackState`] and reported by the control loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::decoder::AudioFormat;
use crate::error::PlayerError;

/// Graph shared between the control loop and the render callback
pub type SharedGraph<S> = Arc<Mutex<PlaybackGraph<S>>>;

// ============ Block Source ============

/// Result of a non-blocking pull from the decoded stream
#[derive(Debug)]
pub enum Pull {
    /// Interleaved frames continuing the current pass
    Samples(Vec<f32>),
    /// Nothing decoded yet
    Pending,
    /// End of the decoded sequence, with the fault that ended it early
    End(Option<PlayerError>),
}

/// Supplier of decoded blocks that never blocks the caller
pub trait BlockSource: Send {
    fn pull(&mut self) -> Pull;

    /// Restart delivery at `frame`; blocks pulled afterwards start there
    fn request_seek(&mut self, frame: u64);
}

/// How many passes over the track the loop node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Times(u32),
    Forever,
}

impl LoopCount {
    /// `0` means forever
    pub fn from_setting(count: u32) -> Self {
        if count == 0 {
            LoopCount::Forever
        } else {
            LoopCount::Times(count)
        }
    }
}

impl Default for LoopCount {
    fn default() -> Self {
        LoopCount::Times(1)
    }
}

// ============ Loop Node ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStatus {
    Ready,
    Pending,
    Ended,
}

struct LoopNode<S> {
    source: S,
    channels: usize,
    length: u64,
    /// Next frame index of the current pass
    position: u64,
    /// Remaining passes including the current one, `None` for forever
    passes_left: Option<u32>,
    block: Vec<f32>,
    cursor: usize,
    ended: bool,
    restarts: u32,
    fault: Option<PlayerError>,
}

impl<S: BlockSource> LoopNode<S> {
    fn new(source: S, channels: usize, length: u64, loops: LoopCount) -> Self {
        let passes_left = match loops {
            LoopCount::Times(n) => Some(n.max(1)),
            LoopCount::Forever => None,
        };
        Self {
            source,
            channels,
            length,
            position: 0,
            passes_left,
            block: Vec::new(),
            cursor: 0,
            ended: false,
            restarts: 0,
            fault: None,
        }
    }

    /// Copy the next frame into `frame`
    fn next_frame(&mut self, frame: &mut [f32]) -> FrameStatus {
        if self.ended {
            return FrameStatus::Ended;
        }

        while self.cursor + self.channels > self.block.len() {
            match self.source.pull() {
                Pull::Samples(samples) => {
                    self.block = samples;
                    self.cursor = 0;
                }
                Pull::Pending => return FrameStatus::Pending,
                Pull::End(Some(fault)) => {
                    self.fault = Some(fault);
                    self.end();
                    return FrameStatus::Ended;
                }
                Pull::End(None) => {
                    // Stream ended short of the declared length
                    return if self.finish_pass() {
                        FrameStatus::Pending
                    } else {
                        FrameStatus::Ended
                    };
                }
            }
        }

        frame.copy_from_slice(&self.block[self.cursor..self.cursor + self.channels]);
        self.cursor += self.channels;
        self.position += 1;

        if self.position >= self.length {
            self.finish_pass();
        }
        FrameStatus::Ready
    }

    /// Restart for another pass if one remains; returns whether it did
    fn finish_pass(&mut self) -> bool {
        let again = match &mut self.passes_left {
            None => true,
            Some(n) => {
                *n = n.saturating_sub(1);
                *n > 0
            }
        };

        if again {
            self.restarts = self.restarts.saturating_add(1);
            self.rewind(0);
        } else {
            self.end();
        }
        again
    }

    fn end(&mut self) {
        self.ended = true;
        self.position = self.position.min(self.length.saturating_sub(1));
    }

    fn rewind(&mut self, frame: u64) {
        self.position = frame;
        self.block.clear();
        self.cursor = 0;
        self.ended = false;
        self.source.request_seek(frame);
    }
}

// ============ Resample Node ============

struct ResampleNode {
    ratio: f64,
    /// Fractional read position between `prev` and `next`
    phase: f64,
    prev: Vec<f32>,
    next: Vec<f32>,
    scratch: Vec<f32>,
}

impl ResampleNode {
    fn new(channels: usize, ratio: f64) -> Self {
        Self {
            ratio,
            phase: 2.0,
            prev: vec![0.0; channels],
            next: vec![0.0; channels],
            scratch: vec![0.0; channels],
        }
    }

    /// Forget interpolation history (after a seek)
    fn reset(&mut self) {
        // Two frames must be read before the first output
        self.phase = 2.0;
        self.prev.fill(0.0);
        self.next.fill(0.0);
    }

    /// Fill `out` with interpolated frames; returns how many frames were produced
    fn fill<S: BlockSource>(&mut self, looper: &mut LoopNode<S>, out: &mut [f32]) -> usize {
        let channels = self.prev.len();
        let mut produced = 0;

        for frame in out.chunks_exact_mut(channels) {
            while self.phase >= 1.0 {
                match looper.next_frame(&mut self.scratch) {
                    FrameStatus::Ready => {
                        std::mem::swap(&mut self.prev, &mut self.next);
                        self.next.copy_from_slice(&self.scratch);
                        self.phase -= 1.0;
                    }
                    FrameStatus::Pending | FrameStatus::Ended => return produced,
                }
            }

            let t = self.phase as f32;
            for ((sample, &a), &b) in frame.iter_mut().zip(&self.prev).zip(&self.next) {
                *sample = a + (b - a) * t;
            }
            self.phase += self.ratio;
            produced += 1;
        }

        produced
    }
}

// ============ Gain Node ============

struct GainNode {
    gain: f32,
}

impl GainNode {
    fn apply(&self, samples: &mut [f32]) {
        if self.gain != 1.0 {
            samples.iter_mut().for_each(|s| *s *= self.gain);
        }
    }
}

// ============ Playback Graph ============

/// Read view of the graph handed to the status view
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub position: u64,
    pub length: u64,
    pub sample_rate: u32,
    pub paused: bool,
    pub ended: bool,
    /// Loop passes restarted so far
    pub restarts: u32,
    pub gain: f32,
    pub speed_ratio: f64,
    pub fault: Option<String>,
}

impl PlaybackState {
    pub fn elapsed(&self) -> Duration {
        frames_to_duration(self.position, self.sample_rate)
    }

    pub fn total(&self) -> Duration {
        frames_to_duration(self.length, self.sample_rate)
    }
}

fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}

pub struct PlaybackGraph<S> {
    format: AudioFormat,
    looper: LoopNode<S>,
    resampler: ResampleNode,
    gain: GainNode,
    paused: bool,
}

impl<S: BlockSource> PlaybackGraph<S> {
    /// Build the graph at the decoded sample rate
    ///
    /// The output mixer converts to the device rate, so the resampler only
    /// has to apply the speed ratio.
    pub fn new(source: S, format: AudioFormat, length: u64, loops: LoopCount) -> Self {
        let channels = format.channels.max(1) as usize;
        Self {
            format,
            looper: LoopNode::new(source, channels, length, loops),
            resampler: ResampleNode::new(channels, 1.0),
            gain: GainNode { gain: 1.0 },
            paused: false,
        }
    }

    pub fn into_shared(self) -> SharedGraph<S> {
        Arc::new(Mutex::new(self))
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn length(&self) -> u64 {
        self.looper.length
    }

    pub fn position(&self) -> u64 {
        self.looper.position
    }

    pub fn gain(&self) -> f32 {
        self.gain.gain
    }

    pub fn speed_ratio(&self) -> f64 {
        self.resampler.ratio
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[cfg(test)]
    pub fn is_ended(&self) -> bool {
        self.looper.ended
    }

    /// Jump to `target`, clamped into `[0, length - 1]`
    pub fn seek_to(&mut self, target: i64) -> u64 {
        let last = self.length().saturating_sub(1);
        let clamped = u64::try_from(target.max(0)).unwrap_or(0).min(last);

        debug!(target, clamped, "Graph seek");
        self.looper.fault = None;
        self.looper.rewind(clamped);
        self.resampler.reset();
        clamped
    }

    /// Move by `delta` frames relative to the current position
    pub fn seek_by(&mut self, delta: i64) -> u64 {
        let current = i64::try_from(self.position()).unwrap_or(i64::MAX);
        self.seek_to(current.saturating_add(delta))
    }

    /// Any finite value is accepted, including zero and negatives
    pub fn set_gain(&mut self, gain: f32) {
        if gain.is_finite() {
            self.gain.gain = gain;
        } else {
            warn!(gain, "Ignoring non-finite gain");
        }
    }

    /// Returns false (and keeps the old ratio) unless `ratio` is finite and positive
    pub fn set_speed_ratio(&mut self, ratio: f64) -> bool {
        if !(ratio.is_finite() && ratio > 0.0) {
            warn!(ratio, "Ignoring invalid speed ratio");
            return false;
        }
        self.resampler.ratio = ratio;
        true
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Render interleaved frames into `out`
    ///
    /// Silence is written while paused, after the end of the stream, and
    /// for any part of the block the decoder has not caught up with.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.paused {
            out.fill(0.0);
            return;
        }

        let produced = self.resampler.fill(&mut self.looper, out) * self.resampler.prev.len();
        self.gain.apply(&mut out[..produced]);
        out[produced..].fill(0.0);
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            position: self.position(),
            length: self.length(),
            sample_rate: self.format.sample_rate,
            paused: self.paused,
            ended: self.looper.ended,
            restarts: self.looper.restarts,
            gain: self.gain.gain,
            speed_ratio: self.resampler.ratio,
            fault: self.looper.fault.as_ref().map(ToString::to_string),
        }
    }
}

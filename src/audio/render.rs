//! Render callback and output device
//!
//! `RenderSource` is the `rodio::Source` the output mixer pulls from on the
//! device thread. It locks the shared graph once per block, never waits on
//! the decoder, and never ends: after the track it keeps yielding silence.

use std::time::Duration;

use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamBuilder, Source};
use tracing::info;

use super::graph::{BlockSource, SharedGraph};
use crate::error::{PlayerError, Result};

/// Blocks per second of audio rendered under one lock
const RENDER_BLOCKS_PER_SEC: u32 = 30;

/// Frames in one render block at `sample_rate`
pub fn render_block_frames(sample_rate: u32) -> usize {
    (sample_rate / RENDER_BLOCKS_PER_SEC).max(1) as usize
}

pub struct RenderSource<S> {
    graph: SharedGraph<S>,
    block: Vec<f32>,
    cursor: usize,
    channels: u16,
    sample_rate: u32,
}

impl<S: BlockSource> RenderSource<S> {
    pub fn new(graph: SharedGraph<S>) -> Self {
        let format = graph.lock().format();
        let channels = format.channels.max(1);
        let len = render_block_frames(format.sample_rate) * channels as usize;

        Self {
            graph,
            block: vec![0.0; len],
            cursor: len,
            channels,
            sample_rate: format.sample_rate,
        }
    }

    fn refill(&mut self) {
        self.graph.lock().render(&mut self.block);
        self.cursor = 0;
    }
}

impl<S: BlockSource> Iterator for RenderSource<S> {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.block.len() {
            self.refill();
        }
        let sample = self.block[self.cursor];
        self.cursor += 1;
        Some(sample)
    }
}

impl<S: BlockSource> Source for RenderSource<S> {
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Open output stream; dropping it releases the device
pub struct AudioOutput {
    _stream: OutputStream,
}

impl AudioOutput {
    /// Open the named device (or the default one) and start pulling from `source`
    pub fn open<S: BlockSource + 'static>(
        device_name: Option<&str>,
        source: RenderSource<S>,
    ) -> Result<Self> {
        let mut stream = match device_name {
            Some(name) => create_stream_for_device(name)?,
            None => OutputStreamBuilder::open_default_stream()
                .map_err(|e| PlayerError::Output(format!("failed to create audio output: {e}")))?,
        };
        stream.log_on_drop(false);

        info!(
            device = device_name.unwrap_or("default"),
            channels = source.channels(),
            sample_rate = source.sample_rate(),
            "Audio output opened"
        );
        stream.mixer().add(source);

        Ok(Self { _stream: stream })
    }
}

/// Create output stream for a specific device by name
fn create_stream_for_device(device_name: &str) -> Result<OutputStream> {
    let host = rodio::cpal::default_host();

    let device = host
        .output_devices()
        .map_err(|e| PlayerError::Output(format!("failed to enumerate devices: {e}")))?
        .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
        .ok_or_else(|| PlayerError::Output(format!("device not found: {device_name}")))?;

    let config = device
        .default_output_config()
        .map_err(|e| PlayerError::Output(format!("failed to get device config: {e}")))?;

    OutputStreamBuilder::from_device(device)
        .map_err(|e| PlayerError::Output(format!("failed to create stream builder: {e}")))?
        .with_sample_rate(config.sample_rate().0)
        .open_stream()
        .map_err(|e| PlayerError::Output(format!("failed to open stream: {e}")))
}

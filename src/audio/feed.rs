//! Decode worker feeding the render callback
//!
//! The decoder (and the network reads behind it) runs on its own thread and
//! hands finished blocks to the render side through a lock-free `rtrb` ring,
//! so the audio thread never waits on I/O.
//!
//! ## Architecture
//! ```text
//! Control / render side (DecodeFeed) --[SeekCommand]--> decoder thread (rtrb ring)
//! Control / render side (DecodeFeed) <--[FeedItem]------ decoder thread (rtrb ring)
//! ```
//!
//! Every seek bumps a generation counter. Items tagged with an older
//! generation are dropped on the consumer side. Both directions are
//! wait-free rings, since seeks are also issued from the render callback
//! when a loop pass restarts.

use std::thread;
use std::time::{Duration, Instant};

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use tracing::{debug, error, info, warn};

use super::decoder::FrameDecoder;
use super::graph::{BlockSource, Pull};
use crate::error::{PlayerError, Result};

/// Worker back-off while the ring is full or the track has ended
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Poll interval while waiting for the first block
const READY_POLL: Duration = Duration::from_millis(10);

/// Seek requests queued for the decoder thread
const SEEK_QUEUE: usize = 16;

/// Items travelling from the decoder thread to the render side
pub enum FeedItem {
    Block { generation: u64, samples: Vec<f32> },
    End { generation: u64, fault: Option<PlayerError> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeekCommand {
    frame: u64,
    generation: u64,
}

/// Consumer half of the decode worker
///
/// Dropping it abandons both rings, which stops the worker after its
/// current decode step. The worker may be stuck in a network read, so it
/// is not joined.
pub struct DecodeFeed {
    consumer: Consumer<FeedItem>,
    seeks: Producer<SeekCommand>,
    /// Latest seek that did not fit in the ring; it supersedes queued ones
    pending_seek: Option<SeekCommand>,
    generation: u64,
}

impl DecodeFeed {
    /// Move `decoder` onto a new `decoder` thread
    ///
    /// `block_frames` is the size of each decoded block, `queue_blocks` how
    /// many blocks may be decoded ahead of playback.
    pub fn spawn<D: FrameDecoder>(
        decoder: D,
        block_frames: usize,
        queue_blocks: usize,
    ) -> Result<Self> {
        let (producer, consumer) = RingBuffer::new(queue_blocks.max(2));
        let (seek_tx, seek_rx) = RingBuffer::new(SEEK_QUEUE);

        thread::Builder::new()
            .name("decoder".to_string())
            .spawn(move || decode_worker_main(decoder, producer, seek_rx, block_frames.max(1)))
            .map_err(|e| PlayerError::Decode(format!("failed to spawn decoder thread: {e}")))?;

        Ok(Self {
            consumer,
            seeks: seek_tx,
            pending_seek: None,
            generation: 0,
        })
    }

    fn flush_seek(&mut self) {
        if let Some(command) = self.pending_seek.take() {
            if let Err(PushError::Full(command)) = self.seeks.push(command) {
                self.pending_seek = Some(command);
            }
        }
    }

    /// Block until the first decoded block is queued
    ///
    /// Fails with the decoder's fault if the track ends before producing
    /// audio, or with a transport error once `timeout` elapses.
    pub fn wait_playable(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let head_is_block = match self.consumer.peek() {
                Ok(FeedItem::Block { .. }) => Some(true),
                Ok(FeedItem::End { .. }) => Some(false),
                Err(_) => None,
            };

            match head_is_block {
                Some(true) => return Ok(()),
                Some(false) => {
                    let fault = match self.consumer.pop() {
                        Ok(FeedItem::End { fault, .. }) => fault,
                        _ => None,
                    };
                    return Err(fault.unwrap_or_else(|| {
                        PlayerError::Decode("track ended before any audio was decoded".to_string())
                    }));
                }
                None => {}
            }

            if self.consumer.is_abandoned() {
                return Err(PlayerError::Decode("decoder thread exited".to_string()));
            }
            if Instant::now() >= deadline {
                return Err(PlayerError::Transport(format!(
                    "no audio data after {:.1}s",
                    timeout.as_secs_f64()
                )));
            }
            thread::sleep(READY_POLL);
        }
    }
}

impl BlockSource for DecodeFeed {
    fn pull(&mut self) -> Pull {
        self.flush_seek();
        while let Ok(item) = self.consumer.pop() {
            match item {
                FeedItem::Block {
                    generation,
                    samples,
                } if generation == self.generation => return Pull::Samples(samples),
                FeedItem::End { generation, fault } if generation == self.generation => {
                    return Pull::End(fault);
                }
                // Decoded before the latest seek
                _ => {}
            }
        }
        Pull::Pending
    }

    fn request_seek(&mut self, frame: u64) {
        self.generation += 1;
        self.pending_seek = Some(SeekCommand {
            frame,
            generation: self.generation,
        });
        self.flush_seek();
    }
}

fn decode_worker_main<D: FrameDecoder>(
    mut decoder: D,
    mut producer: Producer<FeedItem>,
    mut seeks: Consumer<SeekCommand>,
    block_frames: usize,
) {
    info!(block_frames, "Decoder thread started");

    let mut generation = 0u64;
    let mut finished = false;
    let mut outbox: Option<FeedItem> = None;

    loop {
        // Only the newest queued seek matters
        let mut latest = None;
        while let Ok(command) = seeks.pop() {
            latest = Some(command);
        }
        if let Some(SeekCommand {
            frame,
            generation: next,
        }) = latest
        {
            debug!(frame, generation = next, "Decoder seek");
            generation = next;
            finished = false;
            outbox = None;
            if let Err(err) = decoder.seek(frame) {
                warn!(frame, error = %err, "Decoder seek failed");
                finished = true;
                outbox = Some(FeedItem::End {
                    generation,
                    fault: Some(err),
                });
            }
        }

        if producer.is_abandoned() {
            info!("Render side dropped, decoder thread exiting");
            return;
        }

        if let Some(item) = outbox.take() {
            if let Err(PushError::Full(item)) = producer.push(item) {
                outbox = Some(item);
                thread::sleep(IDLE_WAIT);
                continue;
            }
        }

        if finished {
            thread::sleep(IDLE_WAIT);
            continue;
        }

        outbox = Some(match decoder.decode_next(block_frames) {
            Ok(Some(samples)) => FeedItem::Block {
                generation,
                samples,
            },
            Ok(None) => {
                debug!(generation, "Decoder reached end of stream");
                finished = true;
                FeedItem::End {
                    generation,
                    fault: None,
                }
            }
            Err(err) => {
                error!(error = %err, "Decode fault, playback of this pass ends here");
                finished = true;
                FeedItem::End {
                    generation,
                    fault: Some(err),
                }
            }
        });
    }
}

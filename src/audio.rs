//! Audio playback module
//!
//! This module turns a remote URL into sound:
//! - `remote`: HTTP range requests behind a seekable byte stream
//! - `decoder`: Container/codec decoding to interleaved `f32` frames
//! - `feed`: Decoder thread and the lock-free block queue it fills
//! - `graph`: Loop, resample and gain stages under one lock
//! - `render`: The `rodio` source pulled by the output device

pub mod decoder;
pub mod feed;
pub mod graph;
pub mod remote;
pub mod render;

pub use decoder::{FrameDecoder, TrackDecoder};
pub use feed::DecodeFeed;
pub use graph::PlaybackState;
pub use render::{AudioOutput, RenderSource};

//! Track decoder using Symphonia
//!
//! Turns a seekable byte source into interleaved `f32` frames. A "frame" is
//! one sample per channel; all positions and lengths here count frames.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::error::{PlayerError, Result};

/// Corrupt packets tolerated in a row before decoding gives up
const MAX_CONSECUTIVE_DECODE_ERRORS: usize = 8;

/// Sample rate and channel count of a decoded track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Number of frames covering `secs` seconds
    pub fn frames_for_secs(&self, secs: f64) -> u64 {
        (secs * self.sample_rate as f64).round().max(0.0) as u64
    }
}

/// A finite, seekable sequence of interleaved PCM frames
pub trait FrameDecoder: Send + 'static {
    fn format(&self) -> AudioFormat;

    /// Total frame count
    fn length(&self) -> u64;

    /// Next block of at most `max_frames` frames, `None` at end of stream
    fn decode_next(&mut self, max_frames: usize) -> Result<Option<Vec<f32>>>;

    /// Resume decoding at `frame`, returning the frame decoding resumes at
    fn seek(&mut self, frame: u64) -> Result<u64>;
}

pub struct TrackDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    length: u64,
    /// Decoded frames not yet handed out
    pending: Vec<f32>,
    /// Frames before this timestamp are dropped after a seek
    seek_target: Option<u64>,
}

impl TrackDecoder {
    /// Probe `source` and prepare the first audio track for decoding
    ///
    /// `extension` is only a hint; the probe also inspects the stream.
    pub fn open<M: MediaSource + 'static>(source: M, extension: Option<&str>) -> Result<Self> {
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                // Probe ran off the end without finding a container marker
                SymphoniaError::IoError(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                    PlayerError::FormatUnsupported("no recognizable audio container".to_string())
                }
                other => map_symphonia_error(other),
            })?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlayerError::FormatUnsupported("no audio track found".to_string()))?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(map_symphonia_error)?;

        Self::from_parts(reader, decoder, track_id, &params)
    }

    /// Take over an opened container and codec for track `track_id`
    ///
    /// Scans the packets for the frame count when `params` has none.
    fn from_parts(
        reader: Box<dyn FormatReader>,
        decoder: Box<dyn Decoder>,
        track_id: u32,
        params: &CodecParameters,
    ) -> Result<Self> {
        let sample_rate = params
            .sample_rate
            .filter(|&rate| rate > 0)
            .ok_or_else(|| PlayerError::FormatUnsupported("unknown sample rate".to_string()))?;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);

        let mut this = Self {
            reader,
            decoder,
            track_id,
            format: AudioFormat {
                sample_rate,
                channels,
            },
            length: params.n_frames.unwrap_or(0),
            pending: Vec::new(),
            seek_target: None,
        };

        if params.n_frames.is_none() {
            this.length = this.scan_length()?;
        }
        if this.format.channels == 0 {
            // Channel layout only shows up in the first decoded packet
            this.decode_packet()?;
        }
        if this.format.channels == 0 || this.length == 0 {
            return Err(PlayerError::Decode("track contains no audio".to_string()));
        }

        info!(
            sample_rate = this.format.sample_rate,
            channels = this.format.channels,
            length = this.length,
            "Decoder ready"
        );
        Ok(this)
    }

    /// Count frames by walking every packet, then rewind
    fn scan_length(&mut self) -> Result<u64> {
        debug!("Container has no frame count, scanning packets");
        let mut end = 0u64;
        loop {
            match self.reader.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => {
                    end = end.max(packet.ts() + packet.dur());
                }
                Ok(_) => {}
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {}
                Err(e) => return Err(map_symphonia_error(e)),
            }
        }

        self.reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: 0,
                    track_id: self.track_id,
                },
            )
            .map_err(map_symphonia_error)?;
        self.decoder.reset();
        Ok(end)
    }

    /// Decode packets until at least one frame lands in `pending`
    ///
    /// Returns false at end of stream.
    fn decode_packet(&mut self) -> Result<bool> {
        let mut consecutive_errors = 0;

        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(map_symphonia_error(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    consecutive_errors += 1;
                    warn!(ts = packet.ts(), error = msg, "Skipping corrupt packet");
                    if consecutive_errors >= MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(PlayerError::Decode(format!(
                            "{consecutive_errors} corrupt packets in a row: {msg}"
                        )));
                    }
                    continue;
                }
                Err(e) => return Err(map_symphonia_error(e)),
            };
            consecutive_errors = 0;

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }

            let channels = spec.channels.count() as u16;
            if self.format.channels == 0 {
                self.format.channels = channels;
            } else if channels != self.format.channels {
                return Err(PlayerError::Decode(format!(
                    "channel count changed from {} to {channels}",
                    self.format.channels
                )));
            }

            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);

            let mut skip = 0usize;
            if let Some(target) = self.seek_target {
                let ts = packet.ts();
                if ts + frames as u64 <= target {
                    continue;
                }
                skip = target.saturating_sub(ts) as usize;
                self.seek_target = None;
            }

            let channels = channels as usize;
            self.pending
                .extend_from_slice(&buf.samples()[skip * channels..frames * channels]);
            return Ok(true);
        }
    }
}

impl FrameDecoder for TrackDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn decode_next(&mut self, max_frames: usize) -> Result<Option<Vec<f32>>> {
        if self.pending.is_empty() && !self.decode_packet()? {
            return Ok(None);
        }

        let take = (max_frames.max(1) * self.format.channels as usize).min(self.pending.len());
        Ok(Some(self.pending.drain(..take).collect()))
    }

    fn seek(&mut self, frame: u64) -> Result<u64> {
        if frame >= self.length {
            return Err(PlayerError::OutOfRange {
                offset: frame,
                length: self.length,
            });
        }

        let seeked = self
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| match e {
                SymphoniaError::SeekError(SeekErrorKind::OutOfRange) => PlayerError::OutOfRange {
                    offset: frame,
                    length: self.length,
                },
                other => map_symphonia_error(other),
            })?;

        self.decoder.reset();
        self.pending.clear();
        self.seek_target = Some(seeked.required_ts);

        debug!(
            requested = frame,
            actual = seeked.actual_ts,
            required = seeked.required_ts,
            "Decoder seek"
        );
        Ok(seeked.required_ts)
    }
}

/// Map Symphonia's errors onto the player's taxonomy
fn map_symphonia_error(err: SymphoniaError) -> PlayerError {
    match err {
        SymphoniaError::IoError(e) => PlayerError::from_io(&e),
        SymphoniaError::Unsupported(what) => PlayerError::FormatUnsupported(what.to_string()),
        SymphoniaError::DecodeError(what) => PlayerError::Decode(what.to_string()),
        SymphoniaError::SeekError(kind) => PlayerError::Decode(format!("seek failed: {kind:?}")),
        other => PlayerError::Decode(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::remote::RemoteStream;
    use crate::audio::remote::tests::FakeFetcher;
    use std::io::Cursor;
    use std::sync::Arc;
    use symphonia::core::audio::{AsAudioBufferRef, AudioBuffer, AudioBufferRef, Channels, Signal, SignalSpec};
    use symphonia::core::codecs::{CodecDescriptor, FinalizeResult};
    use symphonia::core::formats::{Cue, Packet, SeekedTo, Track};
    use symphonia::core::meta::{Metadata, MetadataLog};

    const RATE: u32 = 8000;

    fn sample_value(frame: usize, channel: usize) -> i16 {
        ((frame % 1000) as i16) * 16 + channel as i16
    }

    pub(crate) fn wav_bytes(channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for frame in 0..frames {
                for channel in 0..channels as usize {
                    writer.write_sample(sample_value(frame, channel)).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn open_remote(data: Vec<u8>) -> Result<TrackDecoder> {
        let stream = RemoteStream::open(Arc::new(FakeFetcher::new(data)))?;
        TrackDecoder::open(stream, Some("wav"))
    }

    fn expected(frame: usize, channel: usize) -> f32 {
        sample_value(frame, channel) as f32 / 32768.0
    }

    #[test]
    fn test_open_reports_format_and_length() {
        let decoder = open_remote(wav_bytes(1, 4000)).unwrap();

        assert_eq!(
            decoder.format(),
            AudioFormat {
                sample_rate: RATE,
                channels: 1
            }
        );
        assert_eq!(decoder.length(), 4000);
    }

    #[test]
    fn test_decodes_every_frame_in_order() {
        let mut decoder = open_remote(wav_bytes(1, 4000)).unwrap();

        let mut all = Vec::new();
        while let Some(block) = decoder.decode_next(256).unwrap() {
            assert!(block.len() <= 256);
            all.extend(block);
        }

        assert_eq!(all.len(), 4000);
        for frame in [0, 1, 999, 1000, 3999] {
            assert!((all[frame] - expected(frame, 0)).abs() < 1e-4);
        }
    }

    #[test]
    fn test_stereo_frames_are_interleaved() {
        let mut decoder = open_remote(wav_bytes(2, 500)).unwrap();
        assert_eq!(decoder.format().channels, 2);

        let block = decoder.decode_next(4).unwrap().unwrap();
        assert_eq!(block.len(), 8);
        assert!((block[2] - expected(1, 0)).abs() < 1e-4);
        assert!((block[3] - expected(1, 1)).abs() < 1e-4);
    }

    #[test]
    fn test_seek_resumes_at_requested_frame() {
        let mut decoder = open_remote(wav_bytes(1, 4000)).unwrap();
        decoder.decode_next(100).unwrap();

        assert_eq!(decoder.seek(2500).unwrap(), 2500);
        let block = decoder.decode_next(10).unwrap().unwrap();
        assert!((block[0] - expected(2500, 0)).abs() < 1e-4);
        assert!((block[9] - expected(2509, 0)).abs() < 1e-4);
    }

    #[test]
    fn test_seek_past_end_is_out_of_range() {
        let mut decoder = open_remote(wav_bytes(1, 100)).unwrap();

        assert!(matches!(
            decoder.seek(100),
            Err(PlayerError::OutOfRange {
                offset: 100,
                length: 100
            })
        ));
    }

    #[test]
    fn test_unknown_container_is_unsupported() {
        let garbage = vec![0x42u8; 4096];
        let err = open_remote(garbage).err().unwrap();

        assert!(matches!(err, PlayerError::FormatUnsupported(_)));
    }

    // Packet-level fakes for container and codec behavior WAV cannot show:
    // a missing frame count, seeks landing on a packet boundary, and
    // corrupt packets.

    const PACKET_FRAMES: u64 = 100;
    const CORRUPT: &[u8] = b"corrupt";

    /// Mono container of fixed-size packets
    struct PacketReader {
        tracks: Vec<Track>,
        /// Packet start timestamps, with whether the packet is corrupt
        packets: Vec<(u64, bool)>,
        next: usize,
        metadata: MetadataLog,
    }

    impl PacketReader {
        fn new(packets: usize, corrupt: &[usize], declare_length: bool) -> (Self, CodecParameters) {
            let mut params = CodecParameters::new();
            params
                .with_sample_rate(RATE)
                .with_channels(Channels::FRONT_LEFT);
            if declare_length {
                params.with_n_frames(packets as u64 * PACKET_FRAMES);
            }

            let reader = Self {
                tracks: vec![Track::new(1, params.clone())],
                packets: (0..packets)
                    .map(|i| (i as u64 * PACKET_FRAMES, corrupt.contains(&i)))
                    .collect(),
                next: 0,
                metadata: MetadataLog::default(),
            };
            (reader, params)
        }
    }

    impl FormatReader for PacketReader {
        fn try_new(_: MediaSourceStream, _: &FormatOptions) -> symphonia::core::errors::Result<Self> {
            Err(SymphoniaError::Unsupported("packet reader is built directly"))
        }

        fn cues(&self) -> &[Cue] {
            &[]
        }

        fn metadata(&mut self) -> Metadata<'_> {
            self.metadata.metadata()
        }

        /// Lands on the start of the packet holding the target
        fn seek(&mut self, _: SeekMode, to: SeekTo) -> symphonia::core::errors::Result<SeekedTo> {
            let SeekTo::TimeStamp { ts, track_id } = to else {
                return Err(SymphoniaError::SeekError(SeekErrorKind::Unseekable));
            };
            let index = (ts / PACKET_FRAMES) as usize;
            if index >= self.packets.len() {
                return Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange));
            }
            self.next = index;
            Ok(SeekedTo {
                track_id,
                required_ts: ts,
                actual_ts: self.packets[index].0,
            })
        }

        fn tracks(&self) -> &[Track] {
            &self.tracks
        }

        fn next_packet(&mut self) -> symphonia::core::errors::Result<Packet> {
            let Some(&(ts, corrupt)) = self.packets.get(self.next) else {
                return Err(SymphoniaError::IoError(std::io::ErrorKind::UnexpectedEof.into()));
            };
            self.next += 1;
            let data: &[u8] = if corrupt { CORRUPT } else { b"ok" };
            Ok(Packet::new_from_slice(1, ts, PACKET_FRAMES, data))
        }

        fn into_inner(self: Box<Self>) -> MediaSourceStream {
            MediaSourceStream::new(Box::new(Cursor::new(Vec::<u8>::new())), Default::default())
        }
    }

    /// Decodes each sample to its own frame index
    struct IndexDecoder {
        params: CodecParameters,
        buf: AudioBuffer<f32>,
    }

    impl IndexDecoder {
        fn new(params: &CodecParameters) -> Self {
            Self {
                params: params.clone(),
                buf: AudioBuffer::new(PACKET_FRAMES, SignalSpec::new(RATE, Channels::FRONT_LEFT)),
            }
        }
    }

    impl Decoder for IndexDecoder {
        fn try_new(_: &CodecParameters, _: &DecoderOptions) -> symphonia::core::errors::Result<Self> {
            Err(SymphoniaError::Unsupported("index decoder is built directly"))
        }

        fn supported_codecs() -> &'static [CodecDescriptor] {
            &[]
        }

        fn reset(&mut self) {
            self.buf.clear();
        }

        fn codec_params(&self) -> &CodecParameters {
            &self.params
        }

        fn decode(&mut self, packet: &Packet) -> symphonia::core::errors::Result<AudioBufferRef<'_>> {
            if packet.buf() == CORRUPT {
                return Err(SymphoniaError::DecodeError("invalid frame header"));
            }
            self.buf.clear();
            self.buf.render_reserved(Some(packet.dur() as usize));
            for (i, sample) in self.buf.chan_mut(0).iter_mut().enumerate() {
                *sample = (packet.ts() + i as u64) as f32;
            }
            Ok(self.buf.as_audio_buffer_ref())
        }

        fn finalize(&mut self) -> FinalizeResult {
            FinalizeResult::default()
        }

        fn last_decoded(&self) -> AudioBufferRef<'_> {
            self.buf.as_audio_buffer_ref()
        }
    }

    fn packet_decoder(packets: usize, corrupt: &[usize], declare_length: bool) -> Result<TrackDecoder> {
        let (reader, params) = PacketReader::new(packets, corrupt, declare_length);
        let decoder = IndexDecoder::new(&params);
        TrackDecoder::from_parts(Box::new(reader), Box::new(decoder), 1, &params)
    }

    fn decode_all(decoder: &mut TrackDecoder) -> Result<Vec<f32>> {
        let mut all = Vec::new();
        while let Some(block) = decoder.decode_next(64)? {
            all.extend(block);
        }
        Ok(all)
    }

    #[test]
    fn test_missing_frame_count_is_scanned_then_rewound() {
        let mut decoder = packet_decoder(10, &[], false).unwrap();
        assert_eq!(decoder.length(), 1000);

        // The scan must leave the reader back at the first packet
        let all = decode_all(&mut decoder).unwrap();
        let expected: Vec<f32> = (0..1000).map(|f| f as f32).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_seek_inside_packet_drops_leading_frames() {
        let mut decoder = packet_decoder(10, &[], true).unwrap();
        decoder.decode_next(64).unwrap();

        assert_eq!(decoder.seek(250).unwrap(), 250);
        let block = decoder.decode_next(10).unwrap().unwrap();
        assert_eq!(block[0], 250.0);
        assert_eq!(block[9], 259.0);

        // Rest of the packet, then the next one
        let rest = decode_all(&mut decoder).unwrap();
        assert_eq!(rest.first(), Some(&260.0));
        assert_eq!(rest.len(), 1000 - 260);
    }

    #[test]
    fn test_seek_on_packet_boundary() {
        let mut decoder = packet_decoder(10, &[], true).unwrap();

        assert_eq!(decoder.seek(300).unwrap(), 300);
        let block = decoder.decode_next(1).unwrap().unwrap();
        assert_eq!(block, vec![300.0]);
    }

    #[test]
    fn test_isolated_corrupt_packets_are_skipped() {
        let mut decoder = packet_decoder(10, &[3, 6, 7], true).unwrap();

        let all = decode_all(&mut decoder).unwrap();
        assert_eq!(all.len(), 700);
        assert_eq!(all[299], 299.0);
        assert_eq!(all[300], 400.0);
        assert_eq!(all[500], 800.0);
    }

    #[test]
    fn test_run_of_corrupt_packets_is_decode_error() {
        // Seven in a row is tolerated
        let corrupt: Vec<usize> = (2..9).collect();
        let all = decode_all(&mut packet_decoder(10, &corrupt, true).unwrap()).unwrap();
        assert_eq!(all.len(), 300);

        let corrupt: Vec<usize> = (2..10).collect();
        let mut decoder = packet_decoder(12, &corrupt, true).unwrap();
        let err = decode_all(&mut decoder).unwrap_err();
        assert!(matches!(err, PlayerError::Decode(msg) if msg.contains("8 corrupt packets")));
    }

    #[test]
    fn test_audio_format_frames_for_secs() {
        let format = AudioFormat {
            sample_rate: 44100,
            channels: 2,
        };
        assert_eq!(format.frames_for_secs(1.0), 44100);
        assert_eq!(format.frames_for_secs(0.5), 22050);
    }
}

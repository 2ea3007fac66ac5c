//! Decoder engine capability boundary
//!
//! The grabber core never talks to a media library directly. An engine
//! implements [`MediaEngine`] and drives the decode side of a session by
//! invoking [`DecodeCallbacks`] from its own thread; the consumer side
//! controls playback through [`EngineSession`]. Any engine exposing these
//! operations is substitutable.

use std::fmt;
use std::sync::Arc;

pub mod ffmpeg;

/// Four character code identifying a pixel layout or sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const RV24: FourCc = FourCc(*b"RV24");
    pub const RV32: FourCc = FourCc(*b"RV32");

    /// Build a tag from a string, padding with spaces past 4 bytes.
    pub fn new(tag: &str) -> FourCc {
        let mut bytes = [b' '; 4];
        for (slot, byte) in bytes.iter_mut().zip(tag.bytes()) {
            *slot = byte;
        }
        FourCc(bytes)
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{}", byte as char)?;
        }
        Ok(())
    }
}

/// Video format proposal, engine → bridge.
///
/// `intrinsic_size` is the size declared by the container's track metadata,
/// when the engine was able to read it before decoding started. A negative
/// height marks bottom-up row order.
#[derive(Debug, Clone, Copy)]
pub struct VideoFormatRequest {
    pub chroma: FourCc,
    pub width: u32,
    pub height: u32,
    pub intrinsic_size: Option<(i32, i32)>,
}

/// Negotiated video format, bridge → engine.
///
/// The engine must deliver rows of `pitch` bytes, `lines` rows per frame,
/// in the pixel layout named by `chroma`.
#[derive(Debug, Clone, Copy)]
pub struct VideoFormatReply {
    pub chroma: FourCc,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub lines: u32,
}

/// Audio format announcement, engine → bridge.
#[derive(Debug, Clone, Copy)]
pub struct AudioFormatRequest {
    pub tag: FourCc,
    pub rate: u32,
    pub channels: u32,
}

/// Lifecycle events republished to the consumer without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    EndReached = 265,
    TimeChanged = 267,
    PositionChanged = 268,
    LengthChanged = 273,
}

impl EventKind {
    /// Numeric event code as forwarded to the consumer.
    pub fn code(&self) -> i64 {
        *self as i64
    }
}

/// One engine event: code plus two opaque parameters.
#[derive(Debug, Clone, Copy)]
pub struct PlayerEvent {
    pub kind: EventKind,
    pub param1: i64,
    pub param2: i64,
}

impl PlayerEvent {
    pub fn new(kind: EventKind) -> PlayerEvent {
        PlayerEvent { kind, param1: 0, param2: 0 }
    }
}

/// Receiver side of the decode callbacks.
///
/// All methods are invoked from the engine's decode thread and must return
/// quickly; a slow callback stalls decoding. Implementations never panic
/// across this boundary except on broken hand-off invariants.
pub trait DecodeCallbacks: Send + Sync {
    /// Negotiate the video format. `None` rejects the format and stops the
    /// video path for this session.
    fn video_format(&self, request: &VideoFormatRequest) -> Option<VideoFormatReply>;

    /// Release video resources at the end of the video path.
    fn video_cleanup(&self);

    /// Borrow the buffer to decode the next frame into. `None` means the
    /// frame must be skipped (the hand-off channel is not armed).
    fn video_lock(&self) -> Option<FrameLease>;

    /// Return a filled buffer. The bridge completes the hand-off.
    fn video_unlock(&self, lease: FrameLease);

    /// The frame returned by the last unlock is ready for display.
    fn video_display(&self);

    /// Announce the PCM format. Returns 0 on success, nonzero to reject.
    fn audio_setup(&self, request: &AudioFormatRequest) -> i32;

    /// Release audio resources at the end of the audio path.
    fn audio_cleanup(&self);

    /// Deliver decoded PCM. `count` is in sample frames, not bytes.
    fn audio_play(&self, samples: &[u8], count: u32, pts: i64);

    fn audio_pause(&self, pts: i64);
    fn audio_resume(&self, pts: i64);
    fn audio_flush(&self, pts: i64);
    fn audio_drain(&self);

    /// Engine-side volume/mute changed.
    fn audio_volume(&self, volume: f32, muted: bool);

    /// Lifecycle/time/position/length notification.
    fn event(&self, event: PlayerEvent);
}

/// Pixel buffer lent out for one lock/unlock cycle.
///
/// Opaque to the engine apart from the pixel bytes; the bridge validates the
/// cycle on unlock.
pub struct FrameLease {
    pub(crate) data: Vec<u8>,
    pub(crate) cycle: u32,
}

impl FrameLease {
    pub fn pixels(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Playback controls of one open session.
///
/// Calls on a session whose engine already stopped are safe no-ops with the
/// documented sentinel results.
pub trait EngineSession: Send {
    /// Stop playback. Blocks until no further callback will fire.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;
    fn is_seekable(&self) -> bool;
    fn can_pause(&self) -> bool;

    /// Media length in milliseconds, -1 if unknown.
    fn length_ms(&self) -> i64;
    /// Playback time in milliseconds, -1 if unknown.
    fn time_ms(&self) -> i64;
    /// Seek to a time in milliseconds. Returns -1 on failure.
    fn set_time_ms(&mut self, time: i64) -> i32;

    /// Playback position in [0,1], -1.0 if unknown.
    fn position(&self) -> f32;
    /// Seek to a position in [0,1]. Returns -1 on failure.
    fn set_position(&mut self, position: f32) -> i32;

    fn rate(&self) -> f32;
    fn set_rate(&mut self, rate: f32) -> i32;

    fn set_pause(&mut self, pause: bool);
    fn toggle_pause(&mut self);

    /// Software volume in [0,100], -1 if unavailable.
    fn volume(&self) -> i32;
    fn set_volume(&mut self, volume: i32) -> i32;
    fn muted(&self) -> bool;
    fn set_mute(&mut self, mute: bool);
    fn toggle_mute(&mut self);
}

/// What to open and how.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub location: String,
    pub options: Vec<String>,
    /// Register the audio callbacks for this session.
    pub grab_audio: bool,
}

/// A decoding engine able to open media sessions.
pub trait MediaEngine: Send + Sync {
    /// Open `request.location` and start playback. The engine holds the
    /// callbacks for the lifetime of the session and invokes them from its
    /// decode thread. On failure every partially constructed resource is
    /// released before returning.
    fn open(
        &self,
        request: OpenRequest,
        callbacks: Arc<dyn DecodeCallbacks>,
    ) -> anyhow::Result<Box<dyn EngineSession>>;
}

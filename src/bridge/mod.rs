//! Decode-callback bridge
//!
//! The bridge owns the engine session and stands between the decode thread
//! and the consumer: format proposals go through the [`FormatNegotiator`],
//! video frames into the [`FrameChannel`], PCM into the [`WaveWriter`], and
//! engine events onto an owned channel the consumer drains on its own
//! schedule.
//!
//! Threading: the [`DecodeCallbacks`] implementation runs on the engine's
//! decode thread. The video path takes no lock of its own, the hand-off
//! protocol lives in the frame channel. The audio path is serialized by one
//! mutex shared with sink setup and teardown. Transport calls are issued
//! from the consumer thread and are safe no-ops on a closed session.

pub mod format;

use crate::bridge::format::{sample_bits, stride, FormatNegotiator, VideoFormat};
use crate::display::FrameChannel;
use crate::engine::{
    AudioFormatRequest, DecodeCallbacks, EngineSession, FourCc, FrameLease, MediaEngine,
    OpenRequest, PlayerEvent, VideoFormatReply, VideoFormatRequest,
};
use crate::sink::WaveWriter;
use anyhow::Context;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Extra rows allocated beyond the negotiated height, slack for decoders
/// that write past the visible extent.
pub const FRAME_MARGIN_ROWS: i32 = 32;

/// What the bridge republishes to the consumer.
#[derive(Debug, Clone, Copy)]
pub enum BridgeEvent {
    /// Engine lifecycle/time/position/length notification, forwarded
    /// verbatim.
    Player(PlayerEvent),
    /// The PCM format was announced; the audio sink can be opened.
    AudioFormatReady(AudioFormat),
}

/// Negotiated PCM format. `bits` is 0 while unknown or when the sample tag
/// was not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub tag: FourCc,
    pub rate: u32,
    pub channels: u32,
    pub bits: u32,
}

impl AudioFormat {
    fn unset() -> AudioFormat {
        AudioFormat {
            tag: FourCc(*b"    "),
            rate: 0,
            channels: 0,
            bits: 0,
        }
    }
}

struct AudioPipeline {
    format: AudioFormat,
    sink: WaveWriter,
    bytes_written: u64,
}

/// Callback-side state, shared with the engine for the session's lifetime.
struct BridgeShared {
    negotiator: FormatNegotiator,
    channel: Arc<FrameChannel>,
    /// Consumer's chance to rewrite a proposed video format before it is
    /// adopted.
    format_hook: Mutex<Box<dyn Fn(&mut VideoFormat) + Send + Sync>>,
    audio: Mutex<AudioPipeline>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    frames_committed: AtomicU64,
}

impl DecodeCallbacks for BridgeShared {
    fn video_format(&self, request: &VideoFormatRequest) -> Option<VideoFormatReply> {
        let mut format = self.negotiator.propose(request);
        {
            let hook = self.format_hook.lock().unwrap();
            (*hook)(&mut format);
        }
        self.negotiator.adopt(&format);

        let (max_width, max_height) = self.channel.max_extent();
        if !self.channel.is_armed() {
            log::info!(
                "Video format {}x{} at {} bits, arming frame channel",
                format.width,
                format.height,
                format.bits
            );
            if !self
                .channel
                .start(format.width, format.height + FRAME_MARGIN_ROWS, format.bits)
            {
                log::error!("Video format {}x{} rejected", format.width, format.height);
                return None;
            }
        } else if format.width > max_width || format.height > max_height {
            // Safe to restart inline: this is the producer thread and no
            // lease is outstanding during a format callback.
            log::info!(
                "Video format grew to {}x{}, restarting frame channel",
                format.width,
                format.height
            );
            self.channel.stop();
            if !self
                .channel
                .start(format.width, format.height + FRAME_MARGIN_ROWS, format.bits)
            {
                log::error!("Video format {}x{} rejected", format.width, format.height);
                return None;
            }
        }

        // The engine packs rows at the channel's allocation stride, which
        // can exceed the frame's own minimum after a shrink.
        format.stride = self.channel.row_stride();
        self.negotiator.adopt(&format);

        Some(VideoFormatReply {
            chroma: self.negotiator.chroma(),
            width: format.width as u32,
            height: format.height as u32,
            pitch: format.stride as u32,
            lines: format.height as u32,
        })
    }

    fn video_cleanup(&self) {
        log::debug!("Video path cleaned up");
    }

    fn video_lock(&self) -> Option<FrameLease> {
        if !self.channel.is_armed() {
            return None;
        }
        Some(self.channel.acquire_write_buffer())
    }

    fn video_unlock(&self, lease: FrameLease) {
        let format = self.negotiator.current();
        if self.channel.commit(lease, format.width, format.height) {
            self.frames_committed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn video_display(&self) {}

    fn audio_setup(&self, request: &AudioFormatRequest) -> i32 {
        let bits = sample_bits(request.tag);
        if bits == 0 {
            log::warn!(
                "Unknown audio sample format '{}', samples will not be persisted",
                request.tag
            );
        } else {
            log::info!(
                "Audio format '{}' {} Hz {} ch ({} bits)",
                request.tag,
                request.rate,
                request.channels,
                bits
            );
        }

        let format = AudioFormat {
            tag: request.tag,
            rate: request.rate,
            channels: request.channels,
            bits,
        };
        self.audio.lock().unwrap().format = format;

        let _ = self.events.send(BridgeEvent::AudioFormatReady(format));
        0
    }

    fn audio_cleanup(&self) {
        log::debug!("Audio path cleaned up");
    }

    fn audio_play(&self, samples: &[u8], count: u32, _pts: i64) {
        let mut audio = self.audio.lock().unwrap();
        let format = audio.format;

        // Sample frames to bytes; an unknown format derives 0 and the
        // buffer is not persisted.
        let bytes = count as usize * format.channels as usize * format.bits as usize / 8;
        if bytes == 0 {
            return;
        }
        if bytes > samples.len() {
            log::warn!(
                "Audio buffer shorter than its frame count ({} < {} bytes), truncating",
                samples.len(),
                bytes
            );
        }
        let len = bytes.min(samples.len());

        let written = audio.sink.write(&samples[..len]);
        if written > 0 {
            audio.bytes_written += written as u64;
        }
    }

    fn audio_pause(&self, pts: i64) {
        log::debug!("Audio paused at {}", pts);
    }

    fn audio_resume(&self, pts: i64) {
        log::debug!("Audio resumed at {}", pts);
    }

    fn audio_flush(&self, pts: i64) {
        log::debug!("Audio flushed at {}", pts);
    }

    fn audio_drain(&self) {
        log::debug!("Audio drained");
    }

    fn audio_volume(&self, volume: f32, muted: bool) {
        log::debug!("Audio volume {:.2} muted {}", volume, muted);
    }

    fn event(&self, event: PlayerEvent) {
        let _ = self.events.send(BridgeEvent::Player(event));
    }
}

/// Owns the engine session and the callback-side state.
///
/// At most one session is open at a time; opening over a live session closes
/// it first. Closing resets the negotiated formats but leaves the frame
/// channel armed, stopping it is the consumer's step of the teardown
/// sequence.
pub struct DecodeBridge {
    engine: Arc<dyn MediaEngine>,
    shared: Arc<BridgeShared>,
    session: Option<Box<dyn EngineSession>>,
    events_rx: Option<mpsc::UnboundedReceiver<BridgeEvent>>,
}

impl DecodeBridge {
    pub fn new(engine: Arc<dyn MediaEngine>, channel: Arc<FrameChannel>) -> DecodeBridge {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        DecodeBridge {
            engine,
            shared: Arc::new(BridgeShared {
                negotiator: FormatNegotiator::new(),
                channel,
                format_hook: Mutex::new(Box::new(default_format_hook)),
                audio: Mutex::new(AudioPipeline {
                    format: AudioFormat::unset(),
                    sink: WaveWriter::new(),
                    bytes_written: 0,
                }),
                events: events_tx,
                frames_committed: AtomicU64::new(0),
            }),
            session: None,
            events_rx: Some(events_rx),
        }
    }

    /// Take the consumer end of the event channel. Yields `Some` exactly
    /// once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<BridgeEvent>> {
        self.events_rx.take()
    }

    /// Replace the format override applied to every video format proposal.
    /// The default forces 32-bit pixels.
    pub fn set_format_override<F>(&self, hook: F)
    where
        F: Fn(&mut VideoFormat) + Send + Sync + 'static,
    {
        *self.shared.format_hook.lock().unwrap() = Box::new(hook);
    }

    /// Open `location` and start decoding.
    ///
    /// `options` is split on the " :" delimiter into engine option tokens;
    /// text before the first delimiter is ignored. `engine_override` swaps
    /// the engine for this open only. On failure the bridge stays closed.
    pub fn open(
        &mut self,
        engine_override: Option<Arc<dyn MediaEngine>>,
        location: &str,
        options: Option<&str>,
        grab_audio: bool,
    ) -> anyhow::Result<()> {
        if location.is_empty() {
            anyhow::bail!("no media location given");
        }
        self.close();

        self.shared.frames_committed.store(0, Ordering::Relaxed);
        self.shared.audio.lock().unwrap().bytes_written = 0;

        let request = OpenRequest {
            location: location.to_string(),
            options: split_options(options),
            grab_audio,
        };

        let engine = engine_override.as_ref().unwrap_or(&self.engine);
        let callbacks = Arc::clone(&self.shared) as Arc<dyn DecodeCallbacks>;
        let session = engine
            .open(request, callbacks)
            .with_context(|| format!("failed to open '{}'", location))?;

        self.session = Some(session);
        log::info!("Opened '{}'", location);
        Ok(())
    }

    /// Stop and release the session. Idempotent.
    pub fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.stop();

        self.shared.negotiator.reset();
        self.shared.audio.lock().unwrap().format = AudioFormat::unset();
        log::info!("Media session closed");
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Open the PCM sink at `path` with the announced audio format.
    pub fn open_audio_sink(&self, path: &Path) -> io::Result<()> {
        let mut audio = self.shared.audio.lock().unwrap();
        let format = audio.format;
        audio
            .sink
            .open(path, format.channels as u16, format.rate, format.bits as u16)
    }

    /// Finalize and close the PCM sink. Idempotent.
    pub fn close_audio_sink(&self) -> io::Result<()> {
        self.shared.audio.lock().unwrap().sink.close()
    }

    pub fn audio_bytes_written(&self) -> u64 {
        self.shared.audio.lock().unwrap().bytes_written
    }

    pub fn frames_committed(&self) -> u64 {
        self.shared.frames_committed.load(Ordering::Relaxed)
    }

    /// Most recently negotiated video format.
    pub fn video_format(&self) -> VideoFormat {
        self.shared.negotiator.current()
    }

    /// Most recently announced audio format.
    pub fn audio_format(&self) -> AudioFormat {
        self.shared.audio.lock().unwrap().format
    }

    // Transport passthroughs. Each is a no-op with its sentinel result
    // while no session is open.

    pub fn is_playing(&self) -> bool {
        self.session.as_ref().map(|s| s.is_playing()).unwrap_or(false)
    }

    pub fn is_seekable(&self) -> bool {
        self.session.as_ref().map(|s| s.is_seekable()).unwrap_or(false)
    }

    pub fn can_pause(&self) -> bool {
        self.session.as_ref().map(|s| s.can_pause()).unwrap_or(false)
    }

    pub fn length_ms(&self) -> i64 {
        self.session.as_ref().map(|s| s.length_ms()).unwrap_or(-1)
    }

    pub fn time_ms(&self) -> i64 {
        self.session.as_ref().map(|s| s.time_ms()).unwrap_or(-1)
    }

    pub fn set_time_ms(&mut self, time: i64) -> i32 {
        self.session.as_mut().map(|s| s.set_time_ms(time)).unwrap_or(-1)
    }

    pub fn position(&self) -> f32 {
        self.session.as_ref().map(|s| s.position()).unwrap_or(-1.0)
    }

    pub fn set_position(&mut self, position: f32) -> i32 {
        self.session
            .as_mut()
            .map(|s| s.set_position(position))
            .unwrap_or(-1)
    }

    pub fn rate(&self) -> f32 {
        self.session.as_ref().map(|s| s.rate()).unwrap_or(1.0)
    }

    pub fn set_rate(&mut self, rate: f32) -> i32 {
        self.session.as_mut().map(|s| s.set_rate(rate)).unwrap_or(-1)
    }

    pub fn set_pause(&mut self, pause: bool) {
        if let Some(session) = self.session.as_mut() {
            session.set_pause(pause);
        }
    }

    pub fn toggle_pause(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.toggle_pause();
        }
    }

    pub fn volume(&self) -> i32 {
        self.session.as_ref().map(|s| s.volume()).unwrap_or(-1)
    }

    pub fn set_volume(&mut self, volume: i32) -> i32 {
        self.session
            .as_mut()
            .map(|s| s.set_volume(volume))
            .unwrap_or(-1)
    }

    pub fn muted(&self) -> bool {
        self.session.as_ref().map(|s| s.muted()).unwrap_or(false)
    }

    pub fn set_mute(&mut self, mute: bool) {
        if let Some(session) = self.session.as_mut() {
            session.set_mute(mute);
        }
    }

    pub fn toggle_mute(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.toggle_mute();
        }
    }
}

impl Drop for DecodeBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn default_format_hook(format: &mut VideoFormat) {
    format.bits = 32;
    format.stride = stride(format.width, format.bits);
}

/// Split an options string into engine option tokens.
///
/// Tokens begin after the first " :" occurrence; leading text is ignored
/// and empty tokens are skipped.
fn split_options(options: Option<&str>) -> Vec<String> {
    let Some(options) = options else {
        return Vec::new();
    };
    let Some(start) = options.find(" :") else {
        return Vec::new();
    };
    options[start..]
        .split(" :")
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EventKind, OpenRequest};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct ScriptedEngine {
        fail_open: bool,
        last_request: Mutex<Option<OpenRequest>>,
        callbacks: Mutex<Option<Arc<dyn DecodeCallbacks>>>,
        stop_witness: Arc<AtomicBool>,
    }

    impl ScriptedEngine {
        fn callbacks(&self) -> Arc<dyn DecodeCallbacks> {
            self.callbacks
                .lock()
                .unwrap()
                .clone()
                .expect("no session opened")
        }

        fn last_request(&self) -> OpenRequest {
            self.last_request
                .lock()
                .unwrap()
                .clone()
                .expect("no session opened")
        }
    }

    impl MediaEngine for ScriptedEngine {
        fn open(
            &self,
            request: OpenRequest,
            callbacks: Arc<dyn DecodeCallbacks>,
        ) -> anyhow::Result<Box<dyn EngineSession>> {
            if self.fail_open {
                anyhow::bail!("scripted open failure");
            }
            *self.last_request.lock().unwrap() = Some(request);
            *self.callbacks.lock().unwrap() = Some(callbacks);
            Ok(Box::new(ScriptedSession {
                stopped: Arc::clone(&self.stop_witness),
                paused: false,
                rate: 1.0,
                volume: 80,
                muted: false,
            }))
        }
    }

    struct ScriptedSession {
        stopped: Arc<AtomicBool>,
        paused: bool,
        rate: f32,
        volume: i32,
        muted: bool,
    }

    impl EngineSession for ScriptedSession {
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn is_playing(&self) -> bool {
            !self.stopped.load(Ordering::SeqCst) && !self.paused
        }
        fn is_seekable(&self) -> bool {
            false
        }
        fn can_pause(&self) -> bool {
            true
        }
        fn length_ms(&self) -> i64 {
            60_000
        }
        fn time_ms(&self) -> i64 {
            1_234
        }
        fn set_time_ms(&mut self, _time: i64) -> i32 {
            -1
        }
        fn position(&self) -> f32 {
            0.25
        }
        fn set_position(&mut self, _position: f32) -> i32 {
            -1
        }
        fn rate(&self) -> f32 {
            self.rate
        }
        fn set_rate(&mut self, rate: f32) -> i32 {
            self.rate = rate;
            0
        }
        fn set_pause(&mut self, pause: bool) {
            self.paused = pause;
        }
        fn toggle_pause(&mut self) {
            self.paused = !self.paused;
        }
        fn volume(&self) -> i32 {
            self.volume
        }
        fn set_volume(&mut self, volume: i32) -> i32 {
            self.volume = volume.clamp(0, 100);
            0
        }
        fn muted(&self) -> bool {
            self.muted
        }
        fn set_mute(&mut self, mute: bool) {
            self.muted = mute;
        }
        fn toggle_mute(&mut self) {
            self.muted = !self.muted;
        }
    }

    fn scripted_bridge() -> (DecodeBridge, Arc<ScriptedEngine>, Arc<FrameChannel>) {
        let engine = Arc::new(ScriptedEngine::default());
        let channel = Arc::new(FrameChannel::new());
        let bridge = DecodeBridge::new(
            Arc::clone(&engine) as Arc<dyn MediaEngine>,
            Arc::clone(&channel),
        );
        (bridge, engine, channel)
    }

    fn video_request(width: u32, height: u32) -> VideoFormatRequest {
        VideoFormatRequest {
            chroma: FourCc::new("J420"),
            width,
            height,
            intrinsic_size: None,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("framegrab-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_split_options_tokens() {
        assert_eq!(split_options(Some(" :a=1 :b=2")), vec!["a=1", "b=2"]);
        assert_eq!(split_options(Some("ignored head :a=1")), vec!["a=1"]);
        assert_eq!(split_options(Some(" :a=1 :")), vec!["a=1"]);
        assert_eq!(split_options(Some("no delimiter here")), Vec::<String>::new());
        assert_eq!(split_options(None), Vec::<String>::new());
    }

    #[test]
    fn test_open_rejects_empty_location() {
        let (mut bridge, _engine, _channel) = scripted_bridge();
        assert!(bridge.open(None, "", None, false).is_err());
        assert!(!bridge.is_open());
    }

    #[test]
    fn test_open_forwards_request() {
        let (mut bridge, engine, _channel) = scripted_bridge();
        bridge
            .open(None, "movie.mkv", Some(" :input-repeat=2 :no-sub"), true)
            .unwrap();

        let request = engine.last_request();
        assert_eq!(request.location, "movie.mkv");
        assert_eq!(request.options, vec!["input-repeat=2", "no-sub"]);
        assert!(request.grab_audio);
        assert!(bridge.is_open());
    }

    #[test]
    fn test_open_failure_leaves_bridge_closed() {
        let engine = Arc::new(ScriptedEngine {
            fail_open: true,
            ..ScriptedEngine::default()
        });
        let channel = Arc::new(FrameChannel::new());
        let mut bridge =
            DecodeBridge::new(Arc::clone(&engine) as Arc<dyn MediaEngine>, channel);

        assert!(bridge.open(None, "movie.mkv", None, false).is_err());
        assert!(!bridge.is_open());
        assert!(!bridge.is_playing());
    }

    #[test]
    fn test_closed_session_sentinels() {
        let (mut bridge, _engine, _channel) = scripted_bridge();

        assert!(!bridge.is_playing());
        assert!(!bridge.is_seekable());
        assert!(!bridge.can_pause());
        assert_eq!(bridge.length_ms(), -1);
        assert_eq!(bridge.time_ms(), -1);
        assert_eq!(bridge.set_time_ms(1000), -1);
        assert_eq!(bridge.position(), -1.0);
        assert_eq!(bridge.set_position(0.5), -1);
        assert_eq!(bridge.rate(), 1.0);
        assert_eq!(bridge.set_rate(2.0), -1);
        assert_eq!(bridge.volume(), -1);
        assert_eq!(bridge.set_volume(50), -1);
        assert!(!bridge.muted());

        // No-ops, not panics.
        bridge.set_pause(true);
        bridge.toggle_pause();
        bridge.set_mute(true);
        bridge.toggle_mute();
    }

    #[test]
    fn test_transport_passthrough_when_open() {
        let (mut bridge, _engine, _channel) = scripted_bridge();
        bridge.open(None, "movie.mkv", None, false).unwrap();

        assert!(bridge.is_playing());
        assert!(bridge.can_pause());
        assert_eq!(bridge.length_ms(), 60_000);
        assert_eq!(bridge.time_ms(), 1_234);
        assert_eq!(bridge.position(), 0.25);
        assert_eq!(bridge.volume(), 80);
        assert_eq!(bridge.set_volume(40), 0);
        assert_eq!(bridge.volume(), 40);

        bridge.set_pause(true);
        assert!(!bridge.is_playing());
    }

    #[test]
    fn test_close_stops_session_and_is_idempotent() {
        let (mut bridge, engine, _channel) = scripted_bridge();
        bridge.open(None, "movie.mkv", None, false).unwrap();

        bridge.close();
        assert!(engine.stop_witness.load(Ordering::SeqCst));
        assert!(!bridge.is_open());
        assert_eq!(bridge.time_ms(), -1);

        // Formats are back to defaults.
        assert_eq!(bridge.video_format().bits, 32);
        assert_eq!(bridge.video_format().width, 0);
        assert_eq!(bridge.audio_format(), AudioFormat::unset());

        bridge.close();
        assert!(!bridge.is_open());
    }

    #[test]
    fn test_video_format_arms_channel_with_margin() {
        let (mut bridge, engine, channel) = scripted_bridge();
        bridge.open(None, "movie.mkv", None, false).unwrap();

        let reply = engine
            .callbacks()
            .video_format(&video_request(640, 360))
            .unwrap();

        assert_eq!(reply.chroma, FourCc::RV32);
        assert_eq!(reply.width, 640);
        assert_eq!(reply.height, 360);
        assert_eq!(reply.pitch, 2560);
        assert_eq!(reply.lines, 360);

        assert!(channel.is_armed());
        assert_eq!(channel.max_extent(), (640, 360 + FRAME_MARGIN_ROWS));
        assert_eq!(channel.row_stride(), 2560);
    }

    #[test]
    fn test_video_format_regrows_only_on_larger() {
        let (mut bridge, engine, channel) = scripted_bridge();
        bridge.open(None, "movie.mkv", None, false).unwrap();
        let callbacks = engine.callbacks();

        callbacks.video_format(&video_request(320, 240)).unwrap();
        assert_eq!(channel.max_extent(), (320, 272));

        callbacks.video_format(&video_request(640, 480)).unwrap();
        assert_eq!(channel.max_extent(), (640, 512));

        // A smaller format keeps the allocation; rows stay at the
        // allocation stride.
        let reply = callbacks.video_format(&video_request(300, 200)).unwrap();
        assert_eq!(channel.max_extent(), (640, 512));
        assert_eq!(reply.pitch, channel.row_stride() as u32);
        assert_eq!(bridge.video_format().stride, channel.row_stride());
    }

    #[test]
    fn test_video_lock_none_when_unarmed() {
        let (mut bridge, engine, _channel) = scripted_bridge();
        bridge.open(None, "movie.mkv", None, false).unwrap();

        assert!(engine.callbacks().video_lock().is_none());
    }

    #[test]
    fn test_video_lock_unlock_publishes_frame() {
        let (mut bridge, engine, channel) = scripted_bridge();
        bridge.open(None, "movie.mkv", None, false).unwrap();
        let callbacks = engine.callbacks();

        callbacks.video_format(&video_request(64, 48)).unwrap();

        let mut lease = callbacks.video_lock().unwrap();
        lease.pixels().fill(0xAB);
        callbacks.video_unlock(lease);
        callbacks.video_display();

        assert_eq!(bridge.frames_committed(), 1);
        assert!(channel.has_pending());
        assert!(channel.paint(|view| {
            assert_eq!(view.width, 64);
            assert_eq!(view.height, 48);
            assert_eq!(view.data[0], 0xAB);
        }));
    }

    #[test]
    fn test_format_override_is_echoed() {
        let (mut bridge, engine, channel) = scripted_bridge();
        bridge.set_format_override(|format| {
            format.bits = 24;
            format.stride = stride(format.width, 24);
        });
        bridge.open(None, "movie.mkv", None, false).unwrap();

        let reply = engine
            .callbacks()
            .video_format(&video_request(100, 50))
            .unwrap();

        assert_eq!(reply.chroma, FourCc::RV24);
        assert_eq!(reply.pitch, stride(100, 24) as u32);
        assert_eq!(bridge.video_format().bits, 24);
        assert!(channel.is_armed());
    }

    #[test]
    fn test_audio_setup_records_and_notifies() {
        let (mut bridge, engine, _channel) = scripted_bridge();
        let mut events = bridge.take_events().unwrap();
        bridge.open(None, "movie.mkv", None, true).unwrap();

        let result = engine.callbacks().audio_setup(&AudioFormatRequest {
            tag: FourCc::new("s16l"),
            rate: 44_100,
            channels: 2,
        });
        assert_eq!(result, 0);

        let format = bridge.audio_format();
        assert_eq!(format.bits, 16);
        assert_eq!(format.rate, 44_100);
        assert_eq!(format.channels, 2);

        match events.try_recv().unwrap() {
            BridgeEvent::AudioFormatReady(ready) => assert_eq!(ready, format),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_audio_play_derives_bytes_and_persists() {
        let (mut bridge, engine, _channel) = scripted_bridge();
        bridge.open(None, "movie.mkv", None, true).unwrap();
        let callbacks = engine.callbacks();

        callbacks.audio_setup(&AudioFormatRequest {
            tag: FourCc::new("s16l"),
            rate: 44_100,
            channels: 2,
        });

        let path = temp_path("bridge-audio.wav");
        bridge.open_audio_sink(&path).unwrap();

        // 512 frames * 2 ch * 16 bits = 2048 bytes.
        callbacks.audio_play(&vec![7u8; 4096], 512, 0);
        assert_eq!(bridge.audio_bytes_written(), 2048);

        // A short buffer is truncated to what is actually there.
        callbacks.audio_play(&vec![7u8; 1000], 512, 0);
        assert_eq!(bridge.audio_bytes_written(), 3048);

        bridge.close_audio_sink().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44 + 3048);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_audio_play_unknown_tag_is_dropped() {
        let (mut bridge, engine, _channel) = scripted_bridge();
        bridge.open(None, "movie.mkv", None, true).unwrap();
        let callbacks = engine.callbacks();

        callbacks.audio_setup(&AudioFormatRequest {
            tag: FourCc::new("mp4a"),
            rate: 44_100,
            channels: 2,
        });
        assert_eq!(bridge.audio_format().bits, 0);

        let path = temp_path("bridge-audio-unknown.wav");
        bridge.open_audio_sink(&path).unwrap();

        callbacks.audio_play(&vec![7u8; 4096], 512, 0);
        assert_eq!(bridge.audio_bytes_written(), 0);

        bridge.close_audio_sink().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_player_events_forwarded() {
        let (mut bridge, engine, _channel) = scripted_bridge();
        let mut events = bridge.take_events().unwrap();
        bridge.open(None, "movie.mkv", None, false).unwrap();

        let mut event = PlayerEvent::new(EventKind::TimeChanged);
        event.param1 = 5_000;
        engine.callbacks().event(event);
        engine.callbacks().event(PlayerEvent::new(EventKind::EndReached));

        match events.try_recv().unwrap() {
            BridgeEvent::Player(forwarded) => {
                assert_eq!(forwarded.kind, EventKind::TimeChanged);
                assert_eq!(forwarded.param1, 5_000);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match events.try_recv().unwrap() {
            BridgeEvent::Player(forwarded) => {
                assert_eq!(forwarded.kind, EventKind::EndReached);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Taking the receiver twice is refused.
        assert!(bridge.take_events().is_none());
    }
}

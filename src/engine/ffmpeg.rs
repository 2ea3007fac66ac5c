//! FFmpeg-backed decoder engine
//!
//! Wraps `ac-ffmpeg` demuxing and decoding behind the engine capability
//! traits. `open` probes the container synchronously and fails fast; on
//! success one decode thread owning the demuxer and both decoders is
//! spawned, and that thread is the producer of every callback for the
//! session. Video frames are converted to the negotiated RGB layout row by
//! row, audio frames to interleaved 16-bit PCM with soft volume applied.
//! Presentation is paced against a wall clock scaled by the playback rate.

use crate::engine::{
    AudioFormatRequest, DecodeCallbacks, EngineSession, EventKind, FourCc, MediaEngine,
    OpenRequest, PlayerEvent, VideoFormatRequest,
};
use crate::utils::stop::StopSignal;
use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioDecoder, AudioFrame};
use ac_ffmpeg::codec::video::frame::{get_pixel_format, PixelFormat};
use ac_ffmpeg::codec::video::{VideoDecoder, VideoFrame};
use ac_ffmpeg::codec::Decoder;
use ac_ffmpeg::format::demuxer::{Demuxer, DemuxerWithStreamInfo};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::packet::Packet;
use anyhow::Context;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> FfmpegEngine {
        FfmpegEngine
    }
}

impl MediaEngine for FfmpegEngine {
    fn open(
        &self,
        request: OpenRequest,
        callbacks: Arc<dyn DecodeCallbacks>,
    ) -> anyhow::Result<Box<dyn EngineSession>> {
        let file = File::open(&request.location)
            .with_context(|| format!("cannot open '{}'", request.location))?;
        let io = IO::from_seekable_read_stream(file);
        let demuxer = Demuxer::builder()
            .build(io)
            .context("cannot create demuxer")?
            .find_stream_info(None)
            .map_err(|(_, err)| err)
            .context("cannot read stream info")?;

        for option in &request.options {
            log::debug!("Engine option '{}' ignored by this engine", option);
        }

        let mut video = None;
        let mut audio = None;
        let mut length_ms = -1i64;

        for (index, stream) in demuxer.streams().iter().enumerate() {
            let params = stream.codec_parameters();

            if video.is_none() && params.is_video_codec() {
                let decoder = VideoDecoder::from_stream(stream)
                    .context("cannot create video decoder")?
                    .build()
                    .context("cannot open video decoder")?;
                let intrinsic = params
                    .as_video_codec_parameters()
                    .map(|p| (p.width() as i32, p.height() as i32));
                if let Some(ms) = stream.duration().as_millis() {
                    length_ms = length_ms.max(ms);
                }
                if let Some((width, height)) = intrinsic {
                    log::info!("Video stream {}: {}x{}", index, width, height);
                }
                video = Some(VideoPath {
                    decoder,
                    stream_index: index,
                    intrinsic,
                    negotiated: None,
                    rejected: false,
                    warned_layout: false,
                });
            } else if audio.is_none() && request.grab_audio && params.is_audio_codec() {
                let decoder = AudioDecoder::from_stream(stream)
                    .context("cannot create audio decoder")?
                    .build()
                    .context("cannot open audio decoder")?;
                let (rate, channels) = params
                    .as_audio_codec_parameters()
                    .map(|p| (p.sample_rate() as u32, p.channel_layout().channels() as u32))
                    .unwrap_or((44_100, 2));
                if let Some(ms) = stream.duration().as_millis() {
                    length_ms = length_ms.max(ms);
                }
                log::info!("Audio stream {}: {} Hz, {} ch", index, rate, channels);
                audio = Some(AudioPath {
                    decoder,
                    stream_index: index,
                    rate,
                    channels,
                    announced: false,
                    rejected: false,
                    last_gain: 1.0,
                    warned_format: false,
                });
            }
        }

        if video.is_none() && audio.is_none() {
            anyhow::bail!("no decodable video or audio stream in '{}'", request.location);
        }

        let shared = Arc::new(SessionShared {
            stop: StopSignal::new(),
            playing: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            rate: AtomicU32::new(1.0f32.to_bits()),
            volume: AtomicI32::new(100),
            muted: AtomicBool::new(false),
            time_ms: AtomicI64::new(-1),
            length_ms: AtomicI64::new(length_ms),
        });

        let worker = DecodeWorker {
            demuxer,
            video,
            audio,
            shared: Arc::clone(&shared),
            callbacks,
            pacer: None,
            pause_notified: false,
        };
        let thread = thread::Builder::new()
            .name("framegrab-decode".into())
            .spawn(move || worker.run())
            .context("cannot spawn decode thread")?;

        log::info!("Decoding '{}' ({} ms)", request.location, length_ms);
        Ok(Box::new(FfmpegSession {
            shared,
            thread: Some(thread),
        }))
    }
}

/// Shared between the session handle and the decode thread.
struct SessionShared {
    stop: StopSignal,
    playing: AtomicBool,
    paused: AtomicBool,
    /// Playback rate as `f32` bits.
    rate: AtomicU32,
    volume: AtomicI32,
    muted: AtomicBool,
    time_ms: AtomicI64,
    length_ms: AtomicI64,
}

struct FfmpegSession {
    shared: Arc<SessionShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EngineSession for FfmpegSession {
    fn stop(&mut self) {
        self.shared.stop.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Decode thread panicked");
            }
        }
        self.shared.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst) && !self.shared.paused.load(Ordering::SeqCst)
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn can_pause(&self) -> bool {
        true
    }

    fn length_ms(&self) -> i64 {
        self.shared.length_ms.load(Ordering::Relaxed)
    }

    fn time_ms(&self) -> i64 {
        self.shared.time_ms.load(Ordering::Relaxed)
    }

    fn set_time_ms(&mut self, time: i64) -> i32 {
        log::warn!("Seeking to {} ms is not supported by this engine", time);
        -1
    }

    fn position(&self) -> f32 {
        let length = self.shared.length_ms.load(Ordering::Relaxed);
        let time = self.shared.time_ms.load(Ordering::Relaxed);
        if length > 0 && time >= 0 {
            (time as f32 / length as f32).clamp(0.0, 1.0)
        } else {
            -1.0
        }
    }

    fn set_position(&mut self, position: f32) -> i32 {
        log::warn!(
            "Seeking to position {:.3} is not supported by this engine",
            position
        );
        -1
    }

    fn rate(&self) -> f32 {
        f32::from_bits(self.shared.rate.load(Ordering::Relaxed))
    }

    fn set_rate(&mut self, rate: f32) -> i32 {
        if !(0.1..=16.0).contains(&rate) {
            log::warn!("Playback rate {} out of range", rate);
            return -1;
        }
        self.shared.rate.store(rate.to_bits(), Ordering::Relaxed);
        0
    }

    fn set_pause(&mut self, pause: bool) {
        self.shared.paused.store(pause, Ordering::SeqCst);
    }

    fn toggle_pause(&mut self) {
        self.shared.paused.fetch_xor(true, Ordering::SeqCst);
    }

    fn volume(&self) -> i32 {
        self.shared.volume.load(Ordering::Relaxed)
    }

    fn set_volume(&mut self, volume: i32) -> i32 {
        if !(0..=100).contains(&volume) {
            log::warn!("Volume {} out of range", volume);
            return -1;
        }
        self.shared.volume.store(volume, Ordering::Relaxed);
        0
    }

    fn muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    fn set_mute(&mut self, mute: bool) {
        self.shared.muted.store(mute, Ordering::Relaxed);
    }

    fn toggle_mute(&mut self) {
        self.shared.muted.fetch_xor(true, Ordering::Relaxed);
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct NegotiatedVideo {
    width: i32,
    height: i32,
    pitch: i32,
    bits: i32,
    src_width: u32,
    src_height: u32,
}

struct VideoPath {
    decoder: VideoDecoder,
    stream_index: usize,
    intrinsic: Option<(i32, i32)>,
    negotiated: Option<NegotiatedVideo>,
    rejected: bool,
    warned_layout: bool,
}

struct AudioPath {
    decoder: AudioDecoder,
    stream_index: usize,
    rate: u32,
    channels: u32,
    announced: bool,
    rejected: bool,
    last_gain: f32,
    warned_format: bool,
}

/// Everything the decode thread owns.
struct DecodeWorker {
    demuxer: DemuxerWithStreamInfo<File>,
    video: Option<VideoPath>,
    audio: Option<AudioPath>,
    shared: Arc<SessionShared>,
    callbacks: Arc<dyn DecodeCallbacks>,
    pacer: Option<Pacer>,
    pause_notified: bool,
}

impl DecodeWorker {
    fn run(mut self) {
        let length = self.shared.length_ms.load(Ordering::Relaxed);
        if length > 0 {
            let mut event = PlayerEvent::new(EventKind::LengthChanged);
            event.param1 = length;
            self.callbacks.event(event);
        }

        let natural_end = self.demux_loop();
        if natural_end {
            self.drain_decoders();
        }

        if self.audio.is_some() {
            self.callbacks.audio_drain();
            self.callbacks.audio_cleanup();
        }
        if self.video.is_some() {
            self.callbacks.video_cleanup();
        }

        self.shared.playing.store(false, Ordering::SeqCst);
        if natural_end {
            log::info!("End of media reached");
            self.callbacks.event(PlayerEvent::new(EventKind::EndReached));
        }
    }

    /// Returns true when the media ended on its own, false on cancellation.
    fn demux_loop(&mut self) -> bool {
        loop {
            if self.shared.stop.cancelled() {
                return false;
            }
            if !self.park_while_paused() {
                return false;
            }

            match self.demuxer.take() {
                Ok(Some(packet)) => {
                    let index = packet.stream_index();
                    if self.video.as_ref().map(|v| v.stream_index) == Some(index) {
                        if !self.handle_video_packet(packet) {
                            return false;
                        }
                    } else if self.audio.as_ref().map(|a| a.stream_index) == Some(index) {
                        if !self.handle_audio_packet(packet) {
                            return false;
                        }
                    }
                }
                Ok(None) => return true,
                Err(e) => {
                    log::error!("Demuxing failed: {}", e);
                    return true;
                }
            }
        }
    }

    /// Blocks while the session is paused. Returns false on cancellation.
    fn park_while_paused(&mut self) -> bool {
        loop {
            if self.shared.stop.cancelled() {
                return false;
            }
            if !self.shared.paused.load(Ordering::SeqCst) {
                if self.pause_notified {
                    self.pause_notified = false;
                    // Presentation resumes from here, not from where the
                    // clock would have drifted to.
                    self.pacer = None;
                    if self.audio.is_some() {
                        self.callbacks
                            .audio_resume(self.shared.time_ms.load(Ordering::Relaxed));
                    }
                    log::info!("Playback resumed");
                }
                return true;
            }
            if !self.pause_notified {
                self.pause_notified = true;
                if self.audio.is_some() {
                    self.callbacks
                        .audio_pause(self.shared.time_ms.load(Ordering::Relaxed));
                }
                log::info!("Playback paused");
            }
            self.shared.stop.wait_timeout(Duration::from_millis(50));
        }
    }

    fn handle_video_packet(&mut self, packet: Packet) -> bool {
        let Some(video) = self.video.as_mut() else {
            return true;
        };
        if video.rejected {
            return true;
        }
        if let Err(e) = video.decoder.push(packet) {
            log::error!("Video decoder rejected packet: {}", e);
            return true;
        }
        loop {
            match video.decoder.take() {
                Ok(Some(frame)) => {
                    if !render_video_frame(
                        video,
                        &self.shared,
                        self.callbacks.as_ref(),
                        &mut self.pacer,
                        &frame,
                    ) {
                        return false;
                    }
                }
                Ok(None) => return true,
                Err(e) => {
                    log::error!("Video decoding failed: {}", e);
                    return true;
                }
            }
        }
    }

    fn handle_audio_packet(&mut self, packet: Packet) -> bool {
        let Some(audio) = self.audio.as_mut() else {
            return true;
        };
        if audio.rejected {
            return true;
        }
        if let Err(e) = audio.decoder.push(packet) {
            log::error!("Audio decoder rejected packet: {}", e);
            return true;
        }
        let pace_here = self.video.as_ref().map(|v| v.rejected).unwrap_or(true);
        loop {
            match audio.decoder.take() {
                Ok(Some(frame)) => {
                    if !forward_audio_frame(
                        audio,
                        &self.shared,
                        self.callbacks.as_ref(),
                        &mut self.pacer,
                        pace_here,
                        &frame,
                    ) {
                        return false;
                    }
                }
                Ok(None) => return true,
                Err(e) => {
                    log::error!("Audio decoding failed: {}", e);
                    return true;
                }
            }
        }
    }

    /// Flush both decoders and present what they still hold.
    fn drain_decoders(&mut self) {
        if let Some(video) = self.video.as_mut() {
            if !video.rejected {
                if let Err(e) = video.decoder.flush() {
                    log::error!("Video decoder flush failed: {}", e);
                }
                while let Ok(Some(frame)) = video.decoder.take() {
                    if !render_video_frame(
                        video,
                        &self.shared,
                        self.callbacks.as_ref(),
                        &mut self.pacer,
                        &frame,
                    ) {
                        return;
                    }
                }
            }
        }
        if let Some(audio) = self.audio.as_mut() {
            if !audio.rejected {
                if let Err(e) = audio.decoder.flush() {
                    log::error!("Audio decoder flush failed: {}", e);
                }
                let pace_here = self.video.as_ref().map(|v| v.rejected).unwrap_or(true);
                while let Ok(Some(frame)) = audio.decoder.take() {
                    if !forward_audio_frame(
                        audio,
                        &self.shared,
                        self.callbacks.as_ref(),
                        &mut self.pacer,
                        pace_here,
                        &frame,
                    ) {
                        return;
                    }
                }
            }
        }
    }
}

/// Negotiate (when the source extent changed), pace, convert and hand off
/// one decoded frame. Returns false on cancellation.
fn render_video_frame(
    video: &mut VideoPath,
    shared: &SessionShared,
    callbacks: &dyn DecodeCallbacks,
    pacer: &mut Option<Pacer>,
    frame: &VideoFrame,
) -> bool {
    let src_width = frame.width() as u32;
    let src_height = frame.height() as u32;

    let negotiated_for = video
        .negotiated
        .as_ref()
        .map(|n| (n.src_width, n.src_height));
    if negotiated_for != Some((src_width, src_height)) {
        let request = VideoFormatRequest {
            chroma: chroma_tag(frame.pixel_format()),
            width: src_width,
            height: src_height,
            intrinsic_size: video.intrinsic,
        };
        match callbacks.video_format(&request) {
            Some(reply) => {
                log::debug!(
                    "Video format negotiated: {} {}x{} pitch {}",
                    reply.chroma,
                    reply.width,
                    reply.height,
                    reply.pitch
                );
                video.negotiated = Some(NegotiatedVideo {
                    width: reply.width as i32,
                    height: reply.height as i32,
                    pitch: reply.pitch as i32,
                    bits: if reply.chroma == FourCc::RV24 { 24 } else { 32 },
                    src_width,
                    src_height,
                });
            }
            None => {
                log::warn!("Video format rejected, video path disabled");
                video.rejected = true;
                return true;
            }
        }
    }
    let Some(negotiated) = video.negotiated.as_ref() else {
        return true;
    };

    if let Some(pts) = frame.pts().as_millis() {
        if !pace(shared, pacer, pts) {
            return false;
        }
        publish_clock(shared, callbacks, pts);
    }

    let Some(layout) = source_layout(frame.pixel_format()) else {
        if !video.warned_layout {
            log::warn!("Source pixel format not supported, video frames skipped");
            video.warned_layout = true;
        }
        return true;
    };

    let Some(mut lease) = callbacks.video_lock() else {
        return true;
    };
    blit_frame(frame, layout, negotiated, lease.pixels());
    callbacks.video_unlock(lease);
    callbacks.video_display();
    true
}

/// Announce the PCM format once, pace when audio is the clock, scale and
/// forward one decoded frame. Returns false on cancellation.
fn forward_audio_frame(
    audio: &mut AudioPath,
    shared: &SessionShared,
    callbacks: &dyn DecodeCallbacks,
    pacer: &mut Option<Pacer>,
    pace_here: bool,
    frame: &AudioFrame,
) -> bool {
    if !audio.announced {
        audio.announced = true;
        let request = AudioFormatRequest {
            tag: FourCc::new("S16N"),
            rate: audio.rate,
            channels: audio.channels,
        };
        if callbacks.audio_setup(&request) != 0 {
            log::warn!("Audio format rejected, audio path disabled");
            audio.rejected = true;
            return true;
        }
    }

    let pts = frame.pts().as_millis();
    if pace_here {
        if let Some(pts) = pts {
            if !pace(shared, pacer, pts) {
                return false;
            }
            publish_clock(shared, callbacks, pts);
        }
    }

    let muted = shared.muted.load(Ordering::Relaxed);
    let volume = shared.volume.load(Ordering::Relaxed);
    let gain = if muted { 0.0 } else { volume as f32 / 100.0 };
    if (gain - audio.last_gain).abs() > f32::EPSILON {
        audio.last_gain = gain;
        callbacks.audio_volume(volume as f32 / 100.0, muted);
    }

    let Some(pcm) = interleave_frame(frame, audio.channels as usize, gain, &mut audio.warned_format)
    else {
        return true;
    };

    // SAFETY: reinterpreting i16 samples as bytes; the length covers the
    // same allocation and u8 has no alignment requirement.
    let bytes =
        unsafe { std::slice::from_raw_parts(pcm.as_ptr() as *const u8, pcm.len() * 2) };
    callbacks.audio_play(bytes, frame.samples() as u32, pts.unwrap_or(-1));
    true
}

fn publish_clock(shared: &SessionShared, callbacks: &dyn DecodeCallbacks, pts: i64) {
    shared.time_ms.store(pts, Ordering::Relaxed);

    let mut event = PlayerEvent::new(EventKind::TimeChanged);
    event.param1 = pts;
    callbacks.event(event);

    let length = shared.length_ms.load(Ordering::Relaxed);
    if length > 0 {
        let mut event = PlayerEvent::new(EventKind::PositionChanged);
        // Position in permille.
        event.param1 = (pts * 1000 / length).clamp(0, 1000);
        callbacks.event(event);
    }
}

/// Wait until `pts_ms` is due on the wall clock. Returns false when the
/// session was cancelled during the wait.
fn pace(shared: &SessionShared, pacer: &mut Option<Pacer>, pts_ms: i64) -> bool {
    let rate = f32::from_bits(shared.rate.load(Ordering::Relaxed));
    if let Some(pacer) = pacer {
        if pacer.rate == rate {
            let delay = pacer.delay_until(pts_ms);
            if delay.is_zero() {
                return true;
            }
            return !shared.stop.wait_timeout(delay);
        }
    }
    *pacer = Some(Pacer::new(pts_ms, rate));
    true
}

/// Maps media timestamps onto the wall clock, scaled by the playback rate.
/// Rebuilt whenever the rate changes or playback resumes.
struct Pacer {
    origin: Instant,
    base_ms: i64,
    rate: f32,
}

impl Pacer {
    fn new(base_ms: i64, rate: f32) -> Pacer {
        Pacer {
            origin: Instant::now(),
            base_ms,
            rate,
        }
    }

    fn delay_until(&self, pts_ms: i64) -> Duration {
        let media_ms = (pts_ms - self.base_ms).max(0) as f64 / self.rate.max(0.01) as f64;
        let target = self.origin + Duration::from_millis(media_ms as u64);
        target.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RgbOrder {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceLayout {
    Yuv420 { full_range: bool },
    Rgb { order: RgbOrder, bpp: usize },
}

fn source_layout(format: PixelFormat) -> Option<SourceLayout> {
    if format == get_pixel_format("yuv420p") {
        Some(SourceLayout::Yuv420 { full_range: false })
    } else if format == get_pixel_format("yuvj420p") {
        Some(SourceLayout::Yuv420 { full_range: true })
    } else if format == get_pixel_format("rgb24") {
        Some(SourceLayout::Rgb { order: RgbOrder::Rgb, bpp: 3 })
    } else if format == get_pixel_format("bgr24") {
        Some(SourceLayout::Rgb { order: RgbOrder::Bgr, bpp: 3 })
    } else if format == get_pixel_format("rgba") {
        Some(SourceLayout::Rgb { order: RgbOrder::Rgba, bpp: 4 })
    } else if format == get_pixel_format("bgra") {
        Some(SourceLayout::Rgb { order: RgbOrder::Bgra, bpp: 4 })
    } else {
        None
    }
}

fn chroma_tag(format: PixelFormat) -> FourCc {
    if format == get_pixel_format("yuv420p") {
        FourCc::new("I420")
    } else if format == get_pixel_format("yuvj420p") {
        FourCc::new("J420")
    } else if format == get_pixel_format("rgb24") {
        FourCc::new("RGB3")
    } else if format == get_pixel_format("bgr24") {
        FourCc::new("BGR3")
    } else if format == get_pixel_format("rgba") {
        FourCc::new("RGBA")
    } else if format == get_pixel_format("bgra") {
        FourCc::new("BGRA")
    } else {
        FourCc::new("????")
    }
}

fn blit_frame(
    frame: &VideoFrame,
    layout: SourceLayout,
    negotiated: &NegotiatedVideo,
    dst: &mut [u8],
) {
    let width = negotiated.width.min(negotiated.src_width as i32).max(0) as usize;
    let height = negotiated.height.min(negotiated.src_height as i32).max(0) as usize;
    let pitch = negotiated.pitch as usize;
    let planes = frame.planes();

    match layout {
        SourceLayout::Yuv420 { full_range } => {
            if planes.len() < 3 {
                log::error!("Planar 4:2:0 frame with {} planes", planes.len());
                return;
            }
            yuv420_to_rows(
                planes[0].data(),
                planes[0].line_size(),
                planes[1].data(),
                planes[1].line_size(),
                planes[2].data(),
                planes[2].line_size(),
                full_range,
                dst,
                width,
                height,
                pitch,
                negotiated.bits,
            );
        }
        SourceLayout::Rgb { order, bpp } => {
            if planes.is_empty() {
                return;
            }
            rgb_to_rows(
                planes[0].data(),
                planes[0].line_size(),
                order,
                bpp,
                dst,
                width,
                height,
                pitch,
                negotiated.bits,
            );
        }
    }
}

/// Integer BT.601 conversion of one 4:2:0 frame into packed RGB rows.
///
/// Destination rows are `dst_pitch` bytes apart and hold B,G,R,X
/// quadruplets at 32 bits or R,G,B triplets at 24.
#[allow(clippy::too_many_arguments)]
fn yuv420_to_rows(
    y: &[u8],
    y_pitch: usize,
    u: &[u8],
    u_pitch: usize,
    v: &[u8],
    v_pitch: usize,
    full_range: bool,
    dst: &mut [u8],
    width: usize,
    height: usize,
    dst_pitch: usize,
    dst_bits: i32,
) {
    let bpp = (dst_bits / 8) as usize;
    for row in 0..height {
        let y_row = &y[row * y_pitch..];
        let u_row = &u[(row / 2) * u_pitch..];
        let v_row = &v[(row / 2) * v_pitch..];
        let dst_row = &mut dst[row * dst_pitch..row * dst_pitch + width * bpp];

        for x in 0..width {
            let (r, g, b) = yuv_to_rgb(y_row[x], u_row[x / 2], v_row[x / 2], full_range);
            let d = &mut dst_row[x * bpp..x * bpp + bpp];
            if bpp == 4 {
                d[0] = b;
                d[1] = g;
                d[2] = r;
                d[3] = 255;
            } else {
                d[0] = r;
                d[1] = g;
                d[2] = b;
            }
        }
    }
}

fn yuv_to_rgb(y: u8, u: u8, v: u8, full_range: bool) -> (u8, u8, u8) {
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    if full_range {
        let y = y as i32;
        (
            clamp_u8(y + ((359 * e) >> 8)),
            clamp_u8(y - ((88 * d + 183 * e) >> 8)),
            clamp_u8(y + ((454 * d) >> 8)),
        )
    } else {
        let c = y as i32 - 16;
        (
            clamp_u8((298 * c + 409 * e + 128) >> 8),
            clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
            clamp_u8((298 * c + 516 * d + 128) >> 8),
        )
    }
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Repack RGB-family rows into the negotiated layout.
#[allow(clippy::too_many_arguments)]
fn rgb_to_rows(
    src: &[u8],
    src_pitch: usize,
    order: RgbOrder,
    src_bpp: usize,
    dst: &mut [u8],
    width: usize,
    height: usize,
    dst_pitch: usize,
    dst_bits: i32,
) {
    let bpp = (dst_bits / 8) as usize;

    // Matching memory layouts copy whole rows.
    let row_copy = (order == RgbOrder::Bgra && bpp == 4) || (order == RgbOrder::Rgb && bpp == 3);
    if row_copy {
        for row in 0..height {
            let src_row = &src[row * src_pitch..row * src_pitch + width * bpp];
            dst[row * dst_pitch..row * dst_pitch + width * bpp].copy_from_slice(src_row);
        }
        return;
    }

    let (ri, gi, bi) = match order {
        RgbOrder::Rgb | RgbOrder::Rgba => (0, 1, 2),
        RgbOrder::Bgr | RgbOrder::Bgra => (2, 1, 0),
    };
    for row in 0..height {
        let src_row = &src[row * src_pitch..row * src_pitch + width * src_bpp];
        let dst_row = &mut dst[row * dst_pitch..row * dst_pitch + width * bpp];
        for x in 0..width {
            let s = &src_row[x * src_bpp..x * src_bpp + src_bpp];
            let d = &mut dst_row[x * bpp..x * bpp + bpp];
            if bpp == 4 {
                d[0] = s[bi];
                d[1] = s[gi];
                d[2] = s[ri];
                d[3] = 255;
            } else {
                d[0] = s[ri];
                d[1] = s[gi];
                d[2] = s[bi];
            }
        }
    }
}

/// Render one decoded audio frame as interleaved 16-bit PCM with the gain
/// applied. `None` when the sample format is not supported.
fn interleave_frame(
    frame: &AudioFrame,
    channels: usize,
    gain: f32,
    warned: &mut bool,
) -> Option<Vec<i16>> {
    let format = frame.sample_format();
    let samples = frame.samples();
    let planes = frame.planes();
    if channels == 0 || planes.is_empty() {
        return None;
    }

    if format == get_sample_format("fltp") {
        if planes.len() < channels {
            warn_format_once(warned);
            return None;
        }
        let mut per_channel: Vec<&[f32]> = Vec::with_capacity(channels);
        for plane in planes.iter().take(channels) {
            // SAFETY: decoder planes hold `samples` f32 values each and are
            // allocated with f32-compatible alignment.
            per_channel.push(unsafe {
                std::slice::from_raw_parts(plane.data().as_ptr() as *const f32, samples)
            });
        }
        Some(interleave_f32_planes(&per_channel, samples, gain))
    } else if format == get_sample_format("flt") {
        // SAFETY: one packed plane holding samples * channels f32 values.
        let data = unsafe {
            std::slice::from_raw_parts(
                planes[0].data().as_ptr() as *const f32,
                samples * channels,
            )
        };
        Some(scale_f32_packed(data, gain))
    } else if format == get_sample_format("s16p") {
        if planes.len() < channels {
            warn_format_once(warned);
            return None;
        }
        let mut per_channel: Vec<&[i16]> = Vec::with_capacity(channels);
        for plane in planes.iter().take(channels) {
            // SAFETY: decoder planes hold `samples` i16 values each.
            per_channel.push(unsafe {
                std::slice::from_raw_parts(plane.data().as_ptr() as *const i16, samples)
            });
        }
        Some(interleave_i16_planes(&per_channel, samples, gain))
    } else if format == get_sample_format("s16") {
        // SAFETY: one packed plane holding samples * channels i16 values.
        let data = unsafe {
            std::slice::from_raw_parts(
                planes[0].data().as_ptr() as *const i16,
                samples * channels,
            )
        };
        Some(scale_i16_packed(data, gain))
    } else {
        warn_format_once(warned);
        None
    }
}

fn warn_format_once(warned: &mut bool) {
    if !*warned {
        log::warn!("Audio sample layout not supported, samples skipped");
        *warned = true;
    }
}

fn interleave_f32_planes(planes: &[&[f32]], samples: usize, gain: f32) -> Vec<i16> {
    let channels = planes.len();
    let mut out = vec![0i16; samples * channels];
    for (c, plane) in planes.iter().enumerate() {
        for (i, &sample) in plane.iter().take(samples).enumerate() {
            out[i * channels + c] = f32_to_i16(sample * gain);
        }
    }
    out
}

fn scale_f32_packed(data: &[f32], gain: f32) -> Vec<i16> {
    data.iter().map(|&sample| f32_to_i16(sample * gain)).collect()
}

fn interleave_i16_planes(planes: &[&[i16]], samples: usize, gain: f32) -> Vec<i16> {
    let channels = planes.len();
    let mut out = vec![0i16; samples * channels];
    for (c, plane) in planes.iter().enumerate() {
        for (i, &sample) in plane.iter().take(samples).enumerate() {
            out[i * channels + c] = scale_i16(sample, gain);
        }
    }
    out
}

fn scale_i16_packed(data: &[i16], gain: f32) -> Vec<i16> {
    if gain == 1.0 {
        return data.to_vec();
    }
    data.iter().map(|&sample| scale_i16(sample, gain)).collect()
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

fn scale_i16(sample: i16, gain: f32) -> i16 {
    (sample as f32 * gain).round().clamp(-32768.0, 32767.0) as i16
}

//! Grab session driver
//!
//! `GrabWorker` owns the consumer side of one session. It opens the media
//! through the bridge, drains bridge events, keeps the presentation
//! surface current, opens the WAV sink once the PCM format is known and
//! writes snapshots per configuration. Teardown runs in the order the
//! hand-off protocol requires: close the bridge, finalize the WAV file,
//! stop the frame channel. The worker summarizes the run as a
//! `SessionReport`.

use crate::bridge::{AudioFormat, BridgeEvent, DecodeBridge};
use crate::config::GrabConfig;
use crate::display::{FrameChannel, PresentationSurface};
use crate::engine::ffmpeg::FfmpegEngine;
use crate::engine::{EventKind, MediaEngine, PlayerEvent};
use crate::utils::stop::StopSignal;
use anyhow::Context;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What one run produced.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub input: String,
    pub length_ms: i64,
    pub video: Option<VideoReport>,
    pub audio: Option<AudioReport>,
    pub frames_committed: u64,
    pub frames_painted: u64,
    pub audio_bytes: u64,
    pub wav: Option<String>,
    pub snapshots: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VideoReport {
    pub width: i32,
    pub height: i32,
    pub bits: i32,
    pub stride: i32,
}

#[derive(Debug, Serialize)]
pub struct AudioReport {
    pub sample_tag: String,
    pub rate: u32,
    pub channels: u32,
    pub bits: u32,
}

/// Serialize the report next to the other outputs.
pub fn write_report(report: &SessionReport, path: &Path) -> anyhow::Result<()> {
    let body =
        serde_json::to_string_pretty(report).context("cannot serialize session report")?;
    std::fs::write(path, body)
        .with_context(|| format!("cannot write session report {}", path.display()))?;
    log::info!("Session report written to {}", path.display());
    Ok(())
}

pub struct GrabWorker {
    config: GrabConfig,
    stop: StopSignal,
    channel: Arc<FrameChannel>,
    bridge: DecodeBridge,
    surface: PresentationSurface,
    wav_path: Option<PathBuf>,
    snapshots: Vec<PathBuf>,
}

impl GrabWorker {
    pub fn new(config: GrabConfig, stop: StopSignal) -> GrabWorker {
        let channel = Arc::new(FrameChannel::new());
        let engine: Arc<dyn MediaEngine> = Arc::new(FfmpegEngine::new());
        let bridge = DecodeBridge::new(engine, Arc::clone(&channel));
        let surface = PresentationSurface::new(Arc::clone(&channel));
        GrabWorker {
            config,
            stop,
            channel,
            bridge,
            surface,
            wav_path: None,
            snapshots: Vec::new(),
        }
    }

    /// Drive one session to completion, then tear it down and summarize.
    pub async fn run(&mut self) -> anyhow::Result<SessionReport> {
        let mut events = self
            .bridge
            .take_events()
            .context("event channel already taken")?;

        self.bridge.open(
            None,
            &self.config.input,
            self.config.options.as_deref(),
            self.config.grab_audio,
        )?;
        self.apply_transport();

        let mut status = tokio::time::interval(Duration::from_millis(500));
        let mut repaint = tokio::time::interval(Duration::from_millis(33));
        let mut last_snapshot = tokio::time::Instant::now();

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(BridgeEvent::Player(event)) => {
                            if self.on_player_event(event) {
                                break;
                            }
                        }
                        Some(BridgeEvent::AudioFormatReady(format)) => {
                            self.open_audio_sink(format);
                        }
                        None => {
                            log::warn!("Event channel closed");
                            break;
                        }
                    }
                }
                _ = repaint.tick() => {
                    if self.stop.cancelled() {
                        log::info!("Stop requested");
                        break;
                    }
                    self.surface.refresh();
                }
                _ = status.tick() => {
                    self.surface.refresh();
                    self.log_progress();
                    if let Some(every) = self.config.snapshot_secs {
                        if last_snapshot.elapsed() >= Duration::from_secs(every) {
                            last_snapshot = tokio::time::Instant::now();
                            self.take_snapshot();
                        }
                    }
                }
            }
        }

        Ok(self.teardown())
    }

    /// Returns true when the session is over.
    fn on_player_event(&mut self, event: PlayerEvent) -> bool {
        match event.kind {
            EventKind::EndReached => {
                log::info!("End of media reached");
                true
            }
            EventKind::TimeChanged => {
                self.surface.refresh();
                false
            }
            EventKind::LengthChanged => {
                log::info!("Media length {} ms", event.param1);
                false
            }
            EventKind::PositionChanged => false,
        }
    }

    /// Config-driven transport tweaks, right after a successful open.
    fn apply_transport(&mut self) {
        if (self.config.rate - 1.0).abs() > f32::EPSILON
            && self.bridge.set_rate(self.config.rate) != 0
        {
            log::warn!("Playback rate {} not applied", self.config.rate);
        }
        if let Some(volume) = self.config.volume {
            if self.bridge.set_volume(volume) != 0 {
                log::warn!("Volume {} not applied", volume);
            }
        }
        if self.config.mute {
            self.bridge.set_mute(true);
        }
    }

    fn open_audio_sink(&mut self, format: AudioFormat) {
        if format.bits == 0 {
            log::warn!("PCM sample format unknown, WAV capture disabled");
            return;
        }
        let path = self.config.wav_path.clone();
        match self.bridge.open_audio_sink(&path) {
            Ok(()) => {
                log::info!(
                    "Capturing {} Hz {} ch PCM to {}",
                    format.rate,
                    format.channels,
                    path.display()
                );
                self.wav_path = Some(path);
            }
            Err(e) => log::error!("Cannot open WAV file {}: {}", path.display(), e),
        }
    }

    fn take_snapshot(&mut self) {
        let Some(dir) = self.config.snapshot_dir.as_ref() else {
            return;
        };
        if self.surface.extent().is_none() {
            return;
        }
        let name = format!(
            "{}-f{}.png",
            Local::now().format("capture-%Y-%m-%d_%H-%M-%S"),
            self.surface.frames_painted()
        );
        let path = dir.join(name);
        match self.surface.snapshot(&path) {
            Ok(()) => self.snapshots.push(path),
            Err(e) => log::error!("Snapshot failed: {:#}", e),
        }
    }

    fn log_progress(&self) {
        let time = self.bridge.time_ms();
        let position = self.bridge.position();
        if position >= 0.0 {
            log::info!(
                "t={} ms / {} ms ({:.1}%), {} frames, {} audio bytes",
                time,
                self.bridge.length_ms(),
                position * 100.0,
                self.surface.frames_painted(),
                self.bridge.audio_bytes_written()
            );
        } else {
            log::info!(
                "t={} ms, {} frames, {} audio bytes",
                time,
                self.surface.frames_painted(),
                self.bridge.audio_bytes_written()
            );
        }
    }

    /// Close everything in the protocol order and summarize the run.
    fn teardown(&mut self) -> SessionReport {
        self.surface.refresh();
        self.take_snapshot();

        let video_format = self.bridge.video_format();
        let audio_format = self.bridge.audio_format();
        let report = SessionReport {
            input: self.config.input.clone(),
            length_ms: self.bridge.length_ms(),
            video: (video_format.width > 0).then(|| VideoReport {
                width: video_format.width,
                height: video_format.height,
                bits: video_format.bits,
                stride: video_format.stride,
            }),
            audio: (audio_format.rate > 0).then(|| AudioReport {
                sample_tag: audio_format.tag.to_string(),
                rate: audio_format.rate,
                channels: audio_format.channels,
                bits: audio_format.bits,
            }),
            frames_committed: self.bridge.frames_committed(),
            frames_painted: self.surface.frames_painted(),
            audio_bytes: self.bridge.audio_bytes_written(),
            wav: self.wav_path.as_ref().map(|p| p.display().to_string()),
            snapshots: self
                .snapshots
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
        };

        self.bridge.close();
        if let Err(e) = self.bridge.close_audio_sink() {
            log::error!("Cannot finalize WAV file: {}", e);
        }
        self.channel.stop();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(input: &str) -> GrabConfig {
        GrabConfig {
            input: input.into(),
            options: None,
            grab_audio: false,
            wav_path: PathBuf::from("unused.wav"),
            snapshot_dir: None,
            snapshot_secs: None,
            report_path: PathBuf::from("unused.json"),
            rate: 1.0,
            volume: None,
            mute: false,
        }
    }

    #[test]
    fn test_player_event_routing() {
        let mut worker = GrabWorker::new(test_config("clip.mkv"), StopSignal::new());

        assert!(!worker.on_player_event(PlayerEvent::new(EventKind::TimeChanged)));
        assert!(!worker.on_player_event(PlayerEvent::new(EventKind::PositionChanged)));

        let mut length = PlayerEvent::new(EventKind::LengthChanged);
        length.param1 = 9_000;
        assert!(!worker.on_player_event(length));

        assert!(worker.on_player_event(PlayerEvent::new(EventKind::EndReached)));
    }

    #[tokio::test]
    async fn test_run_fails_on_missing_input() {
        let mut worker =
            GrabWorker::new(test_config("/nonexistent/media.mkv"), StopSignal::new());
        let err = worker.run().await.unwrap_err();
        assert!(format!("{:#}", err).contains("cannot open"));
    }

    #[test]
    fn test_teardown_without_open_yields_empty_report() {
        let mut worker = GrabWorker::new(test_config("never-opened.mkv"), StopSignal::new());
        let report = worker.teardown();

        assert_eq!(report.input, "never-opened.mkv");
        assert_eq!(report.length_ms, -1);
        assert!(report.video.is_none());
        assert!(report.audio.is_none());
        assert_eq!(report.frames_painted, 0);
        assert_eq!(report.audio_bytes, 0);
        assert!(report.wav.is_none());
        assert!(report.snapshots.is_empty());
    }

    #[test]
    fn test_report_serialization() {
        let report = SessionReport {
            input: "clip.mkv".into(),
            length_ms: 60_000,
            video: Some(VideoReport {
                width: 640,
                height: 480,
                bits: 32,
                stride: 2560,
            }),
            audio: None,
            frames_committed: 100,
            frames_painted: 90,
            audio_bytes: 0,
            wav: None,
            snapshots: vec!["a.png".into()],
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["input"], "clip.mkv");
        assert_eq!(value["video"]["stride"], 2560);
        assert!(value["audio"].is_null());
        assert_eq!(value["snapshots"][0], "a.png");
    }

    #[test]
    fn test_write_report_creates_file() {
        let report = SessionReport {
            input: "clip.mkv".into(),
            length_ms: -1,
            video: None,
            audio: None,
            frames_committed: 0,
            frames_painted: 0,
            audio_bytes: 0,
            wav: None,
            snapshots: Vec::new(),
        };
        let path = std::env::temp_dir().join(format!(
            "framegrab-{}-report.json",
            std::process::id()
        ));

        write_report(&report, &path).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("\"input\""));
        std::fs::remove_file(&path).ok();
    }
}

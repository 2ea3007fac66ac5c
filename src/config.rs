//! Runtime configuration
//!
//! `GrabConfig` is assembled in `main` from the command line. Output
//! locations default to a shared timestamped stem so repeated runs never
//! clobber each other.

use chrono::Local;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct GrabConfig {
    pub input: String,
    /// Engine option string, " :"-delimited tokens.
    pub options: Option<String>,
    pub grab_audio: bool,
    pub wav_path: PathBuf,
    pub snapshot_dir: Option<PathBuf>,
    /// Seconds between periodic snapshots. A final snapshot is always
    /// taken when a snapshot directory is set.
    pub snapshot_secs: Option<u64>,
    pub report_path: PathBuf,
    pub rate: f32,
    pub volume: Option<i32>,
    pub mute: bool,
}

pub fn command() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .value_name("MEDIA")
                .help("Path of the media file to grab.")
                .required(true),
        )
        .arg(
            Arg::new("options")
                .short('o')
                .long("options")
                .value_name("OPTIONS")
                .help("Engine options, \" :\"-delimited (e.g. \" :input-repeat=2\")."),
        )
        .arg(
            Arg::new("audio")
                .short('a')
                .long("audio")
                .help("Capture decoded PCM audio to a WAV file.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("wav")
                .short('w')
                .long("wav")
                .value_name("FILE")
                .help("WAV output path. Defaults to a timestamped name.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("snapshot-dir")
                .short('s')
                .long("snapshot-dir")
                .value_name("DIR")
                .help("Write PNG snapshots of the video into this directory.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("snapshot-every")
                .long("snapshot-every")
                .value_name("SECONDS")
                .help("Take a snapshot every SECONDS seconds.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_name("FILE")
                .help("Session report path. Defaults to a timestamped name.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("rate")
                .short('r')
                .long("rate")
                .value_name("RATE")
                .help("Playback rate.")
                .value_parser(value_parser!(f32))
                .default_value("1.0"),
        )
        .arg(
            Arg::new("volume")
                .long("volume")
                .value_name("0-100")
                .help("Software volume applied to captured audio.")
                .value_parser(value_parser!(i32)),
        )
        .arg(
            Arg::new("mute")
                .short('m')
                .long("mute")
                .help("Capture silence instead of the decoded audio.")
                .action(ArgAction::SetTrue),
        )
}

impl GrabConfig {
    pub fn from_matches(matches: &ArgMatches) -> GrabConfig {
        let stem = default_stem();
        GrabConfig {
            input: matches
                .get_one::<String>("input")
                .cloned()
                .unwrap_or_default(),
            options: matches.get_one::<String>("options").cloned(),
            grab_audio: matches.get_flag("audio"),
            wav_path: matches
                .get_one::<PathBuf>("wav")
                .cloned()
                .unwrap_or_else(|| PathBuf::from(format!("{}.wav", stem))),
            snapshot_dir: matches.get_one::<PathBuf>("snapshot-dir").cloned(),
            snapshot_secs: matches.get_one::<u64>("snapshot-every").copied(),
            report_path: matches
                .get_one::<PathBuf>("report")
                .cloned()
                .unwrap_or_else(|| PathBuf::from(format!("{}.json", stem))),
            rate: matches.get_one::<f32>("rate").copied().unwrap_or(1.0),
            volume: matches.get_one::<i32>("volume").copied(),
            mute: matches.get_flag("mute"),
        }
    }
}

/// Shared stem for this run's default output names.
fn default_stem() -> String {
    Local::now().format("capture-%Y-%m-%d_%H-%M-%S").to_string()
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

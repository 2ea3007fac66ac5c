use crate::config::{app_name, version, GrabConfig};
use crate::utils::stop::StopSignal;
use crate::workers::grabber::write_report;
use crate::workers::GrabWorker;
use std::{panic, process};

pub mod bridge;
pub mod config;
pub mod display;
pub mod engine;
pub mod sink;
pub mod utils;
pub mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = config::command().get_matches();
    let config = GrabConfig::from_matches(&matches);

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    let stop = StopSignal::new();

    // gracefully end the session when receiving SIGINT, SIGTERM, or SIGHUP
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.cancel();
    })
    .expect("Error setting Ctrl-C handler");

    log::info!("{} {} grabbing '{}'", app_name(), version(), config.input);

    let report_path = config.report_path.clone();
    let mut worker = GrabWorker::new(config, stop);
    let report = worker.run().await?;
    write_report(&report, &report_path)?;

    Ok(())
}

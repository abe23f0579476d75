//! Play runtime.
//!
//! Provides device enumeration and local playback with Ctrl-C handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;

use audio_pipeline::{RunOutcome, SessionEnd, device, play_file};

use crate::config::PlayConfig;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Quit plumbing shared between the signal handler and the session.
pub struct QuitHandle {
    pub cancel: Arc<AtomicBool>,
    pub quit_rx: Receiver<()>,
}

/// Route Ctrl-C into a quit request. A second Ctrl-C exits immediately.
pub fn install_ctrlc() -> Result<QuitHandle> {
    let cancel = Arc::new(AtomicBool::new(false));
    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    let cancel_for_signal = cancel.clone();
    ctrlc::set_handler(move || {
        if cancel_for_signal.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        let _ = quit_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;
    Ok(QuitHandle { cancel, quit_rx })
}

/// Play a local file until it ends or quit is requested.
pub fn run_play(config: PlayConfig, quit: QuitHandle) -> Result<()> {
    let device_name = normalize_device_name(config.device);
    let report = play_file(
        &config.path,
        device_name.as_deref(),
        &config.playback,
        quit.cancel,
        quit.quit_rx,
    )?;

    if let Some(run) = report.summary {
        tracing::info!(
            packets = run.packets,
            skipped = run.skipped_packets,
            decode_errors = run.decode_errors,
            resample_errors = run.resample_errors,
            bytes = run.bytes_written,
            "decode summary"
        );
        if run.outcome == RunOutcome::Cancelled && report.end == SessionEnd::Finished {
            tracing::warn!("decode was cancelled before the end of the file");
        }
    }
    if report.status.underrun_events > 0 {
        tracing::warn!(
            events = report.status.underrun_events,
            bytes = report.status.underrun_bytes,
            "output underruns"
        );
    }
    Ok(())
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

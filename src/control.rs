//! Operator commands.
//!
//! Commands arrive as lines on stdin (or any `BufRead`) and from Ctrl-C,
//! and are delivered to the pipeline over an `mpsc` channel. The pipeline
//! polls the channel between frames, so a command never interrupts a frame
//! half way through.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Stop the session and release the source.
    Terminate,
    /// Recompute the background profile from the next frame.
    Recalibrate,
}

impl ControlCommand {
    /// Parse one command line. Unknown input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "terminate" | "quit" | "q" | "exit" | "esc" => Some(ControlCommand::Terminate),
            "recalibrate" | "r" => Some(ControlCommand::Recalibrate),
            _ => None,
        }
    }
}

pub fn channel() -> (Sender<ControlCommand>, Receiver<ControlCommand>) {
    mpsc::channel()
}

/// Forward commands read from `reader` until EOF or until the receiver is
/// dropped.
pub fn spawn_line_reader<R>(reader: R, tx: Sender<ControlCommand>) -> Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name("control".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        log::warn!("control input closed: {}", err);
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let Some(command) = ControlCommand::parse(&line) else {
                    log::warn!("ignoring unknown command '{}'", line.trim());
                    continue;
                };
                if tx.send(command).is_err() {
                    return;
                }
            }
            log::debug!("control input reached end of stream");
        })
        .context("spawn control reader")?;
    Ok(handle)
}

/// Read commands from the process stdin.
pub fn spawn_stdin_reader(tx: Sender<ControlCommand>) -> Result<JoinHandle<()>> {
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()), tx)
}

/// Exit status used when a second Ctrl-C forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Turn Ctrl-C into `Terminate`.
///
/// A second Ctrl-C exits the process immediately, for a session stuck in a
/// read that never returns.
pub fn install_ctrlc(tx: Sender<ControlCommand>) -> Result<()> {
    let mut interrupted = false;
    ctrlc::set_handler(move || {
        if interrupted {
            log::warn!("second interrupt, exiting without teardown");
            std::process::exit(FORCED_EXIT_CODE);
        }
        interrupted = true;
        let _ = tx.send(ControlCommand::Terminate);
    })
    .context("set Ctrl-C handler")
}

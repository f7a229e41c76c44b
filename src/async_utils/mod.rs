//! Asynchronous utilities for use with Tokio.
//!
//! The streaming architecture lives on top of a small number of helpers
//! collected here: a boxed stream alias, a panic-propagating
//! `spawn_blocking` wrapper for CPU-heavy image work, and exit-status
//! checking for the external CLI tools we shell out to.

use std::pin::Pin;

use futures::Stream;
use regex::Regex;

use crate::prelude::*;

pub mod io;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
///
/// Preprocessing a page can burn a second or more of CPU, so it must never
/// run directly on the async executor.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        // Propagate any panics from the blocking task.
        .unwrap()
}

/// Report any command failures, and include any error output.
///
/// `tesseract` and `pdftocairo` both chatter on standard error during normal
/// operation ("Estimating resolution...", font warnings), so we only treat
/// standard error as interesting when the exit status is bad or when the
/// caller supplies a regex that matches a real error line.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
    error_regex: Option<&Regex>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(
        command_name = command_name,
        stdout = %stdout,
        stderr = %stderr,
        "Output from command"
    );

    if output.status.success() {
        if let Some(regex) = error_regex {
            if regex.is_match(&stderr) {
                return Err(anyhow!(
                    "{} printed error output:\n{}",
                    command_name,
                    stderr,
                ));
            }
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::UrlEntry;
use crate::error::AtlasError;
use crate::store::write_atomic_with;
use crate::transfer::Transfer;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub dry_run: bool,
    /// Checked before every entry; setting it stops the batch after the file
    /// in flight.
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub relative_path: String,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub destination: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<FetchFailure>,
    pub cancelled: bool,
    pub dry_run: bool,
}

impl FetchReport {
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

pub struct Fetcher<T: Transfer> {
    transfer: T,
}

impl<T: Transfer> Fetcher<T> {
    pub fn new(transfer: T) -> Self {
        Self { transfer }
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// Downloads every entry under `root`, one at a time. A failing entry is
    /// recorded and the batch moves on.
    pub fn fetch_all(
        &self,
        entries: &[UrlEntry],
        root: &Path,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> FetchReport {
        let mut report = FetchReport {
            destination: root.display().to_string(),
            dry_run: options.dry_run,
            ..FetchReport::default()
        };
        let total = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            if is_cancelled(options) {
                warn!(remaining = total - index, "fetch cancelled");
                report.cancelled = true;
                break;
            }
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Fetch; [{}/{total}] {}",
                    index + 1,
                    entry.relative_path()
                ),
                elapsed: None,
            });
            let start = Instant::now();
            match self.fetch_one(entry, root, options.dry_run) {
                Ok(()) => {
                    sink.event(ProgressEvent {
                        message: format!("collected {} at {}", entry.relative_path(), entry.url()),
                        elapsed: Some(start.elapsed()),
                    });
                    report.succeeded.push(entry.relative_path().to_string());
                }
                Err(err) => {
                    warn!(
                        "could not fetch {} from {}: {err}",
                        entry.relative_path(),
                        entry.url()
                    );
                    sink.event(ProgressEvent {
                        message: format!(
                            "could not fetch {} from {}: {err}",
                            entry.relative_path(),
                            entry.url()
                        ),
                        elapsed: Some(start.elapsed()),
                    });
                    report.failed.push(FetchFailure {
                        relative_path: entry.relative_path().to_string(),
                        url: entry.url().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            succeeded = report.succeeded_count(),
            failed = report.failed_count(),
            cancelled = report.cancelled,
            "fetch finished"
        );
        report
    }

    fn fetch_one(&self, entry: &UrlEntry, root: &Path, dry_run: bool) -> Result<(), AtlasError> {
        let destination = entry.destination(root)?;
        if dry_run {
            return Ok(());
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        }
        write_atomic_with(&destination, |file| {
            let mut out = BufWriter::new(file);
            self.transfer.fetch_to(entry.url(), &mut out)?;
            out.flush()
                .map_err(|err| AtlasError::Filesystem(err.to_string()))
        })
    }
}

fn is_cancelled(options: &FetchOptions) -> bool {
    options
        .cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::SeqCst))
        .unwrap_or(false)
}

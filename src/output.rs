use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DatasetList, FetchResult, GenerateResult, ProgressEvent, ProgressSink, VersionList};
use crate::update::UpdateOutcome;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_datasets(result: &DatasetList) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_versions(result: &VersionList) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_update(result: &UpdateOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_generate(result: &GenerateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Prints progress lines to stderr so stdout stays clean for listings.
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn print_fetch_summary(result: &FetchResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    let report = &result.report;
    let version = result.version.as_deref().unwrap_or("-");
    println!("{} {version} -> {}", result.dataset, report.destination);
    if result.used_latest {
        println!("{yellow}no version given, used latest: {version}{reset}");
    }
    if report.dry_run {
        println!("{yellow}dry run, nothing was downloaded{reset}");
    }
    println!("{green}fetched: {}{reset}", report.succeeded_count());
    let color = if report.failed.is_empty() { green } else { red };
    println!("{color}failed: {}{reset}", report.failed_count());
    for failure in &report.failed {
        println!(
            "{red}  could not fetch {} from {}: {}{reset}",
            failure.relative_path, failure.url, failure.message
        );
    }
    if report.cancelled {
        println!("{yellow}cancelled before all entries were attempted{reset}");
    }
}

pub fn print_generate_summary(result: &GenerateResult) {
    println!("wrote {}", result.manifest_path);
    println!(
        "datasets: {}, entries: {}, skipped urls: {}",
        result.datasets.len(),
        result.entries,
        result.skipped_urls
    );
    for conflict in &result.conflicts {
        println!(
            "conflict {} {} {}: {} replaced {}",
            conflict.dataset, conflict.tag, conflict.relative_path, conflict.url, conflict.replaced_url
        );
    }
    for failure in &result.failures {
        println!("failed {}: {}", failure.dataset, failure.message);
    }
    for file in &result.legacy_files {
        println!("legacy manifest {file}");
    }
}

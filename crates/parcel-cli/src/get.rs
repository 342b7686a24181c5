use std::{path::PathBuf, sync::Arc, time::Duration};

use parcel_config::config::get_config;
use parcel_events::{ChannelSink, CollectorSink, EventSinkHandle, FetchedPackage, NullSink};
use parcel_fetch::{
    default_destination, Cancellation, FetchOptions, FetchReport, Fetcher, GitCli, RegistryClient,
};
use parcel_location::{parse, ParseOptions};
use parcel_utils::time::parse_duration;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    error::{CliError, Result},
    progress::{self, spawn_event_handler},
    utils::{progress_enabled, Colored, Icons},
};

pub struct GetRequest {
    pub location: String,
    pub dest: Option<String>,
    pub clean: bool,
    pub timeout: Option<String>,
    pub parallel: bool,
    pub json: bool,
}

fn cancellation(timeout: Option<&str>, fallback: Option<Duration>) -> Result<Cancellation> {
    let cancel = Cancellation::new();
    let duration = match timeout {
        Some(timeout) => {
            Some(parse_duration(timeout).ok_or_else(|| CliError::InvalidTimeout(timeout.into()))?)
        }
        None => fallback,
    };
    Ok(match duration {
        Some(duration) => cancel.with_timeout(duration),
        None => cancel,
    })
}

pub async fn get_package(request: GetRequest) -> Result<()> {
    let config = get_config();

    let reference = parse(&request.location, &ParseOptions::new().stdin(std::io::stdin()))?;
    let destination = match request.dest {
        Some(dest) => PathBuf::from(dest),
        None => default_destination(&reference)
            .map(PathBuf::from)
            .ok_or_else(|| CliError::NoDestination(request.location.clone()))?,
    };
    debug!("fetching {reference} into {}", destination.display());

    let cancel = cancellation(request.timeout.as_deref(), config.timeout())?;

    let options = FetchOptions::default()
        .clean(request.clean)
        .parallel(request.parallel || config.parallel())
        .max_depth(config.max_depth())
        .cancel(cancel.clone());

    let git = GitCli::new(config.git_binary()?).shallow(config.shallow_clone());
    let registry =
        RegistryClient::new().insecure_registries(config.insecure_registries.unwrap_or_default());

    let collector = request.json.then(|| Arc::new(CollectorSink::default()));
    let (events, progress_guard): (EventSinkHandle, _) = match &collector {
        Some(collector) => (collector.clone(), None),
        None if progress_enabled() => {
            let (sink, receiver) = ChannelSink::new();
            (Arc::new(sink), Some(spawn_event_handler(receiver)))
        }
        None => (Arc::new(NullSink), None),
    };
    let fetcher = Fetcher::new(git, registry).with_events(events);

    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    // The fetcher owns the event sender, so it has to be gone before the progress thread is joined.
    let result = tokio::task::spawn_blocking(move || {
        let result = fetcher.fetch(&reference, &destination, &options);
        drop(fetcher);
        result
    })
    .await
    .map_err(|err| CliError::Custom(format!("fetch task failed: {err}")))?;

    interrupt.abort();
    if let Some(guard) = progress_guard {
        guard.finish();
    }
    progress::stop();

    let report = result?;
    match collector {
        Some(collector) => {
            let summary = json_report(&report, &collector.packages());
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        None => {
            print_report(&report);
            Ok(())
        }
    }
}

fn json_report(report: &FetchReport, fetched: &[FetchedPackage]) -> Value {
    let fetched: Vec<Value> = fetched
        .iter()
        .map(|package| {
            json!({
                "name": package.name,
                "destination": package.destination,
                "source": package.source,
                "revision": package.revision,
                "depth": package.depth,
                "setters": package.setters,
            })
        })
        .collect();
    json!({
        "name": report.name,
        "destination": report.destination,
        "packages": report.packages,
        "upstream": report.upstream,
        "fetched": fetched,
    })
}

fn print_report(report: &FetchReport) {

    let revision = report
        .upstream
        .as_ref()
        .and_then(|upstream| upstream.resolved())
        .map(|rev| format!(" at {rev}"))
        .unwrap_or_default();
    info!(
        "{} Fetched {}{} into {} ({} package{})",
        Icons::PACKAGE,
        Colored(nu_ansi_term::Color::Cyan, &report.name),
        revision,
        report.destination.display(),
        report.packages,
        if report.packages == 1 { "" } else { "s" }
    );
}

use std::{
    collections::HashMap,
    sync::{mpsc::Receiver, Arc, LazyLock},
    thread::JoinHandle,
    time::Duration,
};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use nu_ansi_term::Color::{Cyan, Green, Red};
use parcel_events::{FetchEvent, LogLevel, OperationId};
use tracing::{debug, error, info, warn};

use crate::utils::{Colored, Icons};

static MULTI: LazyLock<Arc<MultiProgress>> = LazyLock::new(|| Arc::new(MultiProgress::new()));

/// Pause progress display, run the closure, then resume.
pub fn suspend<F: FnOnce()>(f: F) {
    MULTI.suspend(f);
}

/// Stop and clear all progress bars.
pub fn stop() {
    MULTI.clear().ok();
}

/// Owns the thread started by [`spawn_event_handler`].
///
/// The sender side of the channel must be dropped before [`finish`](ProgressGuard::finish),
/// otherwise the handler keeps waiting for events.
pub struct ProgressGuard {
    handle: Option<JoinHandle<()>>,
}

impl ProgressGuard {
    pub fn finish(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap()
}

fn blob_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} {msg}  {wide_bar:.cyan/dim}  {bytes}/{total_bytes}  {bytes_per_sec}",
    )
    .unwrap()
    .progress_chars("━━─")
}

fn create_op_spinner(msg: &str) -> ProgressBar {
    let pb = MULTI.add(ProgressBar::new_spinner());
    pb.set_style(spinner_style());
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn short_revision(revision: &str) -> &str {
    let hex = revision.strip_prefix("sha256:").unwrap_or(revision);
    &hex[..hex.len().min(12)]
}

/// Message shown for an event on its operation's spinner, if the event updates one.
fn status_message(event: &FetchEvent) -> Option<String> {
    match event {
        FetchEvent::PackageStarted { name, source, .. } => {
            Some(format!("{name}: fetching {source}"))
        }
        FetchEvent::Retrieving { name, stage, .. } => Some(format!("{name}: {}", stage.as_str())),
        FetchEvent::Resolved { name, revision, .. } => {
            Some(format!("{name}: resolved {}", short_revision(revision)))
        }
        FetchEvent::BlobProgress { name, .. } => Some(format!("{name}: pulling")),
        FetchEvent::Subpackages { name, count, .. } => Some(format!(
            "{name}: fetching {count} sub-package{}",
            if *count == 1 { "" } else { "s" }
        )),
        _ => None,
    }
}

/// Spawns a thread that renders [`FetchEvent`]s as one spinner per package.
pub fn spawn_event_handler(receiver: Receiver<FetchEvent>) -> ProgressGuard {
    let handle = std::thread::spawn(move || {
        let mut jobs: HashMap<OperationId, ProgressBar> = HashMap::new();

        while let Ok(event) = receiver.recv() {
            if let Some(msg) = status_message(&event) {
                if let Some(op_id) = event.op_id() {
                    let pb = jobs.entry(op_id).or_insert_with(|| create_op_spinner(&msg));
                    pb.set_message(msg);
                }
            }

            match event {
                FetchEvent::BlobProgress {
                    op_id,
                    current,
                    total,
                    ..
                } => {
                    if let Some(pb) = jobs.get(&op_id) {
                        if pb.length() != Some(total) {
                            pb.set_style(blob_style());
                            pb.set_length(total);
                        }
                        pb.set_position(current);
                    }
                }
                FetchEvent::Retrieving { op_id, .. } => {
                    if let Some(pb) = jobs.get(&op_id) {
                        pb.set_style(spinner_style());
                    }
                }
                FetchEvent::SettersApplied { name, setters, .. } => {
                    debug!("{name}: applied setters {}", setters.join(", "));
                }
                FetchEvent::Completed {
                    op_id,
                    name,
                    destination,
                } => {
                    if let Some(pb) = jobs.remove(&op_id) {
                        pb.finish_and_clear();
                    }
                    MULTI.suspend(|| {
                        eprintln!(
                            " {} {} {} {}",
                            Colored(Green, Icons::CHECK),
                            Colored(Cyan, &name),
                            Icons::ARROW,
                            destination
                        );
                    });
                }
                FetchEvent::Failed { op_id, name, error } => {
                    if let Some(pb) = jobs.remove(&op_id) {
                        pb.finish_and_clear();
                    }
                    MULTI.suspend(|| {
                        eprintln!(
                            " {} {}: {}",
                            Colored(Red, Icons::CROSS),
                            Colored(Cyan, &name),
                            Colored(Red, &error)
                        );
                    });
                }
                FetchEvent::Log { level, message } => match level {
                    LogLevel::Debug => debug!("{message}"),
                    LogLevel::Info => info!("{message}"),
                    LogLevel::Warning => warn!("{message}"),
                    LogLevel::Error => error!("{message}"),
                },
                _ => {}
            }
        }

        for (_, pb) in jobs {
            pb.finish_and_clear();
        }
    });

    ProgressGuard {
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use parcel_events::RetrieveStage;

    use super::*;

    #[test]
    fn test_status_messages() {
        let msg = status_message(&FetchEvent::Retrieving {
            op_id: 1,
            name: "app".into(),
            stage: RetrieveStage::Cloning,
        });
        assert_eq!(msg.as_deref(), Some("app: cloning"));

        let msg = status_message(&FetchEvent::Resolved {
            op_id: 1,
            name: "app".into(),
            revision: "sha256:0123456789abcdef0123".into(),
        });
        assert_eq!(msg.as_deref(), Some("app: resolved 0123456789ab"));

        let msg = status_message(&FetchEvent::Subpackages {
            op_id: 1,
            name: "app".into(),
            count: 1,
        });
        assert_eq!(msg.as_deref(), Some("app: fetching 1 sub-package"));

        assert!(status_message(&FetchEvent::Completed {
            op_id: 1,
            name: "app".into(),
            destination: "/tmp/app".into(),
        })
        .is_none());
    }

    #[test]
    fn test_short_revision() {
        assert_eq!(short_revision("abc"), "abc");
        assert_eq!(short_revision("0123456789abcdef"), "0123456789ab");
    }
}

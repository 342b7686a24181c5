use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex, PoisonError,
    },
};

use crate::{FetchEvent, OperationId};

/// Receives the events of a fetch as packages are materialized.
///
/// The engine may emit from several worker threads at once when sibling sub-packages are
/// fetched in parallel.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FetchEvent);
}

/// Forwards events to a renderer running on another thread.
pub struct ChannelSink {
    sender: Sender<FetchEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<FetchEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: FetchEvent) {
        // A renderer that already quit must not fail the fetch.
        let _ = self.sender.send(event);
    }
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: FetchEvent) {}
}

/// A package that finished materializing, as reconstructed from its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPackage {
    pub name: String,
    pub destination: String,
    pub source: String,
    /// Commit or manifest digest, absent for directory and stream sources.
    pub revision: Option<String>,
    pub depth: usize,
    pub setters: Vec<String>,
}

#[derive(Default)]
struct Pending {
    source: String,
    depth: usize,
    revision: Option<String>,
    setters: Vec<String>,
}

/// Records every event and summarizes the packages of a fetch.
#[derive(Default)]
pub struct CollectorSink {
    events: Mutex<Vec<FetchEvent>>,
}

impl CollectorSink {
    pub fn events(&self) -> Vec<FetchEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recorded events matching `predicate`.
    pub fn count<P>(&self, predicate: P) -> usize
    where
        P: Fn(&FetchEvent) -> bool,
    {
        self.lock().iter().filter(|&e| predicate(e)).count()
    }

    /// Completed packages in completion order, so sub-packages come before their parents.
    ///
    /// Setters are attached to a package after it completes, so they are folded in whenever
    /// they arrive.
    pub fn packages(&self) -> Vec<FetchedPackage> {
        let mut pending: HashMap<OperationId, Pending> = HashMap::new();
        let mut done: Vec<(OperationId, FetchedPackage)> = Vec::new();

        for event in self.lock().iter() {
            match event {
                FetchEvent::PackageStarted {
                    op_id,
                    source,
                    depth,
                    ..
                } => {
                    let entry = pending.entry(*op_id).or_default();
                    entry.source = source.clone();
                    entry.depth = *depth;
                }
                FetchEvent::Resolved { op_id, revision, .. } => {
                    pending.entry(*op_id).or_default().revision = Some(revision.clone());
                }
                FetchEvent::Completed {
                    op_id,
                    name,
                    destination,
                } => {
                    let started = pending.remove(op_id).unwrap_or_default();
                    done.push((
                        *op_id,
                        FetchedPackage {
                            name: name.clone(),
                            destination: destination.clone(),
                            source: started.source,
                            revision: started.revision,
                            depth: started.depth,
                            setters: started.setters,
                        },
                    ));
                }
                FetchEvent::SettersApplied { op_id, setters, .. } => {
                    match done.iter_mut().find(|(id, _)| id == op_id) {
                        Some((_, package)) => package.setters.extend(setters.iter().cloned()),
                        None => pending
                            .entry(*op_id)
                            .or_default()
                            .setters
                            .extend(setters.iter().cloned()),
                    }
                }
                _ => {}
            }
        }

        done.into_iter().map(|(_, package)| package).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FetchEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: FetchEvent) {
        self.lock().push(event);
    }
}

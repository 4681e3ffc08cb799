// Chatbridge Engine — Observer Registry
//
// Ordered callback lists for status changes and inbound messages.
// Dispatch snapshots the list before iterating, so an observer registered
// mid-dispatch is neither skipped twice nor invoked for the in-flight item.
// Each call is isolated: an `Err` or a panic is logged as
// `ObserverCallbackFailed` and the next observer still runs.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{InboundMessage, StatusChange};
use log::error;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type Callback<T> = Arc<dyn Fn(&T) -> EngineResult<()> + Send + Sync>;

struct Entry<T> {
    name: String,
    callback: Callback<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Entry { name: self.name.clone(), callback: self.callback.clone() }
    }
}

/// How a single dispatch went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// One ordered list of callbacks for payload type `T`.
pub struct ObserverList<T> {
    kind: &'static str,
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T> ObserverList<T> {
    pub fn new(kind: &'static str) -> Self {
        ObserverList { kind, entries: Mutex::new(Vec::new()) }
    }

    /// Append an observer. No de-duplication.
    pub fn register<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&T) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.entries.lock().push(Entry {
            name: name.into(),
            callback: Arc::new(callback),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Invoke every observer in registration order.
    pub fn dispatch(&self, item: &T) -> DispatchReport {
        let snapshot: Vec<Entry<T>> = self.entries.lock().clone();
        let mut report = DispatchReport::default();

        for entry in &snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| (entry.callback)(item)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(EngineError::observer(&entry.name, e.to_string())),
                Err(panic) => Some(EngineError::observer(&entry.name, panic_message(panic.as_ref()))),
            };
            match failure {
                None => report.delivered += 1,
                Some(err) => {
                    report.failed += 1;
                    error!("[observers] {} dispatch: {}", self.kind, err);
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".into()
    }
}

/// The two independent collections the lifecycle controller fans out to.
pub struct ObserverRegistry {
    pub status: ObserverList<StatusChange>,
    pub messages: ObserverList<InboundMessage>,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        ObserverRegistry {
            status: ObserverList::new("status"),
            messages: ObserverList::new("message"),
        }
    }

    pub fn on_status_change<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&StatusChange) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.status.register(name, callback);
    }

    pub fn on_message<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&InboundMessage) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.messages.register(name, callback);
    }
}

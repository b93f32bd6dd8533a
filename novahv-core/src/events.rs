//! Typed events emitted by the core for a UI (or any other consumer) to
//! drain from a channel.
//!
//! Design note (spec §9): "callbacks that touch UI from worker threads" are
//! replaced with typed events on a channel that the UI layer drains itself;
//! nothing in this crate calls back into UI code directly. `original_source`'s
//! `events.py` defined ad-hoc `textual.message.Message` subclasses for the
//! same purpose (`VMNameClicked`, `VMSelectionChanged`, `VmActionRequest`);
//! `Event` below is the typed, process-agnostic equivalent.

use crate::workers::WorkerState;
use serde::Serialize;

/// Severity attached to progress/log events, matching the `logCb` severity
/// prefix from spec §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Something the core wants a consumer to know about, independent of any
/// particular UI toolkit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A connection's liveness/error state changed.
    ConnectionStatus { uri: String, alive: bool, last_error: Option<String> },
    /// A VM's cached metadata was invalidated and should be re-read.
    VmInvalidated { uri: String, uuid: String },
    /// A fresh stats sample is available for a VM.
    Stats { uri: String, uuid: String, cpu_percent: f64, mem_percent: f64 },
    /// Progress for a long-running operation (volume move, migration, bulk
    /// action), 0-100.
    Progress { operation_id: String, percent: u8, message: String },
    /// A log line from a long-running operation, with severity.
    Log { operation_id: String, severity: Severity, message: String },
    /// A named worker (C11) changed state.
    WorkerState { name: String, state: WorkerState },
    /// A web console session started or stopped.
    WebConsole { vm_uuid: String, active: bool, url: Option<String> },
}

/// Sending half handed to every component; consumers hold the matching
/// [`tokio::sync::mpsc::UnboundedReceiver`].
pub type EventSender = tokio::sync::mpsc::UnboundedSender<Event>;

/// Creates a fresh event channel. `Core::new` owns the sender and clones it
/// into every component; the receiver is returned to the embedder.
pub fn channel() -> (EventSender, tokio::sync::mpsc::UnboundedReceiver<Event>) {
    tokio::sync::mpsc::unbounded_channel()
}

//! Bulk Orchestrator (C9): fan-out of lifecycle actions across many VMs
//! with per-VM progress (spec §4.9).

use std::sync::Arc;
use tracing::instrument;

use crate::action::VmActionService;
use crate::backend::LibvirtConnection;
use crate::events::{Event, EventSender, Severity};
use crate::types::{BulkAction, BulkFailure, BulkResult};

pub struct BulkOrchestrator {
    actions: Arc<VmActionService>,
    events: EventSender,
}

impl BulkOrchestrator {
    pub fn new(actions: Arc<VmActionService>, events: EventSender) -> Self {
        Self { actions, events }
    }

    /// Iterates `uuids` sequentially; a per-UUID error is logged and
    /// appended to `failures`, the loop never aborts early (spec §4.9).
    #[instrument(skip(self, conn, uuids), fields(count = uuids.len()))]
    pub async fn perform_bulk_action(
        &self,
        conn: &dyn LibvirtConnection,
        operation_id: &str,
        uuids: &[String],
        action: BulkAction,
        delete_storage: bool,
    ) -> BulkResult {
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        let total = uuids.len().max(1);

        for (i, uuid) in uuids.iter().enumerate() {
            let result = match action {
                BulkAction::Start => self.actions.start(conn, uuid).await,
                BulkAction::Stop => self.actions.shutdown(conn, uuid).await,
                BulkAction::ForceOff => self.actions.force_off(conn, uuid).await,
                BulkAction::Pause => self.actions.pause(conn, uuid).await,
                BulkAction::Delete => self.actions.delete(conn, uuid, delete_storage, false).await.map(|_| ()),
            };

            match result {
                Ok(()) => successes.push(uuid.clone()),
                Err(e) => {
                    let message = e.to_string();
                    let _ = self.events.send(Event::Log {
                        operation_id: operation_id.to_string(),
                        severity: Severity::Error,
                        message: format!("{uuid}: {message}"),
                    });
                    failures.push(BulkFailure { uuid: uuid.clone(), message });
                }
            }

            let percent = (((i + 1) as f64 / total as f64) * 100.0) as u8;
            let _ = self.events.send(Event::Progress { operation_id: operation_id.to_string(), percent, message: format!("{}/{}", i + 1, total) });
        }

        BulkResult { successes, failures }
    }
}

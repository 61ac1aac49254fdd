//! Per-document admission: at most one ingestion per document id at a time.
//!
//! Under [`SameDocumentPolicy::Wait`] a second request queues behind the one in
//! flight. Under [`SameDocumentPolicy::Cancel`] it cancels the in-flight
//! request's token first; that request aborts at its next cancellation check,
//! which always precedes its commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use ragdb_core::config::SameDocumentPolicy;
use ragdb_core::error::{Error, Result};
use ragdb_core::types::DocumentId;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

struct Slot {
    token: CancellationToken,
    waiters: usize,
    busy: bool,
}

#[derive(Default)]
pub struct DocumentGates {
    slots: Mutex<HashMap<DocumentId, Slot>>,
    released: Condvar,
}

impl DocumentGates {
    pub fn new() -> Self { Self::default() }

    /// Block until `document_id` is free, then hold it until the permit drops.
    pub fn acquire(&self, document_id: &str, policy: SameDocumentPolicy) -> DocumentPermit<'_> {
        let mut slots = self.slots.lock();
        let mut waited = false;
        loop {
            let slot = slots.entry(document_id.to_string()).or_insert_with(|| Slot { token: CancellationToken::new(), waiters: 0, busy: false });
            if !slot.busy {
                slot.busy = true;
                slot.token = CancellationToken::new();
                if waited { slot.waiters -= 1; }
                let token = slot.token.clone();
                return DocumentPermit { gates: self, document_id: document_id.to_string(), token };
            }
            if policy == SameDocumentPolicy::Cancel && !slot.token.is_cancelled() {
                debug!(document_id, "cancelling in-flight ingestion");
                slot.token.cancel();
            }
            if !waited { slot.waiters += 1; waited = true; }
            self.released.wait(&mut slots);
        }
    }

    pub fn in_flight(&self) -> usize { self.slots.lock().values().filter(|s| s.busy).count() }

    fn release(&self, document_id: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(document_id) {
            slot.busy = false;
            if slot.waiters == 0 { slots.remove(document_id); }
        }
        drop(slots);
        self.released.notify_all();
    }
}

/// Exclusive right to ingest one document.
pub struct DocumentPermit<'a> {
    gates: &'a DocumentGates,
    document_id: DocumentId,
    token: CancellationToken,
}

impl DocumentPermit<'_> {
    /// Cancelled by a newer request for the same document.
    pub fn is_superseded(&self) -> bool { self.token.is_cancelled() }

    /// `Cancelled` if this permit or `external` has been cancelled.
    pub fn check(&self, external: Option<&CancellationToken>) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled(format!("ingestion of '{}' superseded by a newer request", self.document_id)));
        }
        if external.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled(format!("ingestion of '{}' cancelled by caller", self.document_id)));
        }
        Ok(())
    }
}

impl Drop for DocumentPermit<'_> {
    fn drop(&mut self) { self.gates.release(&self.document_id); }
}

//! Bookkeeping for in-flight metadata/thumbnail extraction.
//!
//! Each entry has at most one live job. A job is identified by a ticket
//! carrying the entry id and a generation; results are only accepted while
//! the ticket's generation is still the live one for that id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::AbortHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionTicket {
    pub id: Uuid,
    pub generation: u64,
}

/// Set once the job is cancelled; checked by blocking work before it
/// writes anything to disk
pub type CancelToken = Arc<AtomicBool>;

struct Job {
    generation: u64,
    abort: Option<AbortHandle>,
    cancelled: CancelToken,
}

#[derive(Default)]
pub struct ExtractionJobs {
    next_generation: u64,
    live: HashMap<Uuid, Job>,
}

impl ExtractionJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new job for `id`, superseding any previous one
    pub fn issue(&mut self, id: Uuid) -> ExtractionTicket {
        self.cancel(id);
        self.next_generation += 1;
        let generation = self.next_generation;
        self.live.insert(
            id,
            Job {
                generation,
                abort: None,
                cancelled: Arc::new(AtomicBool::new(false)),
            },
        );
        ExtractionTicket { id, generation }
    }

    /// Attach the task running `ticket` so it can be aborted.
    ///
    /// A ticket that is no longer live has its task aborted right away.
    pub fn attach(&mut self, ticket: ExtractionTicket, abort: AbortHandle) {
        match self.live.get_mut(&ticket.id) {
            Some(job) if job.generation == ticket.generation => job.abort = Some(abort),
            _ => abort.abort(),
        }
    }

    /// Cancellation token of a live ticket
    pub fn token(&self, ticket: ExtractionTicket) -> Option<CancelToken> {
        self.live
            .get(&ticket.id)
            .filter(|job| job.generation == ticket.generation)
            .map(|job| job.cancelled.clone())
    }

    pub fn is_live(&self, ticket: ExtractionTicket) -> bool {
        self.live
            .get(&ticket.id)
            .is_some_and(|job| job.generation == ticket.generation)
    }

    /// Retire a completed job; returns whether its result may be applied
    pub fn finish(&mut self, ticket: ExtractionTicket) -> bool {
        if !self.is_live(ticket) {
            return false;
        }
        self.live.remove(&ticket.id);
        true
    }

    /// Abort the live job for `id`, if any
    pub fn cancel(&mut self, id: Uuid) -> bool {
        match self.live.remove(&id) {
            Some(job) => {
                job.cancelled.store(true, Ordering::Release);
                if let Some(abort) = job.abort {
                    abort.abort();
                }
                log::debug!("Cancelled extraction for {}", id);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        let ids: Vec<Uuid> = self.live.keys().copied().collect();
        for id in ids {
            self.cancel(id);
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }
}

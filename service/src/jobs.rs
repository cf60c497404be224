use scan_parser::CancellationToken;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Handle for one parse of one document.
#[derive(Debug, Clone)]
pub struct ParseTicket {
    pub document_id: String,
    pub generation: u64,
    pub token: CancellationToken,
}

#[derive(Debug)]
struct JobSlot {
    generation: u64,
    token: CancellationToken,
    running: bool,
}

/// Tracks the latest parse per document.
///
/// Starting a parse cancels whatever parse of the same document is still
/// running, and only the newest ticket may publish its result.
#[derive(Debug, Default)]
pub struct ParseJobs {
    slots: Mutex<HashMap<String, JobSlot>>,
}

impl ParseJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, JobSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self, document_id: &str) -> ParseTicket {
        let mut slots = self.slots();
        let token = CancellationToken::new();

        let generation = match slots.get_mut(document_id) {
            Some(slot) => {
                if slot.running {
                    info!(
                        "Superseding parse generation {} of document {}",
                        slot.generation, document_id
                    );
                    slot.token.cancel();
                }
                slot.generation += 1;
                slot.token = token.clone();
                slot.running = true;
                slot.generation
            }
            None => {
                slots.insert(
                    document_id.to_string(),
                    JobSlot {
                        generation: 1,
                        token: token.clone(),
                        running: true,
                    },
                );
                1
            }
        };

        debug!("Started parse generation {} of document {}", generation, document_id);
        ParseTicket {
            document_id: document_id.to_string(),
            generation,
            token,
        }
    }

    pub fn is_current(&self, ticket: &ParseTicket) -> bool {
        self.slots()
            .get(&ticket.document_id)
            .map_or(false, |slot| slot.generation == ticket.generation)
    }

    /// Run `commit` if `ticket` is still the newest parse of its document.
    ///
    /// The commit runs under the lock, so a newer `begin` cannot interleave
    /// with it. Stale tickets get `None` and leave the slot untouched.
    pub fn complete<T>(&self, ticket: &ParseTicket, commit: impl FnOnce() -> T) -> Option<T> {
        let mut slots = self.slots();
        match slots.get_mut(&ticket.document_id) {
            Some(slot) if slot.generation == ticket.generation => {
                slot.running = false;
                Some(commit())
            }
            _ => {
                debug!(
                    "Discarding stale parse generation {} of document {}",
                    ticket.generation, ticket.document_id
                );
                None
            }
        }
    }

    /// Mark the ticket's parse finished without publishing anything.
    pub fn release(&self, ticket: &ParseTicket) {
        self.complete(ticket, || ());
    }

    /// Cancel any running parse of the document and drop its history.
    pub fn forget(&self, document_id: &str) {
        if let Some(slot) = self.slots().remove(document_id) {
            if slot.running {
                slot.token.cancel();
            }
        }
    }
}

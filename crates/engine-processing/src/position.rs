use model::position::IngestPosition;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Current ingest position of one task.
///
/// The importer of the owning task is the only writer; readers clone the latest
/// value and never wait behind a write.
#[derive(Clone, Debug)]
pub struct PositionTracker {
    tx: Arc<watch::Sender<IngestPosition>>,
}

impl PositionTracker {
    pub fn new(initial: IngestPosition) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> IngestPosition {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<IngestPosition> {
        self.tx.subscribe()
    }

    /// Moves to `next` unless that would break monotonicity. Returns whether the
    /// position changed.
    pub fn advance(&self, next: IngestPosition) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_advance_to(&next) {
                warn!(current = %current, next = %next, "Ignoring position regression");
                return false;
            }
            *current = next;
            true
        })
    }
}

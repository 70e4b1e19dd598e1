use crate::error::DumperError;
use model::records::record::Record;
use std::{collections::VecDeque, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bounded dumper → importer channel carrying record batches.
pub fn pipeline_channel(capacity: usize) -> (ChannelSender, ChannelReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelSender { tx },
        ChannelReceiver {
            rx,
            pending: VecDeque::new(),
        },
    )
}

#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Vec<Record>>,
}

impl ChannelSender {
    /// Sends one batch, giving up when `cancel` fires first. Returns whether it was sent.
    pub async fn push(
        &self,
        records: Vec<Record>,
        cancel: &CancellationToken,
    ) -> Result<bool, DumperError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(false),
            sent = self.tx.send(records) => sent
                .map(|_| true)
                .map_err(|_| DumperError::ChannelClosed),
        }
    }
}

pub struct ChannelReceiver {
    rx: mpsc::Receiver<Vec<Record>>,
    pending: VecDeque<Record>,
}

impl ChannelReceiver {
    /// Up to `max` records. Waits at most `timeout` for the first one and returns an
    /// empty batch if none arrived. `None` once the sender is gone and everything
    /// has been handed out.
    pub async fn fetch(&mut self, max: usize, timeout: Duration) -> Option<Vec<Record>> {
        if self.pending.is_empty() {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Ok(Some(batch)) => self.pending.extend(batch),
                Ok(None) => return None,
                Err(_) => return Some(Vec::new()),
            }
        }

        while self.pending.len() < max {
            match self.rx.try_recv() {
                Ok(batch) => self.pending.extend(batch),
                Err(_) => break,
            }
        }

        let take = self.pending.len().min(max.max(1));
        Some(self.pending.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::position::IngestPosition;

    fn placeholders(n: u64) -> Vec<Record> {
        (1..=n)
            .map(|lsn| Record::Placeholder(IngestPosition::Log(lsn)))
            .collect()
    }

    #[tokio::test]
    async fn merges_and_splits_batches() {
        let (tx, mut rx) = pipeline_channel(4);
        let cancel = CancellationToken::new();
        assert!(tx.push(placeholders(3), &cancel).await.unwrap());
        assert!(tx.push(placeholders(3), &cancel).await.unwrap());

        let first = rx.fetch(4, Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.len(), 4);
        let second = rx.fetch(4, Duration::from_millis(50)).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(rx.fetch(4, Duration::from_millis(10)).await.unwrap().is_empty());

        drop(tx);
        assert!(rx.fetch(4, Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn push_gives_up_on_cancel_when_full() {
        let (tx, _rx) = pipeline_channel(1);
        let cancel = CancellationToken::new();
        assert!(tx.push(placeholders(1), &cancel).await.unwrap());
        cancel.cancel();
        assert!(!tx.push(placeholders(1), &cancel).await.unwrap());
    }
}

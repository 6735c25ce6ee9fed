//! Close signal: lets one task close a resource while another is blocked on it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::transport::TransportError;

/// Shared, idempotent close flag. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Close. Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // Sender lives in self, so wait_for cannot see a dropped channel.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Run `op` until it finishes or the signal closes. A close wins and yields `Closed`.
    pub async fn guard<T, F>(&self, op: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.closed() => Err(TransportError::Closed),
            res = op => res,
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn close_reports_first_caller_only() {
        let signal = CloseSignal::new();
        assert!(!signal.is_closed());
        assert!(signal.close());
        assert!(!signal.close());
        assert!(signal.clone().is_closed());
    }

    #[tokio::test]
    async fn close_unblocks_pending_guard() {
        let signal = CloseSignal::new();
        let closer = signal.clone();
        let pending = tokio::spawn(async move {
            signal
                .guard(async {
                    std::future::pending::<()>().await;
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close();
        let res = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn guard_on_closed_signal_fails_fast() {
        let signal = CloseSignal::new();
        signal.close();
        let res = signal.guard(async { Ok(7u8) }).await;
        assert!(matches!(res, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn guard_passes_result_through() {
        let signal = CloseSignal::new();
        let res = signal.guard(async { Ok(7u8) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}

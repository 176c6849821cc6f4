//! Run-wide shutdown latch.

use tokio_util::sync::CancellationToken;

/// Single-writer, many-reader shutdown latch.
///
/// Cloning yields another handle to the same latch. Once signaled it stays
/// signaled for the rest of the run. Every blocking operation in the engine
/// takes a handle and must observe it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latch. Idempotent.
    pub fn signal(&self) {
        self.token.cancel();
    }

    pub fn is_signaled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the latch is set (immediately if it already is).
    pub async fn signaled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_is_shared_and_sticky() {
        let signal = ShutdownSignal::new();
        let reader = signal.clone();
        assert!(!reader.is_signaled());

        signal.signal();
        signal.signal();
        assert!(reader.is_signaled());

        tokio::time::timeout(Duration::from_millis(50), reader.signaled())
            .await
            .expect("signaled() should resolve once set");
    }

    #[tokio::test]
    async fn test_signaled_wakes_waiters() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.signaled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.signal();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}

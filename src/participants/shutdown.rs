// Copyright 2025 Felipe Torres González
//
//    Licensed under the Apache License, Version 2.0 (the "License");
//    you may not use this file except in compliance with the License.
//    You may obtain a copy of the License at
//
//        http://www.apache.org/licenses/LICENSE-2.0
//
//    Unless required by applicable law or agreed to in writing, software
//    distributed under the License is distributed on an "AS IS" BASIS,
//    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//    See the License for the specific language governing permissions and
//    limitations under the License.

use std::sync::Arc;
use tokio::sync::watch;

/// Shutdown signal shared by the background loops and their owner.
///
/// # Description
///
/// All the clones observe the same signal. Cancelling is final: once cancelled, the token stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);

        ShutdownToken {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of the token, an error can't really happen.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn every_clone_sees_the_signal() {
        let token = ShutdownToken::new();
        let waiter = token.clone();
        assert!(!waiter.is_cancelled());

        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("The waiter didn't observe the signal")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_the_fact() {
        let token = ShutdownToken::new();
        token.cancel();
        token.clone().cancel();

        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("A cancelled token must resolve right away");
    }
}

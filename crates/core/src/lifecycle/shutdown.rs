//! Process shutdown flag.
//!
//! OS signals set it once; the server's graceful shutdown and the drain
//! deadline both wait on it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Sets the flag. Only the first call is logged.
    pub fn trigger(&self, reason: &str) {
        if !self.flag.send_replace(true) {
            tracing::info!("Shutting down: {reason}");
        }
    }

    pub fn is_requested(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once the flag is set.
    pub async fn requested(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so this only returns once set.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Resolves `grace` after the flag is set.
    pub async fn deadline(&self, grace: Duration) {
        self.requested().await;
        tokio::time::sleep(grace).await;
    }

    /// Sets the flag on SIGINT or SIGTERM (Ctrl+C elsewhere).
    pub async fn listen_for_signals(self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut terminate = signal(SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    self.trigger("SIGINT");
                }
                _ = terminate.recv() => self.trigger("SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            self.trigger("Ctrl+C");
        }

        Ok(())
    }
}

//! Companion page forwarder.
//!
//! One protocol variant needs a browser-side page on loopback to complete its
//! websocket handshake. The bridge runs as its own task after the core is up:
//! load failures blank the page, wait a fixed delay and reload, up to a
//! bounded number of attempts. Failures are logged, never escalated.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ForwarderRetry, LOCALHOST};

/// Something that can host a web page (an embedded web view, a headless
/// browser, ...).
#[async_trait]
pub trait PageHost: Send + Sync {
    /// Load `url`, returning the page title once loaded.
    async fn load(&self, url: &str) -> Result<String>;

    /// Navigate to `about:blank`.
    async fn blank(&self);

    /// Release the host.
    async fn close(&self);
}

/// URL the forwarder page is served from.
pub fn forwarder_url(ws_port: u16) -> String {
    format!("http://{LOCALHOST}:{ws_port}/")
}

/// A running forwarder task.
pub struct ForwarderBridge {
    host: Arc<dyn PageHost>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ForwarderBridge {
    /// Spawn the load/reload loop for `http://127.0.0.1:{ws_port}/`.
    pub fn start(host: Arc<dyn PageHost>, ws_port: u16, retry: ForwarderRetry) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let url = forwarder_url(ws_port);
        let task = tokio::spawn(run(Arc::clone(&host), url, retry, shutdown_rx));

        Self {
            host,
            shutdown,
            task,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and close the host.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            debug!(error = %e, "Forwarder task ended abnormally");
        }
        self.host.blank().await;
        self.host.close().await;
    }
}

async fn run(
    host: Arc<dyn PageHost>,
    url: String,
    retry: ForwarderRetry,
    mut shutdown: watch::Receiver<bool>,
) {
    for attempt in 1..=retry.max_attempts {
        let result = tokio::select! {
            result = host.load(&url) => result,
            _ = shutdown.changed() => return,
        };

        match result {
            Ok(title) => {
                info!(url = %url, title = %title, attempt, "Forwarder page loaded");
                return;
            }
            Err(e) => {
                debug!(url = %url, attempt, error = %e, "Forwarder page load failed");
                host.blank().await;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry.delay) => {}
            _ = shutdown.changed() => return,
        }
    }

    warn!(url = %url, attempts = retry.max_attempts, "Forwarder page never loaded, giving up");
}

//! Page host for a terminal session.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pwa_page::PageHost;
use tracing::info;

/// Stands in for the browser tab: a reload is just reported.
#[derive(Debug, Default)]
pub struct TerminalHost {
    reloads: AtomicUsize,
}

impl TerminalHost {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageHost for TerminalHost {
    async fn reload(&self) -> Result<(), String> {
        let count = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
        info!(count, "Page reloaded");
        println!("  ↻ page reloaded");
        Ok(())
    }
}

//! Operator interrupt (Ctrl-C) as a shared flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Set once when the operator interrupts the controller.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Trigger `flag` on the first Ctrl-C.
///
/// Signal handling runs on a dedicated thread with its own single-threaded
/// runtime; the controller loop itself stays synchronous.
pub fn install_ctrl_c(flag: InterruptFlag) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("build signal runtime")?;
    thread::Builder::new()
        .name("conductor-ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("interrupt received, reverting active tasks");
                        flag.trigger();
                    }
                    Err(err) => warn!(err = %err, "failed to listen for ctrl-c"),
                }
            });
        })
        .context("spawn signal thread")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = InterruptFlag::new();
        let seen = flag.clone();
        assert!(!seen.is_set());
        flag.trigger();
        assert!(seen.is_set());
    }
}

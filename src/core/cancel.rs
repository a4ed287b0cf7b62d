//! Run cancellation.
//!
//! A `CancelToken` is a shared flag checked by the executor between stages and
//! by the process runner while a command is running. The CLI wires it to
//! SIGINT/SIGTERM; a second signal terminates immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Set the flag on SIGINT/SIGTERM. While the flag is already set, another
    /// signal exits the process with status 130.
    pub fn install_signal_handlers(&self) -> Result<()> {
        use signal_hook::consts::TERM_SIGNALS;
        use signal_hook::flag;

        for sig in TERM_SIGNALS {
            flag::register_conditional_shutdown(*sig, 130, Arc::clone(&self.flag))
                .and_then(|_| flag::register(*sig, Arc::clone(&self.flag)))
                .map_err(|e| {
                    Error::internal_io(e.to_string(), Some(format!("register signal {}", sig)))
                })?;
        }

        Ok(())
    }
}

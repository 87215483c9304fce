//! Interrupt (Ctrl-C / SIGTERM) handling behind a registration seam.
//!
//! The runner installs a callback for the duration of a proxy run and drops
//! the returned [`InterruptRegistration`] afterwards. While installed, an
//! interrupt invokes the callback instead of terminating the process.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Result;

/// Callback run on every interrupt.
pub type InterruptCallback = Arc<dyn Fn() + Send + Sync>;

/// Something that can deliver interrupts to a callback.
pub trait InterruptHandler: Send + Sync {
    /// Start delivering interrupts to `callback` until the registration drops.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying signal source cannot be set up.
    fn install(&self, callback: InterruptCallback) -> Result<InterruptRegistration>;
}

/// Live interrupt registration; dropping it removes the callback.
pub struct InterruptRegistration {
    on_remove: Option<Box<dyn FnOnce() + Send>>,
}

impl InterruptRegistration {
    /// Registration that runs `on_remove` when dropped.
    pub fn new(on_remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_remove: Some(Box::new(on_remove)),
        }
    }
}

impl Drop for InterruptRegistration {
    fn drop(&mut self) {
        if let Some(on_remove) = self.on_remove.take() {
            on_remove();
        }
    }
}

impl fmt::Debug for InterruptRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptRegistration")
            .field("active", &self.on_remove.is_some())
            .finish()
    }
}

// ── OS signals ───────────────────────────────────────────────────────────────

/// Delivers Ctrl-C, and SIGTERM on Unix, from the OS.
///
/// Must be installed from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlCHandler;

impl InterruptHandler for CtrlCHandler {
    fn install(&self, callback: InterruptCallback) -> Result<InterruptRegistration> {
        #[cfg(unix)]
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        let task: JoinHandle<()> = tokio::spawn(async move {
            loop {
                #[cfg(unix)]
                let received = tokio::select! {
                    result = tokio::signal::ctrl_c() => result.is_ok(),
                    signal = sigterm.recv() => signal.is_some(),
                };

                #[cfg(not(unix))]
                let received = tokio::signal::ctrl_c().await.is_ok();

                if !received {
                    warn!("interrupt: signal source closed");
                    break;
                }
                debug!("interrupt: received");
                callback();
            }
        });

        Ok(InterruptRegistration::new(move || task.abort()))
    }
}

// ── Manual trigger ───────────────────────────────────────────────────────────

/// Interrupt source fired by calling [`ManualInterrupt::trigger`].
#[derive(Clone, Default)]
pub struct ManualInterrupt {
    callback: Arc<Mutex<Option<InterruptCallback>>>,
}

impl ManualInterrupt {
    /// Create an untriggered source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke the installed callback. Returns `false` if none is installed.
    pub fn trigger(&self) -> bool {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Whether a callback is currently installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl InterruptHandler for ManualInterrupt {
    fn install(&self, callback: InterruptCallback) -> Result<InterruptRegistration> {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
        let slot = Arc::clone(&self.callback);
        Ok(InterruptRegistration::new(move || {
            slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        }))
    }
}

impl fmt::Debug for ManualInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualInterrupt")
            .field("installed", &self.is_installed())
            .finish()
    }
}

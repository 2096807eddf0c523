//! Cooperative stop flag shared between the interrupt listener and the control loop

use crate::errors::{FanControlError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

/// Set once when a stop is requested, never cleared
#[derive(Debug, Clone, Default)]
pub struct RunSignal {
    stop: Arc<AtomicBool>,
}

impl RunSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the control loop to stop. Calling it again has no further effect.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Register for SIGINT and set `run_signal` on the first delivery.
///
/// Registration happens before this returns, so an interrupt arriving at any
/// later point is caught. The listener task does nothing besides setting the flag.
pub fn listen_for_interrupt(run_signal: RunSignal) -> Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())
        .map_err(|e| FanControlError::Signal(format!("cannot register SIGINT: {}", e)))?;

    Ok(tokio::spawn(async move {
        if interrupt.recv().await.is_some() {
            run_signal.request_stop();
        }
    }))
}

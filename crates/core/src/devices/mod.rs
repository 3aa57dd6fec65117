//! Concrete [`DeviceBackend`](crate::lifecycle::DeviceBackend)
//! implementations.
//!
//! The synthetic backend needs no hardware. The host backend talks to the
//! system audio stack through cpal and is only built with the `cpal` feature.

#[cfg(feature = "cpal")]
pub mod host;
pub mod synthetic;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[cfg(feature = "cpal")]
pub use host::HostBackend;
pub use synthetic::{MannequinDetector, SyntheticBackend, SyntheticOptions};

use crate::{MotionLabError, Result};

/// Samples kept in a capture tap: about a second at 48 kHz.
pub(crate) const TAP_CAPACITY: usize = 48_000;

/// Background producer thread with a cooperative stop flag.
pub(crate) struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))
            .map_err(|err| MotionLabError::ResourceUnavailable(format!("{name}: {err}")))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it. Idempotent.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("device worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn should_stop(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Acquire)
}

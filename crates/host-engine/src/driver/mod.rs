pub mod dummy;
pub mod factory;
pub mod printer;

use std::sync::Arc;

pub use factory::build_driver;

/// Single-subscriber lifecycle callbacks a driver reports through.
///
/// Mirrors a descriptor-based single-slot callback: at most one subscriber
/// per hook, set once at construction. A panicking callback is caught so it
/// can never take down the worker that owns the driver.
#[derive(Clone, Default)]
pub struct DriverCallbacks {
    pub connected: Option<Arc<dyn Fn() + Send + Sync>>,
    pub disconnected: Option<Arc<dyn Fn() + Send + Sync>>,
    pub job_started: Option<Arc<dyn Fn() + Send + Sync>>,
    pub job_finished: Option<Arc<dyn Fn() + Send + Sync>>,
    pub job_progress: Option<Arc<dyn Fn(f64) + Send + Sync>>,
}

/// Runs `cb`, catching any panic so a bad subscriber can never unwind into
/// the caller (the protocol/worker task that fired the event).
fn fire<F: FnOnce() + std::panic::UnwindSafe>(name: &str, cb: F) {
    if std::panic::catch_unwind(cb).is_err() {
        log::error!("driver callback '{name}' panicked");
    }
}

impl DriverCallbacks {
    pub fn fire_connected(&self) {
        if let Some(cb) = &self.connected {
            fire("connected", std::panic::AssertUnwindSafe(|| cb()));
        }
    }
    pub fn fire_disconnected(&self) {
        if let Some(cb) = &self.disconnected {
            fire("disconnected", std::panic::AssertUnwindSafe(|| cb()));
        }
    }
    pub fn fire_job_started(&self) {
        if let Some(cb) = &self.job_started {
            fire("job_started", std::panic::AssertUnwindSafe(|| cb()));
        }
    }
    pub fn fire_job_finished(&self) {
        if let Some(cb) = &self.job_finished {
            fire("job_finished", std::panic::AssertUnwindSafe(|| cb()));
        }
    }
    pub fn fire_job_progress(&self, percent: f64) {
        if let Some(cb) = &self.job_progress {
            fire("job_progress", std::panic::AssertUnwindSafe(|| cb(percent)));
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
    #[error(transparent)]
    Engine(#[from] crate::protocol::EngineError),
    #[error("failed to read g-code file: {0}")]
    ReadFile(#[from] std::io::Error),
}

/// Uniform capability set over a printer connection, regardless of
/// transport. Tagged by kind rather than a trait object, consistent with
/// [`crate::transport::Transport`] — there are exactly three kinds and a
/// new one is rare enough that an explicit match is the right shape.
pub enum Driver {
    Printer(printer::PrinterDriver),
    Dummy(dummy::DummyDriver),
}

impl Driver {
    pub async fn connect(&mut self) -> Result<(), DriverError> {
        match self {
            Driver::Printer(d) => d.connect().await,
            Driver::Dummy(d) => d.connect().await,
        }
    }

    pub async fn disconnect(&mut self) {
        match self {
            Driver::Printer(d) => d.disconnect().await,
            Driver::Dummy(d) => d.disconnect().await,
        }
    }

    pub async fn start(&mut self, file_path: &std::path::Path) -> Result<(), DriverError> {
        match self {
            Driver::Printer(d) => d.start(file_path).await,
            Driver::Dummy(d) => d.start(file_path).await,
        }
    }

    pub async fn stop(&mut self) {
        match self {
            Driver::Printer(d) => d.stop().await,
            Driver::Dummy(d) => d.stop().await,
        }
    }
}

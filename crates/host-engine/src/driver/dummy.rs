use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{DriverCallbacks, DriverError};

/// Simulates a print by sleeping between lines, for demos and tests that
/// don't have real printer hardware available.
pub struct DummyDriver {
    command_delay: Duration,
    callbacks: DriverCallbacks,
    should_stop: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl DummyDriver {
    pub fn new(command_delay_ms: u64, callbacks: DriverCallbacks) -> Self {
        Self {
            command_delay: Duration::from_millis(command_delay_ms),
            callbacks,
            should_stop: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub async fn connect(&mut self) -> Result<(), DriverError> {
        self.callbacks.fire_connected();
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.should_stop.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.callbacks.fire_disconnected();
    }

    pub async fn start(&mut self, file_path: &Path) -> Result<(), DriverError> {
        let raw = tokio::fs::read_to_string(file_path).await?;
        let lines: Vec<String> = raw.lines().map(str::to_string).collect();

        self.should_stop.store(false, Ordering::Relaxed);
        let should_stop = self.should_stop.clone();
        let delay = self.command_delay;
        let callbacks = self.callbacks.clone();

        callbacks.fire_job_started();
        let progress_step = (lines.len() / 1000).max(1);

        let task = tokio::spawn(async move {
            let total = lines.len().max(1);
            for (i, _line) in lines.iter().enumerate() {
                if should_stop.load(Ordering::Relaxed) {
                    return;
                }
                tokio::time::sleep(delay).await;
                if i % progress_step == 0 {
                    callbacks.fire_job_progress(100.0 * i as f64 / total as f64);
                }
            }
            callbacks.fire_job_progress(100.0);
            callbacks.fire_job_finished();
        });
        self.task = Some(task);
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.should_stop.store(true, Ordering::Relaxed);
    }
}

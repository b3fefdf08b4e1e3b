use std::path::Path;
use std::time::Duration;

use printhost_core::DriverConfig;
use tokio::task::JoinHandle;

use super::{DriverCallbacks, DriverError};
use crate::protocol::{PrinterEvent, ProtocolEngineHandle};
use crate::transport::Transport;

const CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PROGRESS_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// Drives a real printer (serial or TCP) through the protocol engine.
pub struct PrinterDriver {
    config: DriverConfig,
    callbacks: DriverCallbacks,
    engine: Option<ProtocolEngineHandle>,
    background: Vec<JoinHandle<()>>,
}

impl PrinterDriver {
    pub fn new(config: DriverConfig, callbacks: DriverCallbacks) -> Self {
        Self {
            config,
            callbacks,
            engine: None,
            background: Vec::new(),
        }
    }

    pub async fn connect(&mut self) -> Result<(), DriverError> {
        let transport = match &self.config {
            DriverConfig::Serial { port, baud } => Transport::open_serial(port, *baud).await?,
            DriverConfig::Tcp { host, port } => Transport::open_tcp(host, *port).await?,
            DriverConfig::Dummy { .. } => {
                unreachable!("PrinterDriver is never constructed for a dummy config")
            }
        };

        let engine = ProtocolEngineHandle::connect(transport).await;

        // Block the caller until online, polling rather than busy-waiting.
        while !engine.is_online() {
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }

        self.callbacks.fire_connected();
        self.spawn_event_bridge(&engine);
        self.spawn_progress_reporter(&engine);
        self.engine = Some(engine);
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
        if let Some(engine) = self.engine.take() {
            engine.disconnect().await;
        }
        self.callbacks.fire_disconnected();
    }

    pub async fn start(&mut self, file_path: &Path) -> Result<(), DriverError> {
        let raw = tokio::fs::read_to_string(file_path).await?;
        let lines: Vec<String> = raw.lines().map(|l| l.trim().to_string()).collect();

        let engine = self.engine.as_ref().ok_or(crate::protocol::EngineError::NotConnected)?;
        engine.start_print(lines).await?;
        self.callbacks.fire_job_started();
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(engine) = &self.engine {
            engine.disconnect().await;
        }
    }

    fn spawn_event_bridge(&mut self, engine: &ProtocolEngineHandle) {
        let mut events = engine.subscribe();
        let callbacks = self.callbacks.clone();
        let handle = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    PrinterEvent::End => callbacks.fire_job_finished(),
                    PrinterEvent::Error { line } => log::warn!("printer reported error: {line}"),
                    _ => {}
                }
            }
        });
        self.background.push(handle);
    }

    fn spawn_progress_reporter(&mut self, engine: &ProtocolEngineHandle) {
        let engine = engine.clone();
        let callbacks = self.callbacks.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROGRESS_SAMPLE_INTERVAL).await;
                if !engine.is_printing() {
                    continue;
                }
                let percent = engine.progress_fraction() * 100.0;
                callbacks.fire_job_progress(percent);
            }
        });
        self.background.push(handle);
    }
}

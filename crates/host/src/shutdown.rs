use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

/// Tracks how many shutdown signals have been observed, so a second
/// Ctrl-C/SIGTERM escalates from graceful to immediate.
#[derive(Debug, Default)]
pub struct ShutdownController {
    signals: AtomicU8,
}

#[derive(Debug, Clone, Copy)]
pub enum ShutdownEvent {
    Graceful,
    Immediate,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u8 {
        self.signals.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Spawns a task that watches for Ctrl-C (and SIGTERM on Unix), emitting
/// `Graceful` on the first signal and `Immediate` on any further one.
pub fn spawn_signal_handler(shutdown: Arc<ShutdownController>, events_tx: mpsc::UnboundedSender<ShutdownEvent>) {
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sig) => sig,
                    Err(_) => return,
                };
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if res.is_err() {
                            return;
                        }
                    }
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
            }

            let count = shutdown.bump();
            let event = if count == 1 {
                ShutdownEvent::Graceful
            } else {
                ShutdownEvent::Immediate
            };
            let escalate = matches!(event, ShutdownEvent::Immediate);
            if events_tx.send(event).is_err() || escalate {
                return;
            }
        }
    });
}

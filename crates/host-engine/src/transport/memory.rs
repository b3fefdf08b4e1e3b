use std::time::Duration;

use tokio::sync::mpsc;

use super::TransportError;

/// An in-memory duplex transport used by protocol-engine tests: scripted
/// inbound lines are pushed by the test, and outbound lines written by the
/// engine are observed through the paired [`MemoryPeer`].
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    checksummed: bool,
    connected: bool,
}

/// The test-side handle paired with a [`MemoryTransport`].
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<String>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn push_line(&self, line: impl Into<String>) {
        let _ = self.inbound.send(line.into());
    }

    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    pub fn try_next_outbound(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}

impl MemoryTransport {
    /// Creates a connected pair; `checksummed` controls whether the engine
    /// should treat this transport as requiring checksum framing (serial-
    /// like) or not (TCP-like).
    pub fn pair(checksummed: bool) -> (Self, MemoryPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Self {
                inbound: in_rx,
                outbound: out_tx,
                checksummed,
                connected: true,
            },
            MemoryPeer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }

    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    /// Whether the handle is open, mirroring `SerialConnection.can_listen`.
    pub fn can_listen(&self) -> bool {
        self.connected
    }

    pub async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(TransportError::EndOfFile),
            Err(_) => Ok(String::new()),
        }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.outbound
            .send(line.to_string())
            .map_err(|err| TransportError::CannotWrite(err.to_string()))
    }

    pub async fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    pub fn uses_checksum(&self) -> bool {
        self.checksummed
    }
}

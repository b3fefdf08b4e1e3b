pub mod memory;
pub mod serial;
pub mod tcp;

use std::time::Duration;

pub use memory::{MemoryPeer, MemoryTransport};
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// Failure taxonomy for a duplex byte transport to a printer.
///
/// Kept distinct (rather than a single opaque I/O error) so callers can
/// tell transport death from a transient empty read.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    #[error("failed to disconnect: {0}")]
    DisconnectFailed(String),
    #[error("cannot read from transport: {0}")]
    CannotRead(String),
    #[error("cannot write to transport: {0}")]
    CannotWrite(String),
    #[error("end of file")]
    EndOfFile,
}

/// A duplex byte-stream to a printer: serial port, TCP socket, or (in
/// tests) an in-memory pair.
///
/// Modeled as tagged variants rather than a trait object, since there are
/// exactly two real transports and a third (dummy driver) that never needs
/// one at all.
pub enum Transport {
    Serial(SerialTransport),
    Tcp(TcpTransport),
    Memory(MemoryTransport),
}

impl Transport {
    pub async fn open_serial(port: &str, baud: u32) -> Result<Self, TransportError> {
        Ok(Transport::Serial(SerialTransport::open(port, baud).await?))
    }

    pub async fn open_tcp(host: &str, port: u16) -> Result<Self, TransportError> {
        Ok(Transport::Tcp(TcpTransport::open(host, port).await?))
    }

    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        match self {
            Transport::Serial(t) => t.disconnect().await,
            Transport::Tcp(t) => t.disconnect().await,
            Transport::Memory(t) => t.disconnect().await,
        }
    }

    /// Read one line within `timeout`. An empty string means "nothing
    /// available within the window", not EOF — EOF is a distinct error.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        match self {
            Transport::Serial(t) => t.read_line(timeout).await,
            Transport::Tcp(t) => t.read_line(timeout).await,
            Transport::Memory(t) => t.read_line(timeout).await,
        }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        match self {
            Transport::Serial(t) => t.write_line(line).await,
            Transport::Tcp(t) => t.write_line(line).await,
            Transport::Memory(t) => t.write_line(line).await,
        }
    }

    pub async fn reset(&mut self) -> Result<(), TransportError> {
        match self {
            Transport::Serial(t) => t.reset().await,
            Transport::Tcp(t) => t.reset().await,
            Transport::Memory(t) => t.reset().await,
        }
    }

    /// Whether outbound lines on this transport should be checksum-framed.
    pub fn uses_checksum(&self) -> bool {
        match self {
            Transport::Serial(_) => true,
            Transport::Tcp(_) => false,
            Transport::Memory(t) => t.uses_checksum(),
        }
    }

    /// Whether the underlying handle is still open. `false` after
    /// `disconnect()` has been called on it.
    pub fn can_listen(&self) -> bool {
        match self {
            Transport::Serial(t) => t.can_listen(),
            Transport::Tcp(t) => t.can_listen(),
            Transport::Memory(t) => t.can_listen(),
        }
    }
}

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::TransportError;

/// A TCP transport to a network-attached printer (e.g. OctoPrint-style
/// passthrough or a network G-code server). Unlike serial, the wire
/// protocol here is not checksum-framed.
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    connected: bool,
}

impl TcpTransport {
    pub async fn open(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;
        Ok(Self {
            reader: BufReader::new(stream),
            connected: true,
        })
    }

    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.reader
            .get_mut()
            .shutdown()
            .await
            .map_err(|err| TransportError::DisconnectFailed(err.to_string()))
    }

    /// Whether the handle is open, mirroring `TcpConnection.can_listen`.
    pub fn can_listen(&self) -> bool {
        self.connected
    }

    pub async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let mut buf = String::new();
        match tokio::time::timeout(timeout, self.reader.read_line(&mut buf)).await {
            Ok(Ok(0)) => Err(TransportError::EndOfFile),
            Ok(Ok(_)) => Ok(buf.trim_end_matches(['\r', '\n']).to_string()),
            Ok(Err(err)) => Err(TransportError::CannotRead(err.to_string())),
            Err(_) => Ok(String::new()),
        }
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut framed = line.to_string();
        framed.push('\n');
        self.reader
            .get_mut()
            .write_all(framed.as_bytes())
            .await
            .map_err(|err| TransportError::CannotWrite(err.to_string()))
    }

    pub async fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

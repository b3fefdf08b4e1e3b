use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::TransportError;

/// A serial-port transport, grounded on the connection semantics of a
/// classic printer firmware link: checksum-framed commands, a DTR reset
/// pulse, and (on Debian-family Linux) a parity-odd-then-none reopen dance
/// some USB-serial adapters need to settle cleanly.
pub struct SerialTransport {
    port: String,
    baud: u32,
    reader: BufReader<SerialStream>,
    connected: bool,
}

impl SerialTransport {
    pub async fn open(port: &str, baud: u32) -> Result<Self, TransportError> {
        if cfg!(target_os = "linux") && Path::new("/etc/debian_version").exists() {
            if let Ok(mut warm) = tokio_serial::new(port, baud)
                .parity(tokio_serial::Parity::Odd)
                .open_native_async()
            {
                let _ = warm.set_parity(tokio_serial::Parity::None);
                drop(warm);
            }
        }

        let stream = tokio_serial::new(port, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .open_native_async()
            .map_err(|err| TransportError::ConnectFailed(err.to_string()))?;

        Ok(Self {
            port: port.to_string(),
            baud,
            reader: BufReader::new(stream),
            connected: true,
        })
    }

    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        log::debug!("closing serial port {} at {} baud", self.port, self.baud);
        self.connected = false;
        Ok(())
    }

    /// Whether the handle is open, mirroring `SerialConnection.can_listen`.
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
        let stream = self.reader.get_mut();
        stream
            .write_data_terminal_ready(true)
            .map_err(|err| TransportError::CannotWrite(err.to_string()))?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream
            .write_data_terminal_ready(false)
            .map_err(|err| TransportError::CannotWrite(err.to_string()))?;
        Ok(())
    }
}

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serialport::{SerialPort, SerialPortType};

use crate::settings::SerialSettings;

use super::link::SerialTransport;
use super::state::PortDescriptor;

const LINE_TERMINATOR: &str = "\n";
const REPLY_DELIMITER: u8 = b'\n';
// Internal read timeout; the reply deadline is enforced on top of it.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// [`SerialTransport`] over a local serial port (Arduino-style line protocol).
///
/// The `serialport` API is blocking, so every operation runs on Tokio's
/// blocking pool.
pub struct SerialPortTransport {
    baud_rate: u32,
    reply_timeout: Duration,
    settle: Duration,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
}

impl SerialPortTransport {
    pub fn new(settings: &SerialSettings) -> Self {
        Self {
            baud_rate: settings.baud_rate,
            reply_timeout: Duration::from_millis(settings.reply_timeout_ms),
            settle: Duration::from_millis(settings.settle_ms),
            port: Arc::new(Mutex::new(None)),
        }
    }
}

pub(crate) fn port_kind(port_type: &SerialPortType) -> &'static str {
    match port_type {
        SerialPortType::UsbPort(_) => "USB",
        SerialPortType::BluetoothPort => "Bluetooth",
        SerialPortType::PciPort => "PCI",
        SerialPortType::Unknown => "Unknown",
    }
}

/// Reads bytes up to and including `delimiter`, returning the line without
/// its trailing `\r\n`.
pub(crate) fn read_reply_line<R: Read>(
    reader: &mut R,
    delimiter: u8,
    timeout: Duration,
) -> Result<String> {
    let mut response = Vec::new();
    let mut buffer = [0u8; 1];
    let start = Instant::now();

    loop {
        if start.elapsed() > timeout {
            bail!("serial read timeout after {:?}", timeout);
        }

        match reader.read(&mut buffer) {
            Ok(1) => {
                if buffer[0] == delimiter {
                    break;
                }
                response.push(buffer[0]);
            }
            Ok(0) => bail!("unexpected EOF from serial port"),
            Ok(_) => unreachable!("read into single-byte buffer returned >1"),
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => return Err(anyhow!("serial read error: {e}")),
        }
    }

    let line = String::from_utf8_lossy(&response);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[async_trait]
impl SerialTransport for SerialPortTransport {
    async fn enumerate_ports(&self) -> Result<Vec<PortDescriptor>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .context("port enumeration worker join failed")?
            .context("failed to enumerate serial ports")?;

        Ok(ports
            .into_iter()
            .map(|info| PortDescriptor::new(info.port_name, port_kind(&info.port_type)))
            .collect())
    }

    async fn open_port(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        let baud_rate = self.baud_rate;
        let slot = Arc::clone(&self.port);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let port = serialport::new(&name, baud_rate)
                .timeout(PORT_READ_TIMEOUT)
                .open()
                .with_context(|| format!("failed to open serial port '{name}' at {baud_rate} baud"))?;

            let mut guard = slot.lock().map_err(|_| anyhow!("serial port lock poisoned"))?;
            // Replacing drops (and closes) any port left open.
            *guard = Some(port);
            log::debug!("serial port '{name}' opened at {baud_rate} baud");
            Ok(())
        })
        .await
        .context("serial open worker join failed")??;

        // Boards reset when the port opens; give the sketch time to come up.
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }

    async fn close_port(&self) -> Result<()> {
        let slot = Arc::clone(&self.port);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = slot.lock().map_err(|_| anyhow!("serial port lock poisoned"))?;
            if let Some(port) = guard.take() {
                log::debug!("serial port '{}' closed", port.name().unwrap_or_default());
            }
            Ok(())
        })
        .await
        .context("serial close worker join failed")?
    }

    async fn write_command(&self, command: &str) -> Result<String> {
        let framed = format!("{command}{LINE_TERMINATOR}");
        let timeout = self.reply_timeout;
        let slot = Arc::clone(&self.port);

        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut guard = slot.lock().map_err(|_| anyhow!("serial port lock poisoned"))?;
            let port = guard.as_mut().ok_or_else(|| anyhow!("serial port not open"))?;

            port.write_all(framed.as_bytes())
                .context("failed to write to serial port")?;
            port.flush().context("failed to flush serial port")?;

            read_reply_line(port, REPLY_DELIMITER, timeout)
        })
        .await
        .context("serial I/O worker join failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reply_line_strips_terminators() {
        let mut reader = Cursor::new(b"LED ON\r\nignored".to_vec());
        let line = read_reply_line(&mut reader, b'\n', Duration::from_secs(1)).unwrap();
        assert_eq!(line, "LED ON");
    }

    #[test]
    fn reply_without_delimiter_is_an_error() {
        let mut reader = Cursor::new(b"partial".to_vec());
        let err = read_reply_line(&mut reader, b'\n', Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("EOF"));
    }

    #[test]
    fn port_types_map_to_kinds() {
        assert_eq!(port_kind(&SerialPortType::BluetoothPort), "Bluetooth");
        assert_eq!(port_kind(&SerialPortType::PciPort), "PCI");
        assert_eq!(port_kind(&SerialPortType::Unknown), "Unknown");
    }

    #[tokio::test]
    async fn write_without_open_port_fails() {
        let transport = SerialPortTransport::new(&SerialSettings::default());
        assert!(transport.write_command("ON").await.is_err());
        assert!(transport.close_port().await.is_ok());
    }
}

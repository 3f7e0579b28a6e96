//! RS-232 transport
//!
//! Protocol notes for the CornerStone130 serial port:
//! - 9600 baud, 8N1, no flow control
//! - Commands end with CR LF
//! - The instrument echoes every command line before answering; queries are followed by
//!   exactly one answer line
//! - `HANDSHAKE 0` is sent right after the port opens so that set commands do not produce
//!   an extra status line
//!
//! Opening a real port needs feature `tokio_serial`. Without it the transport can still
//! run over any attached async stream (used by the tests with `tokio::io::duplex`).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::{Transport, TransportState};
use crate::protocol::{command, response};

pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}
type DynSerial = Box<dyn SerialPortIO>;

/// Builder for [`SerialTransport`].
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use cornerstone130::transport::SerialTransportBuilder;
///
/// let transport = SerialTransportBuilder::new("/dev/ttyUSB0", 9600)
///     .with_timeout(Duration::from_millis(500))
///     .build();
/// ```
pub struct SerialTransportBuilder {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
}

impl SerialTransportBuilder {
    /// Defaults: 1 s timeout, CR LF terminator.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\r\n".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    pub fn build(self) -> SerialTransport {
        SerialTransport {
            port_name: self.port_name,
            baud_rate: self.baud_rate,
            timeout: self.timeout,
            line_terminator: self.line_terminator,
            attached: None,
            port: None,
            state: TransportState::Disconnected,
        }
    }
}

/// Line-oriented transport over a serial port.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    line_terminator: String,
    /// Stream handed in by [`SerialTransport::attach`], used by the next `connect`.
    attached: Option<DynSerial>,
    port: Option<BufReader<DynSerial>>,
    state: TransportState,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        SerialTransportBuilder::new(port_name, baud_rate).build()
    }

    /// Use `stream` instead of opening the named port on the next `connect`.
    pub fn attach(mut self, stream: impl SerialPortIO + 'static) -> Self {
        self.attached = Some(Box::new(stream));
        self
    }

    async fn open_port(&mut self) -> Result<DynSerial> {
        if let Some(stream) = self.attached.take() {
            return Ok(stream);
        }
        Self::open_native(self.port_name.clone(), self.baud_rate).await
    }

    #[cfg(feature = "tokio_serial")]
    async fn open_native(port_name: String, baud_rate: u32) -> Result<DynSerial> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&port_name, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .with_context(|| format!("Failed to open serial port {port_name}"))
        })
        .await
        .context("spawn_blocking for serial port opening failed")??;
        Ok(Box::new(port))
    }

    #[cfg(not(feature = "tokio_serial"))]
    async fn open_native(port_name: String, _baud_rate: u32) -> Result<DynSerial> {
        Err(anyhow!(
            "Cannot open {port_name}: serial support not enabled. Rebuild with --features tokio_serial"
        ))
    }

    async fn read_line(&mut self, command: &str) -> Result<String> {
        let timeout = self.timeout;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| anyhow!("serial port {} is not open", self.port_name))?;

        let mut line = String::new();
        let read = tokio::time::timeout(timeout, port.read_line(&mut line))
            .await
            .with_context(|| {
                format!("no answer to '{command}' within {} ms", timeout.as_millis())
            })?
            .context("serial read failed")?;
        if read == 0 {
            bail!("serial port closed while waiting for '{command}'");
        }
        Ok(line)
    }

    async fn send_line(&mut self, command: &str) -> Result<()> {
        let frame = format!("{command}{}", self.line_terminator);
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| anyhow!("serial port {} is not open", self.port_name))?;
        let stream = port.get_mut();
        stream
            .write_all(frame.as_bytes())
            .await
            .with_context(|| format!("Failed to write '{command}'"))?;
        stream.flush().await.context("serial flush failed")?;
        Ok(())
    }

    /// Write a command and consume its echo. Returns the first line that is not the echo,
    /// if the instrument skipped echoing.
    async fn exchange(&mut self, command: &str) -> Result<Option<String>> {
        self.send_line(command).await?;
        let echo = self.read_line(command).await?;
        if response::trim(&echo) == command {
            return Ok(None);
        }
        warn!(command = %command, line = %echo.trim(), "expected command echo");
        Ok(Some(echo))
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        self.state = match result {
            Ok(_) => TransportState::Connected,
            Err(_) => TransportState::Fault,
        };
        result
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        self.port = None;
        let stream = match self.open_port().await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = TransportState::Fault;
                return Err(e);
            }
        };
        self.port = Some(BufReader::new(stream));
        self.state = TransportState::Connected;

        let handshake = command::set_handshake(false);
        self.write(&handshake)
            .await
            .context("failed to disable handshake mode")?;
        debug!(port = %self.port_name, baud = self.baud_rate, "serial port open");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            // best effort, the port is closed on drop anyway
            let _ = port.get_mut().shutdown().await;
        }
        self.state = TransportState::Disconnected;
        Ok(())
    }

    async fn write(&mut self, command: &str) -> Result<()> {
        let result = self.exchange(command).await.map(|_| ());
        self.track(result)
    }

    async fn write_read(&mut self, command: &str) -> Result<String> {
        let result = match self.exchange(command).await {
            Ok(Some(answer)) => Ok(answer),
            Ok(None) => self.read_line(command).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn info(&self) -> String {
        format!(
            "SerialTransport({} @ {} baud, {}ms timeout)",
            self.port_name,
            self.baud_rate,
            self.timeout.as_millis()
        )
    }
}

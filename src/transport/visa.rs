//! GPIB transport through VISA
//!
//! Wraps the visa-rs crate. VISA calls are synchronous, so every exchange runs on Tokio's
//! blocking pool with the session moved in and back out.
//!
//! Supports resource strings like:
//! - "GPIB0::4::INSTR" (GPIB interface, the usual CornerStone130 setup)
//! - "USB0::0x1FDE::0x0014::SERIAL::INSTR" (USB)

use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use visa_rs::prelude::*;

use super::{Transport, TransportState};

/// VISA transport for a GPIB-attached monochromator.
pub struct VisaTransport {
    resource_string: String,
    timeout: Duration,
    line_terminator: String,
    instrument: Option<Arc<Mutex<Instrument>>>,
    state: TransportState,
}

impl VisaTransport {
    /// Defaults: 5 s timeout, LF terminator.
    pub fn new(resource_string: impl Into<String>) -> Self {
        Self {
            resource_string: resource_string.into(),
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            instrument: None,
            state: TransportState::Disconnected,
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

    fn session(&self) -> Result<Arc<Mutex<Instrument>>> {
        self.instrument
            .clone()
            .ok_or_else(|| anyhow!("VISA resource {} is not open", self.resource_string))
    }

    async fn run(&mut self, command: &str, read_answer: bool) -> Result<Option<String>> {
        let instrument = self.session()?;
        let frame = format!("{command}{}", self.line_terminator);
        let command = command.to_string();

        let result = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let mut instr = instrument.lock();
            instr
                .write_all(frame.as_bytes())
                .with_context(|| format!("Failed to write VISA command: {command}"))?;
            if !read_answer {
                return Ok(None);
            }
            let mut line = String::new();
            BufReader::new(&*instr)
                .read_line(&mut line)
                .with_context(|| format!("Failed to read VISA response for: {command}"))?;
            Ok(Some(line))
        })
        .await
        .context("VISA I/O task panicked")
        .and_then(|inner| inner);

        self.state = if result.is_ok() {
            TransportState::Connected
        } else {
            TransportState::Fault
        };
        result
    }
}

#[async_trait]
impl Transport for VisaTransport {
    async fn connect(&mut self) -> Result<()> {
        let resource = self.resource_string.clone();
        let timeout = self.timeout;

        let opened = tokio::task::spawn_blocking(move || -> Result<Instrument> {
            let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
            let name = CString::new(resource.clone()).context("Invalid VISA resource string")?;
            rm.open(&name.into(), AccessMode::NO_LOCK, timeout)
                .with_context(|| format!("Failed to open VISA resource: {resource}"))
        })
        .await
        .context("VISA open task panicked")
        .and_then(|inner| inner);

        match opened {
            Ok(instrument) => {
                self.instrument = Some(Arc::new(Mutex::new(instrument)));
                self.state = TransportState::Connected;
                debug!(
                    resource = %self.resource_string,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "VISA resource opened"
                );
                Ok(())
            }
            Err(e) => {
                self.state = TransportState::Fault;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.instrument.take().is_some() {
            debug!(resource = %self.resource_string, "VISA resource closed");
        }
        self.state = TransportState::Disconnected;
        Ok(())
    }

    async fn write(&mut self, command: &str) -> Result<()> {
        self.run(command, false).await.map(|_| ())
    }

    async fn write_read(&mut self, command: &str) -> Result<String> {
        self.run(command, true)
            .await?
            .ok_or_else(|| anyhow!("no answer to '{command}'"))
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn info(&self) -> String {
        format!(
            "VisaTransport({} @ {}ms timeout)",
            self.resource_string,
            self.timeout.as_millis()
        )
    }
}

//! Scripted in-memory transport
//!
//! Answers queries from a fixed response table and records every command it receives.
//! Failures can be injected per command. It never models motion or instrument state: a
//! `GOWAVE 600` does not change what `WAVE?` returns until the test says so.
//!
//! The transport is cheaply cloneable; all clones share the same script, so a test keeps
//! one clone to steer responses while the controller owns the other.
//!
//! # Example
//!
//! ```rust,ignore
//! let script = ScriptedTransport::healthy();
//! let device = Monochromator::spawn(Box::new(script.clone()), DeviceConfig::default());
//! device.open().await?;
//!
//! script.respond("STB?", "3");
//! script.respond("ERROR?", "3");
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Transport, TransportState};

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<String, String>,
    one_shot: HashMap<String, VecDeque<String>>,
    failing: HashSet<String>,
    fail_once: HashSet<String>,
    fail_connect: bool,
    latency: HashMap<String, Duration>,
    log: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
    state: Option<TransportState>,
}

/// In-memory transport driven by a response table.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Empty script: every query fails until a response is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script of an idle, error-free instrument at 500 nm, grating 1, filter 1, shutter
    /// closed.
    pub fn healthy() -> Self {
        let transport = Self::new();
        for (command, answer) in [
            ("INFO?", "Oriel CornerStone 130 ver 2.00"),
            ("STB?", "0"),
            ("ERROR?", "0"),
            ("WAVE?", "500.000"),
            ("GRAT?", "1"),
            ("GRAT1LABEL?", "1200 l/mm VIS"),
            ("GRAT2LABEL?", "600 l/mm NIR"),
            ("FILTER?", "1"),
            ("FILTER1LABEL?", "OPEN"),
            ("FILTER2LABEL?", "OG550"),
            ("SHUTTER?", "C"),
        ] {
            transport.respond(command, answer);
        }
        transport
    }

    /// Answer `command` with `answer` from now on.
    pub fn respond(&self, command: &str, answer: &str) {
        self.script
            .lock()
            .responses
            .insert(command.to_string(), answer.to_string());
    }

    /// Answer the next `command` with `answer`, then fall back to the table.
    pub fn respond_once(&self, command: &str, answer: &str) {
        self.script
            .lock()
            .one_shot
            .entry(command.to_string())
            .or_default()
            .push_back(answer.to_string());
    }

    /// Fail every exchange of `command` until [`ScriptedTransport::recover`].
    pub fn fail_on(&self, command: &str) {
        self.script.lock().failing.insert(command.to_string());
    }

    pub fn fail_next(&self, command: &str) {
        self.script.lock().fail_once.insert(command.to_string());
    }

    pub fn recover(&self, command: &str) {
        let mut script = self.script.lock();
        script.failing.remove(command);
        script.fail_once.remove(command);
    }

    /// Hold every exchange of `command` for `latency` before answering.
    pub fn delay_on(&self, command: &str, latency: Duration) {
        self.script
            .lock()
            .latency
            .insert(command.to_string(), latency);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.script.lock().fail_connect = fail;
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.script.lock().log.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.script
            .lock()
            .log
            .iter()
            .filter(|logged| logged.as_str() == command)
            .count()
    }

    pub fn clear_log(&self) {
        self.script.lock().log.clear();
    }

    /// Highest number of exchanges that were ever in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.script.lock().max_in_flight
    }

    async fn exchange(&self, command: &str) -> Result<()> {
        let latency = {
            let mut script = self.script.lock();
            script.log.push(command.to_string());
            script.in_flight += 1;
            script.max_in_flight = script.max_in_flight.max(script.in_flight);
            script.latency.get(command).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut script = self.script.lock();
        script.in_flight -= 1;
        let failed = script.fail_once.remove(command) || script.failing.contains(command);
        if script.state.is_some() {
            script.state = Some(if failed {
                TransportState::Fault
            } else {
                TransportState::Connected
            });
        }
        if failed {
            bail!("injected failure on '{command}'");
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut script = self.script.lock();
        if script.fail_connect {
            script.state = Some(TransportState::Fault);
            bail!("injected connection failure");
        }
        script.state = Some(TransportState::Connected);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.script.lock().state = None;
        Ok(())
    }

    async fn write(&mut self, command: &str) -> Result<()> {
        self.exchange(command).await
    }

    async fn write_read(&mut self, command: &str) -> Result<String> {
        self.exchange(command).await?;
        let mut script = self.script.lock();
        if let Some(answer) = script
            .one_shot
            .get_mut(command)
            .and_then(VecDeque::pop_front)
        {
            return Ok(format!("{answer}\r\n"));
        }
        script
            .responses
            .get(command)
            .map(|answer| format!("{answer}\r\n"))
            .ok_or_else(|| anyhow!("no scripted response for '{command}'"))
    }

    fn state(&self) -> TransportState {
        self.script
            .lock()
            .state
            .unwrap_or(TransportState::Disconnected)
    }

    fn info(&self) -> String {
        "ScriptedTransport".to_string()
    }
}

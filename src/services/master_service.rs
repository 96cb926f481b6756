use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::time::{interval, Duration};

use crate::config::Config;
use crate::modbus::master::{MasterListener, ModbusMaster};
use crate::modbus::protocol::{ExceptionResponse, NormalResponse, Request};
use crate::modbus::transport::{ByteSink, ByteSource, SerialTransport};
use crate::utils::error::ModbusError;

/// Final outcome of one attempt of a queued transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Response(NormalResponse),
    Exception(ExceptionResponse),
    Timeout(Request),
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterEvent {
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

impl MasterEvent {
    fn now(outcome: Outcome) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Response(_))
    }
}

/// Master listener that takes every response and keeps a log of outcomes.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Vec<MasterEvent>,
}

impl EventRecorder {
    pub fn events(&self) -> &[MasterEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<MasterEvent> {
        std::mem::take(&mut self.events)
    }
}

impl MasterListener for EventRecorder {
    fn on_response(&mut self, _request: &Request, response: &NormalResponse) -> bool {
        self.events.push(MasterEvent::now(Outcome::Response(response.clone())));
        true
    }

    fn on_exception(&mut self, _request: &Request, exception: &ExceptionResponse) {
        self.events.push(MasterEvent::now(Outcome::Exception(*exception)));
    }

    fn on_timeout(&mut self, request: &Request) {
        self.events.push(MasterEvent::now(Outcome::Timeout(request.clone())));
    }
}

/// Drives a master on a tokio interval until its queue drains.
pub struct MasterService {
    master: ModbusMaster<EventRecorder>,
    poll_interval: Duration,
}

impl MasterService {
    /// Opens the configured serial port.
    pub fn open(config: &Config) -> Result<Self, ModbusError> {
        let (reader, writer) = SerialTransport::open(config)?.split()?;
        Ok(Self::with_transport(config, reader, writer))
    }

    pub fn with_transport(
        config: &Config,
        source: impl ByteSource + 'static,
        sink: impl ByteSink + 'static,
    ) -> Self {
        let master = ModbusMaster::new(EventRecorder::default(), config.master)
            .with_source(source)
            .with_sink(sink);
        Self {
            master,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn master_mut(&mut self) -> &mut ModbusMaster<EventRecorder> {
        &mut self.master
    }

    /// Polls until every queued request completed or gave up, or Ctrl-C.
    /// Returns the outcomes in the order they happened.
    pub async fn run(&mut self) -> Vec<MasterEvent> {
        info!("🚀 Running {} request(s)", self.master.pending_count());
        let mut ticker = interval(self.poll_interval);

        while !self.master.is_empty() {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("🛑 Interrupted, dropping {} pending request(s)", self.master.pending_count());
                    self.master.clear();
                    break;
                }
                _ = ticker.tick() => {
                    self.master.poll();
                }
            }
        }

        let events = self.master.listener_mut().take_events();
        let succeeded = events.iter().filter(|e| e.is_success()).count();
        info!("📊 {} event(s), {} successful", events.len(), succeeded);
        events
    }
}

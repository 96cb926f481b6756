//! Poll-driven Modbus RTU master.
//!
//! Requests are queued and sent one at a time from the head of the queue.
//! Every decision is taken inside [`ModbusMaster::poll`], which must be
//! called regularly (around every 10 ms) and never blocks.

use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;

use super::buffer::RxBuffer;
use super::clock::{Clock, SystemClock};
use super::codec::master::{self as codec, MAX_WRITE_COILS, MAX_WRITE_REGISTERS};
use super::protocol::{
    coils_to_words, word_to_coil, ExceptionResponse, FunctionCode, NormalResponse, Request, Response,
    COIL_OFF, COIL_ON,
};
use super::transport::{read_available, ByteSink, ByteSource};
use crate::config::settings::MasterConfig;
use crate::utils::error::ModbusError;

/// Application side of the master.
///
/// Every method has a default. Response handlers return whether the
/// response was handled; an unhandled response counts as a failed attempt.
/// `on_response` is consulted first, with the request it answers, and the
/// function-specific handler only when it declines.
pub trait MasterListener {
    fn on_response(&mut self, _request: &Request, _response: &NormalResponse) -> bool {
        false
    }

    fn on_response_read_coils(&mut self, _slave: u8, _address: u16, _quantity: u16, _values: &[bool]) -> bool {
        false
    }

    fn on_response_read_holding_registers(&mut self, _slave: u8, _address: u16, _quantity: u16, _values: &[u16]) -> bool {
        false
    }

    fn on_response_read_input_registers(&mut self, _slave: u8, _address: u16, _quantity: u16, _values: &[u16]) -> bool {
        false
    }

    fn on_response_write_single_coil(&mut self, _slave: u8, _address: u16, _value: bool) -> bool {
        false
    }

    fn on_response_write_single_register(&mut self, _slave: u8, _address: u16, _value: u16) -> bool {
        false
    }

    fn on_response_write_multiple_coils(&mut self, _slave: u8, _address: u16, _quantity: u16, _values: &[bool]) -> bool {
        false
    }

    fn on_response_write_multiple_registers(&mut self, _slave: u8, _address: u16, _quantity: u16, _values: &[u16]) -> bool {
        false
    }

    fn on_response_read_file_record(&mut self, _slave: u8, _file_number: u16, _record_number: u16, _values: &[u16]) -> bool {
        false
    }

    /// The slave answered with an exception. The attempt still counts as failed.
    fn on_exception(&mut self, _request: &Request, _exception: &ExceptionResponse) {}

    /// No byte arrived within the response timeout.
    fn on_timeout(&mut self, _request: &Request) {}

    fn on_rx(&mut self, _bytes: &[u8]) {}

    /// Called with every frame right before it is written.
    fn on_tx(&mut self, _bytes: &[u8]) {}
}

impl MasterListener for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    WaitingForResponse,
    /// Transient: a response is complete and is processed in the same poll.
    ResponseReceived,
}

pub struct ModbusMaster<L: MasterListener> {
    listener: L,
    config: MasterConfig,
    clock: Box<dyn Clock>,
    source: Option<Box<dyn ByteSource>>,
    sink: Option<Box<dyn ByteSink>>,
    queue: VecDeque<Request>,
    rx: RxBuffer,
    state: MasterState,
    last_rx_ms: Option<u64>,
    last_tx_ms: Option<u64>,
}

impl<L: MasterListener> ModbusMaster<L> {
    pub fn new(listener: L, config: MasterConfig) -> Self {
        Self {
            listener,
            config,
            clock: Box::new(SystemClock::new()),
            source: None,
            sink: None,
            queue: VecDeque::new(),
            rx: RxBuffer::new(),
            state: MasterState::Idle,
            last_rx_ms: None,
            last_tx_ms: None,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Without a source, bytes must be pushed through [`ModbusMaster::on_rx`].
    pub fn with_source(mut self, source: impl ByteSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Without a sink, frames only reach [`MasterListener::on_tx`].
    pub fn with_sink(mut self, sink: impl ByteSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// New timing applies from the next poll; the retry count from the next enqueue.
    pub fn set_config(&mut self, config: MasterConfig) {
        self.config = config;
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops every pending request and anything received so far.
    pub fn clear(&mut self) {
        if !self.queue.is_empty() {
            info!("🧹 Dropping {} pending request(s)", self.queue.len());
        }
        self.queue.clear();
        self.rx.purge();
        self.state = MasterState::Idle;
    }

    /// Queues a prepared request with the configured retry count.
    pub fn enqueue(&mut self, mut request: Request) {
        request.retries = self.config.retries;
        debug!(
            "📝 Queued {} for slave {} (address {}, quantity {})",
            request.function, request.slave_address, request.address, request.quantity
        );
        self.queue.push_back(request);
    }

    fn enqueue_read(&mut self, slave: u8, function: FunctionCode, address: u16, quantity: u16) {
        let mut request = Request::new(slave, function);
        request.address = address;
        request.quantity = quantity;
        self.enqueue(request);
    }

    pub fn read_coils(&mut self, slave: u8, address: u16, quantity: u16) {
        self.enqueue_read(slave, FunctionCode::ReadCoils, address, quantity);
    }

    pub fn read_holding_registers(&mut self, slave: u8, address: u16, quantity: u16) {
        self.enqueue_read(slave, FunctionCode::ReadHoldingRegisters, address, quantity);
    }

    pub fn read_input_registers(&mut self, slave: u8, address: u16, quantity: u16) {
        self.enqueue_read(slave, FunctionCode::ReadInputRegisters, address, quantity);
    }

    pub fn write_single_coil(&mut self, slave: u8, address: u16, value: bool) {
        let mut request = Request::new(slave, FunctionCode::WriteSingleCoil);
        request.address = address;
        request.quantity = 1;
        request.values = vec![if value { COIL_ON } else { COIL_OFF }];
        self.enqueue(request);
    }

    pub fn write_single_register(&mut self, slave: u8, address: u16, value: u16) {
        let mut request = Request::new(slave, FunctionCode::WriteSingleRegister);
        request.address = address;
        request.quantity = 1;
        request.values = vec![value];
        self.enqueue(request);
    }

    pub fn write_multiple_coils(&mut self, slave: u8, address: u16, values: &[bool]) -> Result<(), ModbusError> {
        if values.is_empty() || values.len() > MAX_WRITE_COILS as usize {
            return Err(ModbusError::InvalidData(format!(
                "Write Multiple Coils takes 1 to {} coils, got {}",
                MAX_WRITE_COILS,
                values.len()
            )));
        }
        let mut request = Request::new(slave, FunctionCode::WriteMultipleCoils);
        request.address = address;
        request.quantity = values.len() as u16;
        request.values = coils_to_words(values);
        self.enqueue(request);
        Ok(())
    }

    pub fn write_multiple_registers(&mut self, slave: u8, address: u16, values: &[u16]) -> Result<(), ModbusError> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
            return Err(ModbusError::InvalidData(format!(
                "Write Multiple Registers takes 1 to {} registers, got {}",
                MAX_WRITE_REGISTERS,
                values.len()
            )));
        }
        let mut request = Request::new(slave, FunctionCode::WriteMultipleRegisters);
        request.address = address;
        request.quantity = values.len() as u16;
        request.values = values.to_vec();
        self.enqueue(request);
        Ok(())
    }

    pub fn read_file_record(&mut self, slave: u8, file_number: u16, record_number: u16, record_length: u16) {
        let mut request = Request::new(slave, FunctionCode::ReadFileRecord);
        request.file_number = file_number;
        request.record_number = record_number;
        request.record_length = record_length;
        request.quantity = record_length;
        self.enqueue(request);
    }

    /// Feeds received bytes into the engine. Called by `poll` for bytes read
    /// from the source, or directly by the application.
    pub fn on_rx(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        trace!("📥 RX {}", hex::encode(bytes));
        self.rx.append(bytes);
        self.last_rx_ms = Some(self.clock.now_ms());
        self.listener.on_rx(bytes);
    }

    pub fn poll(&mut self) {
        self.receive();

        let now = self.clock.now_ms();
        match self.state {
            MasterState::Idle => {
                if !self.queue.is_empty() && self.turnaround_elapsed(now) {
                    self.transmit(now);
                }
            }
            MasterState::WaitingForResponse => {
                if !self.rx.is_empty() {
                    if since(now, self.last_rx_ms) >= self.config.frame_timeout_ms {
                        self.state = MasterState::ResponseReceived;
                    }
                } else if since(now, self.last_tx_ms) >= self.config.response_timeout_ms {
                    self.time_out();
                }
            }
            MasterState::ResponseReceived => {}
        }

        if self.state == MasterState::ResponseReceived {
            self.process_response();
        }
    }

    fn receive(&mut self) {
        let chunk = match self.source.as_mut() {
            Some(source) => match read_available(&mut **source) {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!("❌ Receive failed: {}", e);
                    return;
                }
            },
            None => return,
        };
        self.on_rx(&chunk);
    }

    fn turnaround_elapsed(&self, now: u64) -> bool {
        let idle = since(now, self.last_rx_ms).min(since(now, self.last_tx_ms));
        idle >= self.config.turnaround_delay_ms
    }

    fn transmit(&mut self, now: u64) {
        let (frame, broadcast) = match self.queue.front() {
            Some(request) => match codec::encode_request(request) {
                Some(frame) => (frame, request.is_broadcast()),
                None => {
                    warn!(
                        "⚠️ Cannot encode {} for slave {}",
                        request.function, request.slave_address
                    );
                    self.fail_current();
                    return;
                }
            },
            None => return,
        };

        self.rx.purge();
        self.listener.on_tx(&frame);
        debug!("📤 TX {}", hex::encode(&frame));
        self.last_tx_ms = Some(now);

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write(&frame) {
                error!("❌ Transmit failed: {}", e);
                self.fail_current();
                return;
            }
        }

        if broadcast {
            // nobody answers a broadcast
            self.queue.pop_front();
        } else {
            self.state = MasterState::WaitingForResponse;
        }
    }

    fn time_out(&mut self) {
        if let Some(request) = self.queue.front() {
            warn!(
                "⏰ Timeout waiting for slave {} ({})",
                request.slave_address, request.function
            );
            self.listener.on_timeout(request);
        }
        self.fail_current();
        self.state = MasterState::Idle;
    }

    fn process_response(&mut self) {
        let frame = self.rx.as_slice();
        let handled = match self.queue.front() {
            Some(request) => {
                let response = codec::find_valid_adu(frame, request.slave_address, request.function)
                    .and_then(|offset| codec::take_response(frame, offset, request));
                match response {
                    Some(Response::Normal(response)) => {
                        debug!("✅ Response from slave {}: {}", response.slave_address, response.function);
                        dispatch(&mut self.listener, request, &response)
                    }
                    Some(Response::Exception(exception)) => {
                        warn!("⚠️ {}", exception);
                        self.listener.on_exception(request, &exception);
                        false
                    }
                    None => {
                        debug!("🔍 No valid response in {}", hex::encode(frame));
                        false
                    }
                }
            }
            None => false,
        };

        if handled {
            self.queue.pop_front();
        } else {
            self.fail_current();
        }
        self.rx.purge();
        self.state = MasterState::Idle;
    }

    /// Spends one retry of the head request, removing it when none are left.
    fn fail_current(&mut self) {
        let exhausted = match self.queue.front_mut() {
            Some(request) if request.retries > 0 => {
                request.retries -= 1;
                debug!(
                    "🔁 Retrying {} for slave {}, {} retries left",
                    request.function, request.slave_address, request.retries
                );
                false
            }
            Some(_) => true,
            None => false,
        };

        if exhausted {
            if let Some(request) = self.queue.pop_front() {
                warn!(
                    "❌ Giving up on {} for slave {}",
                    request.function, request.slave_address
                );
            }
        }
    }
}

fn since(now: u64, then: Option<u64>) -> u64 {
    then.map_or(u64::MAX, |then| now.saturating_sub(then))
}

fn dispatch<L: MasterListener>(listener: &mut L, request: &Request, response: &NormalResponse) -> bool {
    if listener.on_response(request, response) {
        return true;
    }

    let slave = response.slave_address;
    let address = response.address;
    let quantity = response.quantity;
    match response.function {
        FunctionCode::ReadCoils => {
            listener.on_response_read_coils(slave, address, quantity, &response.coil_values())
        }
        FunctionCode::ReadHoldingRegisters => {
            listener.on_response_read_holding_registers(slave, address, quantity, &response.values)
        }
        FunctionCode::ReadInputRegisters => {
            listener.on_response_read_input_registers(slave, address, quantity, &response.values)
        }
        FunctionCode::WriteSingleCoil => {
            listener.on_response_write_single_coil(slave, address, word_to_coil(response.first_value()))
        }
        FunctionCode::WriteSingleRegister => {
            listener.on_response_write_single_register(slave, address, response.first_value())
        }
        FunctionCode::WriteMultipleCoils => {
            listener.on_response_write_multiple_coils(slave, address, quantity, &response.coil_values())
        }
        FunctionCode::WriteMultipleRegisters => {
            listener.on_response_write_multiple_registers(slave, address, quantity, &response.values)
        }
        FunctionCode::ReadFileRecord => listener.on_response_read_file_record(
            slave,
            request.file_number,
            request.record_number,
            &response.values,
        ),
        FunctionCode::Custom(_) => false,
    }
}

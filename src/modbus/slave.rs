//! Poll-driven Modbus RTU slave.
//!
//! A request is considered complete once the line has been silent for the
//! frame timeout. It is then decoded, handed to the [`SlaveListener`] and
//! the produced response, if any, is transmitted.

use log::{debug, error, trace, warn};

use super::buffer::RxBuffer;
use super::clock::{Clock, SystemClock};
use super::codec::slave as codec;
use super::protocol::{word_to_coil, ExceptionCode, FunctionCode, Request, Response};
use super::transport::{read_available, ByteSink, ByteSource};
use crate::config::settings::SlaveConfig;

/// Application side of the slave.
///
/// `on_request` sees every decoded request first; when it returns `None`
/// the function-specific handler is asked. Returning `None` from that one
/// sends nothing.
pub trait SlaveListener {
    fn on_request(&mut self, _request: &Request) -> Option<Response> {
        None
    }

    fn on_read_coils(&mut self, _slave: u8, _function: FunctionCode, _address: u16, _quantity: u16) -> Option<Response> {
        None
    }

    fn on_read_holding_registers(&mut self, _slave: u8, _function: FunctionCode, _address: u16, _quantity: u16) -> Option<Response> {
        None
    }

    fn on_read_input_registers(&mut self, _slave: u8, _function: FunctionCode, _address: u16, _quantity: u16) -> Option<Response> {
        None
    }

    fn on_write_single_coil(&mut self, _slave: u8, _function: FunctionCode, _address: u16, _value: bool) -> Option<Response> {
        None
    }

    fn on_write_single_register(&mut self, _slave: u8, _function: FunctionCode, _address: u16, _value: u16) -> Option<Response> {
        None
    }

    fn on_write_multiple_coils(
        &mut self,
        _slave: u8,
        _function: FunctionCode,
        _address: u16,
        _quantity: u16,
        _values: &[bool],
    ) -> Option<Response> {
        None
    }

    fn on_write_multiple_registers(
        &mut self,
        _slave: u8,
        _function: FunctionCode,
        _address: u16,
        _quantity: u16,
        _values: &[u16],
    ) -> Option<Response> {
        None
    }

    fn on_read_file_record(
        &mut self,
        _slave: u8,
        _function: FunctionCode,
        _file_number: u16,
        _record_number: u16,
        _record_length: u16,
    ) -> Option<Response> {
        None
    }

    fn on_rx(&mut self, _bytes: &[u8]) {}

    fn on_tx(&mut self, _bytes: &[u8]) {}
}

impl SlaveListener for () {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Idle,
    /// Transient: the buffered request is processed in the same poll.
    RequestReceived,
    /// A reply is encoded and waits for the response delay.
    ResponsePending,
}

pub struct ModbusSlave<L: SlaveListener> {
    listener: L,
    config: SlaveConfig,
    clock: Box<dyn Clock>,
    source: Option<Box<dyn ByteSource>>,
    sink: Option<Box<dyn ByteSink>>,
    rx: RxBuffer,
    state: SlaveState,
    last_rx_ms: Option<u64>,
    reply: Option<Vec<u8>>,
    unit: Option<u8>,
}

impl<L: SlaveListener> ModbusSlave<L> {
    pub fn new(listener: L, config: SlaveConfig) -> Self {
        Self {
            listener,
            config,
            clock: Box::new(SystemClock::new()),
            source: None,
            sink: None,
            rx: RxBuffer::new(),
            state: SlaveState::Idle,
            last_rx_ms: None,
            reply: None,
            unit: None,
        }
    }

    /// Ignores requests addressed to other slaves. Broadcasts still reach
    /// the listener. Without a unit every request is handed over.
    pub fn with_unit(mut self, address: u8) -> Self {
        self.unit = Some(address);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_source(mut self, source: impl ByteSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

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

    pub fn config(&self) -> &SlaveConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SlaveConfig) {
        self.config = config;
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

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
        if self.state == SlaveState::Idle
            && !self.rx.is_empty()
            && since(now, self.last_rx_ms) >= self.config.frame_timeout_ms
        {
            self.state = SlaveState::RequestReceived;
        }

        if self.state == SlaveState::RequestReceived {
            self.process_request();
        }

        if self.state == SlaveState::ResponsePending
            && since(now, self.last_rx_ms) >= self.config.response_delay_ms
        {
            self.send_reply();
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

    fn process_request(&mut self) {
        let frame = self.rx.as_slice();
        let request = codec::find_valid_adu(frame).and_then(|offset| codec::take_request(frame, offset));
        if request.is_none() {
            debug!("🔍 No valid request in {}", hex::encode(frame));
        }
        self.rx.purge();
        self.state = SlaveState::Idle;

        let request = match request {
            Some(request) => request,
            None => return,
        };
        if let Some(unit) = self.unit {
            if request.slave_address != unit && !request.is_broadcast() {
                trace!("Request for slave {} ignored", request.slave_address);
                return;
            }
        }
        debug!(
            "📨 Request for slave {}: {} (address {}, quantity {})",
            request.slave_address, request.function, request.address, request.quantity
        );

        let response = match answer(&mut self.listener, &request) {
            Some(response) => response,
            None => {
                debug!("🤐 No reply for slave {}", request.slave_address);
                return;
            }
        };
        if request.is_broadcast() {
            debug!("📢 Broadcast request, reply suppressed");
            return;
        }

        match codec::encode_response(&response) {
            Some(frame) => {
                self.reply = Some(frame);
                self.state = SlaveState::ResponsePending;
            }
            None => warn!("⚠️ Cannot encode reply {:?}", response),
        }
    }

    fn send_reply(&mut self) {
        self.state = SlaveState::Idle;
        let frame = match self.reply.take() {
            Some(frame) => frame,
            None => return,
        };

        self.listener.on_tx(&frame);
        debug!("📤 TX {}", hex::encode(&frame));
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write(&frame) {
                error!("❌ Transmit failed: {}", e);
            }
        }
    }
}

fn since(now: u64, then: Option<u64>) -> u64 {
    then.map_or(u64::MAX, |then| now.saturating_sub(then))
}

fn answer<L: SlaveListener>(listener: &mut L, request: &Request) -> Option<Response> {
    if let Some(response) = listener.on_request(request) {
        return Some(response);
    }

    let slave = request.slave_address;
    let function = request.function;
    let address = request.address;
    let quantity = request.quantity;
    match function {
        FunctionCode::ReadCoils => listener.on_read_coils(slave, function, address, quantity),
        FunctionCode::ReadHoldingRegisters => listener.on_read_holding_registers(slave, function, address, quantity),
        FunctionCode::ReadInputRegisters => listener.on_read_input_registers(slave, function, address, quantity),
        FunctionCode::WriteSingleCoil => {
            listener.on_write_single_coil(slave, function, address, word_to_coil(request.first_value()))
        }
        FunctionCode::WriteSingleRegister => {
            listener.on_write_single_register(slave, function, address, request.first_value())
        }
        FunctionCode::WriteMultipleCoils => {
            listener.on_write_multiple_coils(slave, function, address, quantity, &request.coil_values())
        }
        FunctionCode::WriteMultipleRegisters => {
            listener.on_write_multiple_registers(slave, function, address, quantity, &request.values)
        }
        FunctionCode::ReadFileRecord => listener.on_read_file_record(
            slave,
            function,
            request.file_number,
            request.record_number,
            request.record_length,
        ),
        FunctionCode::Custom(code) => {
            warn!("🚫 Unsupported function 0x{:02X} for slave {}", code, slave);
            Some(Response::exception(slave, code, ExceptionCode::IllegalFunction))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::clock::ManualClock;
    use crate::modbus::codec::master;
    use crate::modbus::crc::crc16_modbus;
    use crate::modbus::transport::MemoryPort;

    #[derive(Default)]
    struct Device {
        generic: Option<Response>,
        requests: Vec<Request>,
        holding: Vec<u16>,
        silent: bool,
        coil_writes: Vec<(u16, u16, Vec<bool>)>,
        tx: Vec<Vec<u8>>,
    }

    impl SlaveListener for Device {
        fn on_request(&mut self, request: &Request) -> Option<Response> {
            self.requests.push(request.clone());
            self.generic.clone()
        }

        fn on_read_holding_registers(&mut self, slave: u8, function: FunctionCode, address: u16, quantity: u16) -> Option<Response> {
            if self.silent {
                return None;
            }
            let start = address as usize;
            match self.holding.get(start..start + quantity as usize) {
                Some(values) => Some(Response::read_holding_registers(slave, address, values)),
                None => Some(Response::exception(slave, function.value(), ExceptionCode::IllegalDataAddress)),
            }
        }

        fn on_write_multiple_coils(
            &mut self,
            slave: u8,
            _function: FunctionCode,
            address: u16,
            quantity: u16,
            values: &[bool],
        ) -> Option<Response> {
            self.coil_writes.push((address, quantity, values.to_vec()));
            Some(Response::write_multiple_coils(slave, address, quantity))
        }

        fn on_read_file_record(
            &mut self,
            slave: u8,
            _function: FunctionCode,
            file_number: u16,
            record_number: u16,
            record_length: u16,
        ) -> Option<Response> {
            let values: Vec<u16> = (0..record_length).map(|i| file_number * 100 + record_number + i).collect();
            Some(Response::read_file_record(slave, &values))
        }

        fn on_tx(&mut self, bytes: &[u8]) {
            self.tx.push(bytes.to_vec());
        }
    }

    fn slave(config: SlaveConfig) -> (ModbusSlave<Device>, MemoryPort, ManualClock) {
        let (port, _peer) = MemoryPort::pair();
        let clock = ManualClock::new();
        let device = Device {
            holding: vec![10, 11, 12, 13],
            ..Device::default()
        };
        let slave = ModbusSlave::new(device, config)
            .with_clock(clock.clone())
            .with_source(port.clone())
            .with_sink(port.clone());
        (slave, port, clock)
    }

    /// Delivers a request and lets the frame timeout run out.
    fn request(slave: &mut ModbusSlave<Device>, port: &MemoryPort, clock: &ManualClock, bytes: &[u8]) -> Vec<u8> {
        port.inject(bytes).unwrap();
        slave.poll();
        clock.advance(10);
        slave.poll();
        port.drain_outbound().unwrap()
    }

    fn with_crc(payload: &[u8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&crc16_modbus(payload).to_le_bytes());
        frame
    }

    #[test]
    fn test_read_holding_registers_answered() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let reply = request(&mut slave, &port, &clock, &master::read_holding_registers(1, 1, 2).unwrap());

        assert_eq!(reply, codec::read_holding_registers(1, &[11, 12]).unwrap());
        assert_eq!(slave.listener().requests.len(), 1);
        assert_eq!(slave.state(), SlaveState::Idle);
    }

    #[test]
    fn test_waits_for_frame_timeout() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        port.inject(&master::read_holding_registers(1, 0, 1).unwrap()).unwrap();
        slave.poll();
        clock.advance(9);
        slave.poll();
        assert!(port.drain_outbound().unwrap().is_empty());

        clock.advance(1);
        slave.poll();
        assert_eq!(port.drain_outbound().unwrap().len(), 7);
    }

    #[test]
    fn test_out_of_range_read_gets_exception() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let reply = request(&mut slave, &port, &clock, &master::read_holding_registers(4, 3, 2).unwrap());
        assert_eq!(reply, with_crc(&[0x04, 0x83, 0x02]));
    }

    #[test]
    fn test_generic_handler_first() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        slave.listener_mut().generic = Some(Response::read_holding_registers(1, 0, &[0xAAAA]));

        let reply = request(&mut slave, &port, &clock, &master::read_holding_registers(1, 0, 1).unwrap());
        assert_eq!(reply, codec::read_holding_registers(1, &[0xAAAA]).unwrap());
    }

    #[test]
    fn test_unknown_function_gets_illegal_function() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let reply = request(&mut slave, &port, &clock, &with_crc(&[0x01, 0x99, 0x00, 0x00, 0x00, 0x01]));

        assert_eq!(reply, with_crc(&[0x01, 0x99, 0x01]));
        assert_eq!(slave.listener().requests[0].function, FunctionCode::Custom(0x99));
    }

    #[test]
    fn test_peer_exception_reply_ignored() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let reply = request(&mut slave, &port, &clock, &with_crc(&[0x02, 0x83, 0x02]));

        assert!(reply.is_empty());
        assert!(slave.listener().requests.is_empty());
    }

    #[test]
    fn test_none_sends_nothing() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        slave.listener_mut().silent = true;

        let reply = request(&mut slave, &port, &clock, &master::read_holding_registers(1, 0, 1).unwrap());
        assert!(reply.is_empty());
        assert!(slave.listener().tx.is_empty());
        assert_eq!(slave.state(), SlaveState::Idle);
    }

    #[test]
    fn test_unhandled_function_stays_silent() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let reply = request(&mut slave, &port, &clock, &master::read_coils(1, 0, 8).unwrap());
        assert!(reply.is_empty());
    }

    #[test]
    fn test_garbage_is_dropped() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let reply = request(&mut slave, &port, &clock, &[0xFF, 0xFE, 0xFD]);
        assert!(reply.is_empty());
        assert!(slave.listener().requests.is_empty());

        // the buffer was purged, the next request stands alone
        let reply = request(&mut slave, &port, &clock, &master::read_holding_registers(1, 0, 1).unwrap());
        assert_eq!(reply, codec::read_holding_registers(1, &[10]).unwrap());
    }

    #[test]
    fn test_response_delay() {
        let config = SlaveConfig {
            response_delay_ms: 50,
            frame_timeout_ms: 10,
        };
        let (mut slave, port, clock) = slave(config);

        let reply = request(&mut slave, &port, &clock, &master::read_holding_registers(1, 0, 1).unwrap());
        assert!(reply.is_empty());
        assert_eq!(slave.state(), SlaveState::ResponsePending);

        clock.advance(39);
        slave.poll();
        assert!(port.drain_outbound().unwrap().is_empty());

        clock.advance(1);
        slave.poll();
        assert_eq!(port.drain_outbound().unwrap(), codec::read_holding_registers(1, &[10]).unwrap());
        assert_eq!(slave.state(), SlaveState::Idle);
    }

    #[test]
    fn test_broadcast_is_not_answered() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let reply = request(&mut slave, &port, &clock, &master::read_holding_registers(0, 0, 1).unwrap());
        assert!(reply.is_empty());
        assert_eq!(slave.listener().requests.len(), 1);
    }

    #[test]
    fn test_write_multiple_coils_values() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let frame = master::write_multiple_coils(2, 0x0013, 3, &[0xFF00, 0x0000, 0xFF00]).unwrap();
        let reply = request(&mut slave, &port, &clock, &frame);

        assert_eq!(slave.listener().coil_writes, vec![(0x0013, 3, vec![true, false, true])]);
        assert_eq!(reply, codec::write_multiple_coils(2, 0x0013, 3).unwrap());
    }

    #[test]
    fn test_read_file_record_answered() {
        let (mut slave, port, clock) = slave(SlaveConfig::default());
        let reply = request(&mut slave, &port, &clock, &master::read_file_record(3, 4, 1, 2).unwrap());
        assert_eq!(reply, codec::read_file_record(3, &[401, 402]).unwrap());
    }

    #[test]
    fn test_unit_filters_other_slaves() {
        let (slave, port, clock) = slave(SlaveConfig::default());
        let mut slave = slave.with_unit(2);

        let reply = request(&mut slave, &port, &clock, &with_crc(&[0x01, 0x99, 0x00, 0x00]));
        assert!(reply.is_empty());
        assert!(slave.listener().requests.is_empty());

        let reply = request(&mut slave, &port, &clock, &master::read_holding_registers(2, 0, 1).unwrap());
        assert_eq!(reply, codec::read_holding_registers(2, &[10]).unwrap());
    }

    #[test]
    fn test_push_mode() {
        let clock = ManualClock::new();
        let mut slave = ModbusSlave::new(
            Device {
                holding: vec![7],
                ..Device::default()
            },
            SlaveConfig::default(),
        )
        .with_clock(clock.clone());

        slave.on_rx(&master::read_holding_registers(1, 0, 1).unwrap());
        clock.advance(10);
        slave.poll();
        assert_eq!(slave.listener().tx, vec![codec::read_holding_registers(1, &[7]).unwrap()]);
    }
}

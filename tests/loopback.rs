use rtu_modbus::config::{MasterConfig, SlaveConfig};
use rtu_modbus::modbus::crc::crc16_modbus;
use rtu_modbus::modbus::transport::{read_available, ByteSink};
use rtu_modbus::modbus::{ManualClock, MemoryPort, ModbusMaster, ModbusSlave};
use rtu_modbus::services::{EventRecorder, Outcome};
use rtu_modbus::RegisterMap;

fn master_config(retries: u32) -> MasterConfig {
    MasterConfig {
        response_timeout_ms: 50,
        frame_timeout_ms: 2,
        turnaround_delay_ms: 5,
        retries,
    }
}

fn slave_config() -> SlaveConfig {
    SlaveConfig {
        response_delay_ms: 0,
        frame_timeout_ms: 2,
    }
}

struct Bus {
    clock: ManualClock,
    master: ModbusMaster<EventRecorder>,
    slave: ModbusSlave<RegisterMap>,
}

impl Bus {
    fn new(retries: u32) -> Self {
        let clock = ManualClock::new();
        let (master_end, slave_end) = MemoryPort::pair();
        let master = ModbusMaster::new(EventRecorder::default(), master_config(retries))
            .with_clock(clock.clone())
            .with_source(master_end.clone())
            .with_sink(master_end);
        let slave = ModbusSlave::new(RegisterMap::new(100), slave_config())
            .with_unit(1)
            .with_clock(clock.clone())
            .with_source(slave_end.clone())
            .with_sink(slave_end);
        Self { clock, master, slave }
    }

    /// Polls both ends a millisecond apart until the master queue drains.
    fn run(&mut self) {
        for _ in 0..1000 {
            self.master.poll();
            self.slave.poll();
            self.clock.advance(1);
            if self.master.is_empty() {
                break;
            }
        }
        assert!(self.master.is_empty(), "master queue did not drain");
    }

    fn outcomes(&self) -> Vec<Outcome> {
        self.master
            .listener()
            .events()
            .iter()
            .map(|e| e.outcome.clone())
            .collect()
    }
}

#[test]
fn test_registers_written_then_read_back() {
    let mut bus = Bus::new(0);
    bus.master.write_multiple_registers(1, 10, &[1, 2, 3]).unwrap();
    bus.master.read_holding_registers(1, 10, 3);
    bus.run();

    let outcomes = bus.outcomes();
    assert_eq!(outcomes.len(), 2);
    match &outcomes[1] {
        Outcome::Response(r) => assert_eq!(r.values, vec![1, 2, 3]),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(&bus.slave.listener().holding_registers()[10..13], &[1, 2, 3]);
}

#[test]
fn test_coils_written_then_read_back() {
    let mut bus = Bus::new(0);
    bus.master.write_multiple_coils(1, 0, &[true, false, true]).unwrap();
    bus.master.write_single_coil(1, 4, true);
    bus.master.read_coils(1, 0, 5);
    bus.run();

    match bus.outcomes().last() {
        Some(Outcome::Response(r)) => {
            assert_eq!(r.coil_values(), vec![true, false, true, false, true]);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(bus.slave.listener().write_count(), 2);
}

#[test]
fn test_out_of_range_read_is_an_exception() {
    let mut bus = Bus::new(0);
    bus.master.read_input_registers(1, 99, 2);
    bus.run();

    match bus.outcomes().as_slice() {
        [Outcome::Exception(e)] => {
            assert_eq!(e.function, 0x84);
            assert_eq!(e.code, 0x02);
        }
        other => panic!("unexpected outcomes {:?}", other),
    }
}

#[test]
fn test_other_unit_times_out_after_retries() {
    let mut bus = Bus::new(2);
    bus.master.read_holding_registers(2, 0, 1);
    bus.run();

    let outcomes = bus.outcomes();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| matches!(o, Outcome::Timeout(_))));
}

#[test]
fn test_broadcast_write_applies_without_reply() {
    let mut bus = Bus::new(0);
    bus.master.write_single_register(0, 5, 77);
    bus.master.read_holding_registers(1, 5, 1);
    bus.run();

    assert_eq!(bus.slave.listener().holding_registers()[5], 77);
    match bus.outcomes().as_slice() {
        [Outcome::Response(r)] => assert_eq!(r.values, vec![77]),
        other => panic!("unexpected outcomes {:?}", other),
    }
}

#[test]
fn test_unknown_function_answered_with_illegal_function() {
    let clock = ManualClock::new();
    let (mut bus, slave_end) = MemoryPort::pair();
    let mut slave = ModbusSlave::new(RegisterMap::new(10), slave_config())
        .with_clock(clock.clone())
        .with_source(slave_end.clone())
        .with_sink(slave_end);

    let mut frame = vec![0x01, 0x99, 0x00, 0x00];
    let crc = crc16_modbus(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    bus.write(&frame).unwrap();

    slave.poll();
    clock.advance(5);
    slave.poll();

    let reply = read_available(&mut bus).unwrap();
    assert_eq!(reply.len(), 5);
    assert_eq!(&reply[..3], &[0x01, 0x99, 0x01]);
    assert_eq!(crc16_modbus(&reply), 0);
}

use super::*;
use crate::memory::{Ram, Rom};
use bincode::error::{DecodeError, EncodeError};
use std::sync::{Arc, Mutex};
use test_log::test;

#[derive(Debug, Default)]
pub(crate) struct RegisterLog {
    pub value: u16,
    pub writes: Vec<(OpSize, u16, u16)>,
    pub inits: u32,
}

/// Single-register device whose state is shared with the test through `log`
pub(crate) struct TestRegister {
    pub address: u16,
    pub readable: bool,
    pub log: Arc<Mutex<RegisterLog>>,
}

impl TestRegister {
    pub(crate) fn new(address: u16, value: u16) -> (Self, Arc<Mutex<RegisterLog>>) {
        let log = Arc::new(Mutex::new(RegisterLog { value, ..RegisterLog::default() }));
        (Self { address, readable: true, log: Arc::clone(&log) }, log)
    }
}

impl Device for TestRegister {
    fn name(&self) -> &str {
        "test register"
    }

    fn addresses(&self) -> Vec<u16> {
        vec![self.address]
    }

    fn init(&mut self, _tick: u64) {
        self.log.lock().unwrap().inits += 1;
    }

    fn read(&mut self, _tick: u64, _address: u16) -> Option<u16> {
        self.readable.then(|| self.log.lock().unwrap().value)
    }

    fn write(&mut self, _tick: u64, size: OpSize, address: u16, value: u16) -> bool {
        let mut log = self.log.lock().unwrap();
        log.writes.push((size, address, value));
        if size == OpSize::Word {
            log.value = value;
        }
        true
    }

    fn save_state(&self) -> Result<Vec<u8>, EncodeError> {
        let value = self.log.lock().unwrap().value;
        bincode::encode_to_vec(value, crate::serialize::BINCODE_CONFIG)
    }

    fn load_state(&mut self, state: &[u8]) -> Result<(), DecodeError> {
        let (value, _) = bincode::decode_from_slice(state, crate::serialize::BINCODE_CONFIG)?;
        self.log.lock().unwrap().value = value;
        Ok(())
    }
}

#[test]
fn shared_register_ors_reads_and_broadcasts_writes() {
    let (first, first_log) = TestRegister::new(0o177660, 0o100);
    let (second, second_log) = TestRegister::new(0o177660, 0o3);

    let mut builder = BusBuilder::new();
    builder.add_device(Box::new(first));
    builder.add_device(Box::new(second));
    let mut bus = builder.build();

    assert_eq!(bus.read_word(0o177660), Ok(0o103));
    assert_eq!(bus.read_word(0o177661), Ok(0o103));

    bus.write_word(0o177660, 0o40).unwrap();
    assert_eq!(first_log.lock().unwrap().writes, vec![(OpSize::Word, 0o177660, 0o40)]);
    assert_eq!(second_log.lock().unwrap().writes, vec![(OpSize::Word, 0o177660, 0o40)]);
    assert_eq!(bus.read_word(0o177660), Ok(0o40));

    bus.write_byte(0o177661, 0o12).unwrap();
    assert_eq!(first_log.lock().unwrap().writes[1], (OpSize::Byte, 0o177661, 0o12));
    assert_eq!(second_log.lock().unwrap().writes[1], (OpSize::Byte, 0o177661, 0o12));
}

#[test]
fn non_responding_device_is_skipped() {
    let (mut write_only, _) = TestRegister::new(0o177714, 0o177777);
    write_only.readable = false;
    let (readable, _) = TestRegister::new(0o177714, 0o5);

    let mut builder = BusBuilder::new();
    builder.add_device(Box::new(write_only));
    let mut bus = builder.build();
    assert_eq!(bus.read_word(0o177714), Err(BusError::new(0o177714)));
    assert_eq!(bus.write_word(0o177714, 0), Ok(()));

    let (mut write_only, _) = TestRegister::new(0o177714, 0o177777);
    write_only.readable = false;
    let mut builder = BusBuilder::new();
    builder.add_device(Box::new(write_only));
    builder.add_device(Box::new(readable));
    let mut bus = builder.build();
    assert_eq!(bus.read_word(0o177714), Ok(0o5));
}

#[test]
fn newest_mapping_wins_reads_and_all_writable_ranges_take_writes() {
    let mut builder = BusBuilder::new();
    let ram = builder.add_mapped_memory(Box::new(Ram::new(0o100000)), 0).unwrap();
    builder.add_mapped_memory(Box::new(Rom::from_words(&[0o1111, 0o2222])), 0o40000).unwrap();
    let overlay = builder.add_memory(Box::new(Ram::new(0o20)));
    builder.map_memory(overlay, 0o40002, 2, 0o10).unwrap();
    let mut bus = builder.build();

    // ROM over RAM
    assert_eq!(bus.read_word(0o40000), Ok(0o1111));
    // Overlay RAM over ROM
    assert_eq!(bus.read_word(0o40002), Ok(0));

    bus.write_word(0o40000, 0o7777).unwrap();
    assert_eq!(bus.read_word(0o40000), Ok(0o1111));
    assert_eq!(bus.memory(ram).unwrap().read(0o40000), Some(0o7777));

    bus.write_word(0o40002, 0o123).unwrap();
    assert_eq!(bus.read_word(0o40002), Ok(0o123));
    assert_eq!(bus.memory(overlay).unwrap().read(0o10), Some(0o123));
    assert_eq!(bus.memory(ram).unwrap().read(0o40002), Some(0o123));

    // RAM shows through past the end of the ROM
    bus.write_word(0o40004, 0o5).unwrap();
    assert_eq!(bus.read_word(0o40004), Ok(0o5));
}

#[test]
fn rom_only_write_faults() {
    let mut builder = BusBuilder::new();
    builder.add_mapped_memory(Box::new(Rom::from_words(&[0o240; 4])), 0o100000).unwrap();
    let mut bus = builder.build();

    assert_eq!(bus.read_word(0o100006), Ok(0o240));
    assert_eq!(bus.write_word(0o100000, 0), Err(BusError::new(0o100000)));
    assert_eq!(bus.write_byte(0o100001, 0), Err(BusError::new(0o100001)));
}

#[test]
fn unmapped_address_faults() {
    let mut builder = BusBuilder::new();
    builder.add_mapped_memory(Box::new(Ram::new(0o1000)), 0).unwrap();
    let mut bus = builder.build();

    assert_eq!(bus.read_word(0o1000), Err(BusError::new(0o1000)));
    assert_eq!(bus.read_word(0o1001), Err(BusError::new(0o1000)));
    assert_eq!(bus.write_word(0o160000, 1), Err(BusError::new(0o160000)));
}

#[test]
fn ranges_spanning_blocks() {
    let mut builder = BusBuilder::new();
    let ram = builder.add_memory(Box::new(Ram::new(0o20)));
    builder.map_memory(ram, 0o7770, 0o20, 0).unwrap();
    let mut bus = builder.build();

    bus.write_word(0o7776, 1).unwrap();
    bus.write_word(0o10000, 2).unwrap();
    assert_eq!(bus.read_word(0o7776), Ok(1));
    assert_eq!(bus.read_word(0o10000), Ok(2));
    assert_eq!(bus.read_word(0o10010), Err(BusError::new(0o10010)));
}

#[test]
fn byte_writes_select_half() {
    let mut builder = BusBuilder::new();
    builder.add_mapped_memory(Box::new(Ram::new(0o10)), 0o1000).unwrap();
    let mut bus = builder.build();

    bus.write_word(0o1002, 0o177777).unwrap();
    bus.write_byte(0o1003, 0).unwrap();
    assert_eq!(bus.read_word(0o1002), Ok(0o377));
    bus.write_byte(0o1002, 0o12).unwrap();
    assert_eq!(bus.read_word(0o1003), Ok(0o12));
}

#[test]
fn configuration_errors() {
    let mut builder = BusBuilder::new();
    let ram = builder.add_memory(Box::new(Ram::new(0o20000)));

    assert!(matches!(
        builder.map_memory(ram, 0o170000, 0o20000, 0),
        Err(BusConfigError::OutsideAddressSpace { .. })
    ));
    assert!(matches!(builder.map_memory(ram, 0o1, 2, 0), Err(BusConfigError::Misaligned { .. })));
    assert!(matches!(
        builder.map_memory(ram, 0, 0o20000, 2),
        Err(BusConfigError::OutsideMemory { .. })
    ));
    assert!(matches!(
        builder.map_memory(MemoryId(5), 0, 2, 0),
        Err(BusConfigError::UnknownMemory(5))
    ));

    builder.map_memory(ram, 0o160000, 0o20000, 0).unwrap();
}

#[test]
fn reset_initializes_devices() {
    let (device, log) = TestRegister::new(0o177706, 0);
    let mut builder = BusBuilder::new();
    builder.add_device(Box::new(device));
    let mut bus = builder.build();

    bus.reset_devices();
    bus.reset_devices();
    assert_eq!(log.lock().unwrap().inits, 2);
}

#[test]
fn state_round_trip() {
    let (device, log) = TestRegister::new(0o177706, 0o55);
    let mut builder = BusBuilder::new();
    builder.add_mapped_memory(Box::new(Ram::new(0o100)), 0).unwrap();
    builder.add_mapped_memory(Box::new(Rom::from_words(&[1, 2])), 0o100000).unwrap();
    builder.add_device(Box::new(device));
    let mut bus = builder.build();

    bus.write_word(0o10, 0o1234).unwrap();
    let state = bus.save_state().unwrap();

    bus.write_word(0o10, 0).unwrap();
    bus.write_word(0o177706, 0).unwrap();
    bus.load_state(&state).unwrap();

    assert_eq!(bus.read_word(0o10), Ok(0o1234));
    assert_eq!(log.lock().unwrap().value, 0o55);

    let mut builder = BusBuilder::new();
    builder.add_mapped_memory(Box::new(Ram::new(0o100)), 0).unwrap();
    let mut other = builder.build();
    assert!(matches!(
        other.load_state(&state),
        Err(SaveStateError::ConfigurationMismatch { kind: "memory", expected: 1, actual: 2 })
    ));
}

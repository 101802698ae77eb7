//! BK address-space router
//!
//! Memory ranges are indexed by 4KiB block and may overlap; within a block the most recently mapped
//! range is checked first. Devices are indexed by exact register address, and any number of
//! devices may share an address.

use crate::device::Device;
use crate::memory::Memory;
use crate::serialize::SaveStateError;
use bincode::{Decode, Encode};
use rustc_hash::FxHashMap;
use thiserror::Error;
use vm1_emu::bus::{BusError, BusInterface, BusResult, OpSize};

const ADDRESS_SPACE_LEN: usize = 1 << 16;
const BLOCK_SHIFT: u32 = 12;
const NUM_BLOCKS: usize = ADDRESS_SPACE_LEN >> BLOCK_SHIFT;

/// Handle returned by [`BusBuilder::add_memory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

#[derive(Debug, Error)]
pub enum BusConfigError {
    #[error("unknown memory id {0}")]
    UnknownMemory(usize),
    #[error("range {start:06o} + {len:o} bytes extends past the 16-bit address space")]
    OutsideAddressSpace { start: u16, len: usize },
    #[error("range {start:06o} is not word-aligned")]
    Misaligned { start: u16 },
    #[error("range of {len:o} bytes at memory offset {offset:o} exceeds memory size {size:o}")]
    OutsideMemory { offset: usize, len: usize, size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemoryRange {
    memory: usize,
    start: u16,
    // Inclusive
    end: u16,
    offset: usize,
}

impl MemoryRange {
    fn contains(&self, address: u16) -> bool {
        (self.start..=self.end).contains(&address)
    }

    fn memory_offset(&self, address: u16) -> usize {
        self.offset + usize::from(address - self.start)
    }
}

#[derive(Default)]
pub struct BusBuilder {
    memories: Vec<Box<dyn Memory>>,
    ranges: Vec<MemoryRange>,
    devices: Vec<Box<dyn Device>>,
}

impl BusBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a memory without mapping it. The same memory can be mapped at several addresses.
    pub fn add_memory(&mut self, memory: Box<dyn Memory>) -> MemoryId {
        self.memories.push(memory);
        MemoryId(self.memories.len() - 1)
    }

    /// Map `len` bytes of `memory`, starting at byte `offset` within it, at address `start`.
    /// Later mappings take precedence over earlier ones where they overlap.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is misaligned, leaves the address space, or runs past the end
    /// of the memory.
    pub fn map_memory(
        &mut self,
        memory: MemoryId,
        start: u16,
        len: usize,
        offset: usize,
    ) -> Result<&mut Self, BusConfigError> {
        let MemoryId(idx) = memory;
        let Some(mapped) = self.memories.get(idx) else {
            return Err(BusConfigError::UnknownMemory(idx));
        };

        if start & 1 != 0 {
            return Err(BusConfigError::Misaligned { start });
        }

        if len == 0 || usize::from(start) + len > ADDRESS_SPACE_LEN {
            return Err(BusConfigError::OutsideAddressSpace { start, len });
        }

        if offset + len > mapped.size() {
            return Err(BusConfigError::OutsideMemory { offset, len, size: mapped.size() });
        }

        let end = (usize::from(start) + len - 1) as u16;
        self.ranges.push(MemoryRange { memory: idx, start, end, offset });

        log::debug!("Mapped memory {idx} at {start:06o}-{end:06o} (offset {offset:o})");

        Ok(self)
    }

    /// Add a memory and map the whole of it at `start`.
    ///
    /// # Errors
    ///
    /// See [`Self::map_memory`].
    pub fn add_mapped_memory(
        &mut self,
        memory: Box<dyn Memory>,
        start: u16,
    ) -> Result<MemoryId, BusConfigError> {
        let len = memory.size();
        let id = self.add_memory(memory);
        self.map_memory(id, start, len, 0)?;
        Ok(id)
    }

    pub fn add_device(&mut self, device: Box<dyn Device>) -> DeviceId {
        self.devices.push(device);
        DeviceId(self.devices.len() - 1)
    }

    #[must_use]
    pub fn build(self) -> Bus {
        let mut blocks: [Vec<MemoryRange>; NUM_BLOCKS] = Default::default();
        for range in &self.ranges {
            let first_block = usize::from(range.start >> BLOCK_SHIFT);
            let last_block = usize::from(range.end >> BLOCK_SHIFT);
            for block in &mut blocks[first_block..=last_block] {
                block.insert(0, *range);
            }
        }

        let mut device_map: FxHashMap<u16, Vec<usize>> = FxHashMap::default();
        for (idx, device) in self.devices.iter().enumerate() {
            for address in device.addresses() {
                device_map.entry(address & !1).or_default().push(idx);
            }
        }

        Bus { memories: self.memories, blocks, devices: self.devices, device_map, tick: 0 }
    }
}

/// Opaque per-component state captured by [`Bus::save_state`]
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BusState {
    memories: Vec<Vec<u8>>,
    devices: Vec<Vec<u8>>,
}

pub struct Bus {
    memories: Vec<Box<dyn Memory>>,
    blocks: [Vec<MemoryRange>; NUM_BLOCKS],
    devices: Vec<Box<dyn Device>>,
    device_map: FxHashMap<u16, Vec<usize>>,
    tick: u64,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("memories", &self.memories.len())
            .field("devices", &self.devices.iter().map(|device| device.name()).collect::<Vec<_>>())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// Tick passed to device callbacks
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub fn memory(&self, id: MemoryId) -> Option<&dyn Memory> {
        self.memories.get(id.0).map(|memory| &**memory)
    }

    pub fn memory_mut(&mut self, id: MemoryId) -> Option<&mut (dyn Memory + 'static)> {
        self.memories.get_mut(id.0).map(|memory| &mut **memory)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut (dyn Device + 'static)> {
        self.devices.get_mut(id.0).map(|device| &mut **device)
    }

    /// Call [`Device::init`] on every device.
    pub fn init_devices(&mut self) {
        for device in &mut self.devices {
            device.init(self.tick);
        }
    }

    fn ranges_at(&self, address: u16) -> impl Iterator<Item = MemoryRange> + '_ {
        self.blocks[usize::from(address >> BLOCK_SHIFT)]
            .iter()
            .copied()
            .filter(move |range| range.contains(address))
    }

    fn read_memory(&self, address: u16) -> Option<u16> {
        self.ranges_at(address).find_map(|range| {
            let memory = &self.memories[range.memory];
            if !memory.is_readable() {
                return None;
            }
            memory.read(range.memory_offset(address))
        })
    }

    fn read_devices(&mut self, address: u16) -> Option<u16> {
        let idxs = self.device_map.get(&address)?;

        let mut value: Option<u16> = None;
        for &idx in idxs {
            if let Some(device_value) = self.devices[idx].read(self.tick, address) {
                value = Some(value.unwrap_or(0) | device_value);
            }
        }

        value
    }

    fn write(&mut self, size: OpSize, address: u16, value: u16) -> BusResult<()> {
        let mut accepted = false;

        let block = usize::from(address >> BLOCK_SHIFT);
        for range in &self.blocks[block] {
            if !range.contains(address) {
                continue;
            }

            let memory = &mut self.memories[range.memory];
            if memory.is_writable() {
                accepted |= memory.write(size, range.memory_offset(address), value);
            }
        }

        if let Some(idxs) = self.device_map.get(&(address & !1)) {
            for &idx in idxs {
                accepted |= self.devices[idx].write(self.tick, size, address, value);
            }
        }

        if accepted {
            Ok(())
        } else {
            log::debug!("No memory or device accepted write to {address:06o}");
            Err(BusError::new(address))
        }
    }

    /// # Errors
    ///
    /// Propagates encoding errors from memories and devices.
    pub fn save_state(&self) -> Result<BusState, SaveStateError> {
        let memories =
            self.memories.iter().map(|memory| memory.save_state()).collect::<Result<_, _>>()?;
        let devices =
            self.devices.iter().map(|device| device.save_state()).collect::<Result<_, _>>()?;

        Ok(BusState { memories, devices })
    }

    /// # Errors
    ///
    /// Returns an error if the state was captured from a bus with a different number of memories
    /// or devices, or if any component rejects its state.
    pub fn load_state(&mut self, state: &BusState) -> Result<(), SaveStateError> {
        check_count("memory", self.memories.len(), state.memories.len())?;
        check_count("device", self.devices.len(), state.devices.len())?;

        for (index, (memory, memory_state)) in
            self.memories.iter_mut().zip(&state.memories).enumerate()
        {
            memory
                .load_state(memory_state)
                .map_err(|source| SaveStateError::Component { kind: "memory", index, source })?;
        }

        for (index, (device, device_state)) in
            self.devices.iter_mut().zip(&state.devices).enumerate()
        {
            device
                .load_state(device_state)
                .map_err(|source| SaveStateError::Component { kind: "device", index, source })?;
        }

        Ok(())
    }
}

fn check_count(kind: &'static str, expected: usize, actual: usize) -> Result<(), SaveStateError> {
    if expected != actual {
        return Err(SaveStateError::ConfigurationMismatch { kind, expected, actual });
    }

    Ok(())
}

impl BusInterface for Bus {
    fn read_word(&mut self, address: u16) -> BusResult<u16> {
        let address = address & !1;

        let memory_value = self.read_memory(address);
        let device_value = self.read_devices(address);

        match (memory_value, device_value) {
            (Some(memory), Some(device)) => Ok(memory | device),
            (Some(value), None) | (None, Some(value)) => Ok(value),
            (None, None) => Err(BusError::new(address)),
        }
    }

    fn write_word(&mut self, address: u16, value: u16) -> BusResult<()> {
        self.write(OpSize::Word, address & !1, value)
    }

    fn write_byte(&mut self, address: u16, value: u8) -> BusResult<()> {
        self.write(OpSize::Byte, address, value.into())
    }

    fn reset_devices(&mut self) {
        log::trace!("RESET: reinitializing {} devices", self.devices.len());
        self.init_devices();
    }
}

#[cfg(test)]
pub(crate) mod tests;

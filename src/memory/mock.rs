//! In-memory process stand-in for tests, with per-region fault injection.

use super::{Bitness, ProcessMemory, RegionInfo, RegionKind};
use anyhow::{Result, anyhow};
use std::sync::Mutex;

struct MockRegion {
    info: RegionInfo,
    data: Vec<u8>,
    faulty: bool,
}

/// Fake target process. Tests mutate its contents between scan ticks.
pub struct MockMemory {
    regions: Mutex<Vec<MockRegion>>,
    bitness: Bitness,
}

impl MockMemory {
    pub fn new() -> Self {
        Self::with_bitness(Bitness::Bits64)
    }

    pub fn with_bitness(bitness: Bitness) -> Self {
        Self {
            regions: Mutex::new(Vec::new()),
            bitness,
        }
    }

    pub fn add_region(&self, base: u64, size: usize, kind: RegionKind, module: Option<&str>) {
        let mut regions = self.regions.lock().unwrap();
        regions.push(MockRegion {
            info: RegionInfo {
                base,
                size,
                kind,
                module: module.map(str::to_owned),
            },
            data: vec![0u8; size],
            faulty: false,
        });
        regions.sort_by_key(|r| r.info.base);
    }

    pub fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
        let mut regions = self.regions.lock().unwrap();
        let region = regions
            .iter_mut()
            .find(|r| r.info.contains(address) && address + bytes.len() as u64 <= r.info.end())
            .ok_or_else(|| anyhow!("no mock region covers 0x{:X}", address))?;
        let offset = (address - region.info.base) as usize;
        region.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_u32(&self, address: u64, value: u32) -> Result<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_u64(&self, address: u64, value: u64) -> Result<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Make every read inside the region fail until cleared.
    pub fn set_faulty(&self, base: u64, faulty: bool) {
        let mut regions = self.regions.lock().unwrap();
        if let Some(region) = regions.iter_mut().find(|r| r.info.base == base) {
            region.faulty = faulty;
        }
    }
}

impl Default for MockMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemory for MockMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let regions = self.regions.lock().unwrap();
        let region = regions
            .iter()
            .find(|r| r.info.contains(address) && address + buf.len() as u64 <= r.info.end())
            .ok_or_else(|| anyhow!("unmapped read at 0x{:X}", address))?;
        if region.faulty {
            return Err(anyhow!("injected read fault at 0x{:X}", address));
        }
        let offset = (address - region.info.base) as usize;
        buf.copy_from_slice(&region.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn regions(&self) -> Result<Vec<RegionInfo>> {
        Ok(self
            .regions
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.info.clone())
            .collect())
    }

    fn bitness(&self) -> Bitness {
        self.bitness
    }
}

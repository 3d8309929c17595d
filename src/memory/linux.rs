//! Linux userspace accessor: `process_vm_readv` for reads and
//! `/proc/<pid>/maps` for region enumeration and classification.

use super::{Bitness, ProcessMemory, RegionInfo, RegionKind};
use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use log::{Level, debug, log_enabled};
use nix::sys::uio::{RemoteIoVec, process_vm_readv};
use nix::unistd::Pid;
use std::fs;
use std::io::IoSliceMut;
use std::path::Path;

pub struct LinuxProcessMemory {
    pid: Pid,
    bitness: Bitness,
}

impl LinuxProcessMemory {
    /// Attach to a process, sniffing its bitness from the ELF class of
    /// `/proc/<pid>/exe`.
    pub fn attach(pid: i32) -> Result<Self> {
        let exe = format!("/proc/{pid}/exe");
        let header = fs::read(&exe).with_context(|| format!("failed to read {exe}"))?;
        let bitness = match header.get(4) {
            Some(1) => Bitness::Bits32,
            Some(2) => Bitness::Bits64,
            _ => return Err(anyhow!("{} is not a valid ELF image", exe)),
        };

        if log_enabled!(Level::Debug) {
            debug!("attached to pid {}, bitness {:?}", pid, bitness);
        }

        Ok(Self {
            pid: Pid::from_raw(pid),
            bitness,
        })
    }

    fn parse_maps(&self, maps: &str) -> Vec<RegionInfo> {
        let parsed = maps.lines().filter_map(parse_maps_line);

        // Merge adjacent mappings of the same kind and module so the engine
        // sees one region per span instead of one per page-permission split.
        parsed
            .coalesce(|a, b| {
                if a.end() == b.base && a.kind == b.kind && a.module == b.module {
                    Ok(RegionInfo {
                        base: a.base,
                        size: a.size + b.size,
                        kind: a.kind,
                        module: a.module,
                    })
                } else {
                    Err((a, b))
                }
            })
            .collect()
    }
}

/// Parse one `/proc/pid/maps` line: `start-end perms offset dev inode path`.
/// Returns None for unreadable or malformed mappings.
fn parse_maps_line(line: &str) -> Option<RegionInfo> {
    let mut parts = line.split_whitespace();
    let range = parts.next()?;
    let perms = parts.next()?;

    if !perms.starts_with('r') {
        return None;
    }

    let (start, end) = range.split_once('-')?;
    let base = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    if end <= base {
        return None;
    }

    let path = line.split_whitespace().nth(5).unwrap_or("");
    let writable = perms.as_bytes().get(1) == Some(&b'w');

    let (kind, module) = if path == "[heap]" {
        (RegionKind::Heap, None)
    } else if path.is_empty() && writable {
        // Anonymous writable mappings behave like heap for scanning purposes.
        (RegionKind::Heap, None)
    } else if path.starts_with('/') {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        (RegionKind::Static, name)
    } else {
        (RegionKind::Other, None)
    };

    Some(RegionInfo {
        base,
        size: (end - base) as usize,
        kind,
        module,
    })
}

impl ProcessMemory for LinuxProcessMemory {
    fn read(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let len = buf.len();
        let remote = [RemoteIoVec {
            base: address as usize,
            len,
        }];
        let mut local = [IoSliceMut::new(buf)];

        let read = process_vm_readv(self.pid, &mut local, &remote)
            .with_context(|| format!("process_vm_readv failed at 0x{:X}", address))?;

        if read != len {
            return Err(anyhow!(
                "short read at 0x{:X}: {} of {} bytes",
                address,
                read,
                len
            ));
        }

        Ok(())
    }

    fn regions(&self) -> Result<Vec<RegionInfo>> {
        let path = format!("/proc/{}/maps", self.pid);
        let maps = fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
        Ok(self.parse_maps(&maps))
    }

    fn bitness(&self) -> Bitness {
        self.bitness
    }
}

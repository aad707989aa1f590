//! Physical and virtual address newtypes
//!
//! The kernel is direct-mapped: the image is loaded at a fixed physical base
//! and mapped at a fixed virtual base, so the phys/virt offset is a boot-time
//! constant. Conversions are only valid inside that window and fail loudly
//! outside it, instead of silently producing a wild pointer.

use core::fmt;

use crate::error::{KernelError, KernelResult};
use crate::mm::{FRAME_SIZE, PAGE_TABLE_ENTRIES};

/// Span of the direct-mapped kernel window: one page table's worth (4 MiB),
/// identity-mapped low and aliased at the higher-half base.
pub const DIRECT_MAP_BYTES: u32 = (PAGE_TABLE_ENTRIES * FRAME_SIZE) as u32;

/// Physical memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(u32);

impl PhysAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Index of the frame containing this address.
    pub const fn frame_index(self) -> usize {
        (self.0 as usize) / FRAME_SIZE
    }

    pub const fn align_down(self) -> Self {
        Self(self.0 & !(FRAME_SIZE as u32 - 1))
    }

    pub const fn align_up(self) -> Self {
        Self((self.0 + FRAME_SIZE as u32 - 1) & !(FRAME_SIZE as u32 - 1))
    }

    pub const fn is_frame_aligned(self) -> bool {
        self.0 % FRAME_SIZE as u32 == 0
    }

    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Virtual memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(u32);

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Page directory index (top 10 bits).
    pub const fn pd_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Page table index (middle 10 bits).
    pub const fn pt_index(self) -> usize {
        ((self.0 >> 12) & 0x3FF) as usize
    }

    /// Offset within the page (low 12 bits).
    pub const fn page_offset(self) -> u32 {
        self.0 & 0xFFF
    }

    pub const fn align_down(self) -> Self {
        Self(self.0 & !(FRAME_SIZE as u32 - 1))
    }

    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Boot-time description of where the kernel image sits in physical and
/// virtual memory, handed over by the multiboot entry glue.
#[derive(Debug, Clone, Copy)]
pub struct KernelWindow {
    pub phys_start: PhysAddr,
    pub phys_end: PhysAddr,
    pub virt_start: VirtAddr,
    pub virt_end: VirtAddr,
}

impl KernelWindow {
    /// Constant offset between the kernel's virtual and physical base.
    pub const fn offset(&self) -> u32 {
        self.virt_start.as_u32().wrapping_sub(self.phys_start.as_u32())
    }

    /// Translate a physical address to its kernel-virtual alias.
    ///
    /// Only the first [`DIRECT_MAP_BYTES`] of physical memory are mapped by
    /// the kernel page table, so anything beyond has no alias.
    pub fn phys_to_virt(&self, addr: PhysAddr) -> KernelResult<VirtAddr> {
        if addr.as_u32() >= DIRECT_MAP_BYTES {
            return Err(KernelError::OutsideKernelWindow { addr: addr.as_u32() });
        }
        Ok(VirtAddr::new(addr.as_u32().wrapping_add(self.offset())))
    }

    /// Translate a kernel-virtual address back to its physical address.
    pub fn virt_to_phys(&self, addr: VirtAddr) -> KernelResult<PhysAddr> {
        let phys = addr.as_u32().wrapping_sub(self.offset());
        if phys >= DIRECT_MAP_BYTES {
            return Err(KernelError::OutsideKernelWindow { addr: addr.as_u32() });
        }
        Ok(PhysAddr::new(phys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> KernelWindow {
        KernelWindow {
            phys_start: PhysAddr::new(0x0010_0000),
            phys_end: PhysAddr::new(0x0018_0000),
            virt_start: VirtAddr::new(0xC010_0000),
            virt_end: VirtAddr::new(0xC018_0000),
        }
    }

    #[test]
    fn round_trip_inside_window() {
        let w = window();
        let p = PhysAddr::new(0x0012_3456);
        let v = w.phys_to_virt(p).unwrap();
        assert_eq!(v.as_u32(), 0xC012_3456);
        assert_eq!(w.virt_to_phys(v).unwrap(), p);
    }

    #[test]
    fn conversion_fails_outside_window() {
        let w = window();
        assert!(w.phys_to_virt(PhysAddr::new(DIRECT_MAP_BYTES)).is_err());
        assert!(w.virt_to_phys(VirtAddr::new(0x0800_0000)).is_err());
    }

    #[test]
    fn index_extraction() {
        let v = VirtAddr::new(0xC040_1A04);
        assert_eq!(v.pd_index(), 0xC040_1A04 >> 22);
        assert_eq!(v.pt_index(), 0x001);
        assert_eq!(v.page_offset(), 0xA04);

        let v = VirtAddr::new(0xBFFF_EFFF);
        assert_eq!(v.align_down().as_u32(), 0xBFFF_E000);
    }
}

//! Two-level IA-32 paging
//!
//! Page directories and tables are 1024 32-bit entries. The kernel occupies
//! the top-quarter of every address space: directory entries from
//! [`KERNEL_PDT_IDX`] upward are copied verbatim from the kernel directory
//! into each process directory and never mutated afterwards, so the kernel
//! is reachable on every trap entry no matter which CR3 is live.

use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};
use crate::mm::addr::{PhysAddr, VirtAddr};
use crate::mm::frame_allocator::FrameAllocator;
use crate::mm::phys::PhysMemory;
use crate::mm::{FRAME_SIZE, KERNEL_PDT_IDX, PAGE_DIRECTORY_ENTRIES, PAGE_TABLE_ENTRIES};

bitflags! {
    /// PDE/PTE low-bit flags (Intel IA-32 layout).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        /// 4 MiB page (PDE only, unused here).
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
    }
}

/// Mask selecting the physical base address in a PDE/PTE.
const ENTRY_ADDR_MASK: u32 = !0xFFF;

/// A page directory, identified by the physical address CR3 would hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDirectory {
    phys: PhysAddr,
}

impl PageDirectory {
    pub const fn from_cr3(phys: PhysAddr) -> Self {
        Self { phys }
    }

    /// The physical address to load into CR3 for this directory.
    pub const fn cr3(self) -> PhysAddr {
        self.phys
    }

    fn entry_addr(self, index: usize) -> PhysAddr {
        self.phys.offset((index * 4) as u32)
    }

    /// Read a raw directory entry.
    pub fn entry(self, mem: &dyn PhysMemory, index: usize) -> u32 {
        mem.read_u32(self.entry_addr(index))
    }

    fn set_entry(self, mem: &mut dyn PhysMemory, index: usize, value: u32) {
        mem.write_u32(self.entry_addr(index), value);
    }

    /// Build the kernel's own directory: one page table identity-mapping the
    /// first 4 MiB, installed both at slot 0 and at [`KERNEL_PDT_IDX`] so
    /// the kernel stays visible across the jump to the higher half.
    pub fn new_kernel(
        mem: &mut dyn PhysMemory,
        frames: &mut FrameAllocator,
    ) -> KernelResult<Self> {
        let dir_phys = frames
            .alloc()
            .ok_or(KernelError::OutOfMemory { requested_frames: 1 })?;
        let table_phys = match frames.alloc() {
            Some(addr) => addr,
            None => {
                frames.free(dir_phys);
                return Err(KernelError::OutOfMemory { requested_frames: 1 });
            }
        };

        mem.fill(dir_phys, FRAME_SIZE, 0);
        mem.fill(table_phys, FRAME_SIZE, 0);

        let table_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::WRITE_THROUGH;
        for i in 0..PAGE_TABLE_ENTRIES {
            let frame = (i * FRAME_SIZE) as u32;
            mem.write_u32(
                table_phys.offset((i * 4) as u32),
                frame | table_flags.bits(),
            );
        }

        let dir = Self::from_cr3(dir_phys);
        dir.set_entry(mem, 0, table_phys.as_u32() | table_flags.bits());
        dir.set_entry(mem, KERNEL_PDT_IDX, table_phys.as_u32() | table_flags.bits());
        Ok(dir)
    }

    /// Drop the low identity alias once execution runs in the higher half.
    pub fn drop_identity_mapping(self, mem: &mut dyn PhysMemory) {
        self.set_entry(mem, 0, 0);
        flush_page(VirtAddr::new(0));
    }

    /// Create a fresh process directory sharing the kernel's top-half
    /// entries.
    pub fn new_user(
        mem: &mut dyn PhysMemory,
        frames: &mut FrameAllocator,
        kernel: PageDirectory,
    ) -> KernelResult<Self> {
        let dir_phys = frames
            .alloc()
            .ok_or(KernelError::OutOfMemory { requested_frames: 1 })?;
        mem.fill(dir_phys, FRAME_SIZE, 0);

        let dir = Self::from_cr3(dir_phys);
        for i in KERNEL_PDT_IDX..PAGE_DIRECTORY_ENTRIES {
            let shared = kernel.entry(mem, i);
            dir.set_entry(mem, i, shared);
        }
        Ok(dir)
    }

    /// Map `virt -> phys` with `flags`, allocating the page table on demand.
    ///
    /// User mappings may not touch the shared kernel top-half slots.
    pub fn map(
        self,
        mem: &mut dyn PhysMemory,
        frames: &mut FrameAllocator,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageFlags,
    ) -> KernelResult<()> {
        let pd_index = virt.pd_index();
        if pd_index >= KERNEL_PDT_IDX {
            return Err(KernelError::InvalidAddress { addr: virt.as_u32() });
        }

        let pde = self.entry(mem, pd_index);
        let table_phys = if pde & PageFlags::PRESENT.bits() == 0 {
            let table_phys = frames
                .alloc()
                .ok_or(KernelError::OutOfMemory { requested_frames: 1 })?;
            mem.fill(table_phys, FRAME_SIZE, 0);

            let pde_flags = PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER;
            self.set_entry(mem, pd_index, table_phys.as_u32() | pde_flags.bits());
            table_phys
        } else {
            PhysAddr::new(pde & ENTRY_ADDR_MASK)
        };

        mem.write_u32(
            table_phys.offset((virt.pt_index() * 4) as u32),
            phys.as_u32() | flags.bits(),
        );
        flush_page(virt);
        Ok(())
    }

    /// Remove the mapping for `virt` if one exists. Emptied page tables are
    /// not reclaimed.
    pub fn unmap(self, mem: &mut dyn PhysMemory, virt: VirtAddr) {
        let pde = self.entry(mem, virt.pd_index());
        if pde & PageFlags::PRESENT.bits() == 0 {
            return;
        }

        let table_phys = PhysAddr::new(pde & ENTRY_ADDR_MASK);
        mem.write_u32(table_phys.offset((virt.pt_index() * 4) as u32), 0);
        flush_page(virt);
    }

    /// Walk the tables and translate `virt` to its physical address,
    /// preserving the page offset. `None` when not mapped.
    pub fn translate(self, mem: &dyn PhysMemory, virt: VirtAddr) -> Option<PhysAddr> {
        let pde = self.entry(mem, virt.pd_index());
        if pde & PageFlags::PRESENT.bits() == 0 {
            return None;
        }

        let table_phys = PhysAddr::new(pde & ENTRY_ADDR_MASK);
        let pte = mem.read_u32(table_phys.offset((virt.pt_index() * 4) as u32));
        if pte & PageFlags::PRESENT.bits() == 0 {
            return None;
        }

        Some(PhysAddr::new((pte & ENTRY_ADDR_MASK) | virt.page_offset()))
    }

    /// Read the raw PTE for `virt`, if its page table is present.
    pub fn pte(self, mem: &dyn PhysMemory, virt: VirtAddr) -> Option<u32> {
        let pde = self.entry(mem, virt.pd_index());
        if pde & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        let table_phys = PhysAddr::new(pde & ENTRY_ADDR_MASK);
        Some(mem.read_u32(table_phys.offset((virt.pt_index() * 4) as u32)))
    }

    /// Tear down the user half of this address space: every mapped user
    /// frame, every user page table, and the directory itself go back to
    /// the frame allocator. The shared kernel top-half entries are left
    /// alone (the frames behind them belong to the kernel directory).
    pub fn destroy(self, mem: &mut dyn PhysMemory, frames: &mut FrameAllocator) {
        for pd_index in 0..KERNEL_PDT_IDX {
            let pde = self.entry(mem, pd_index);
            if pde & PageFlags::PRESENT.bits() == 0 {
                continue;
            }
            let table_phys = PhysAddr::new(pde & ENTRY_ADDR_MASK);
            for pt_index in 0..PAGE_TABLE_ENTRIES {
                let pte = mem.read_u32(table_phys.offset((pt_index * 4) as u32));
                if pte & PageFlags::PRESENT.bits() != 0 {
                    frames.free(PhysAddr::new(pte & ENTRY_ADDR_MASK));
                }
            }
            frames.free(table_phys);
        }
        frames.free(self.phys);
    }
}

/// Invalidate the TLB entry for `virt` on the executing CPU.
#[inline]
pub fn flush_page(virt: VirtAddr) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    crate::arch::x86::invlpg(virt);
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = virt;
}

//! Page fault handling
//!
//! User space is demand-paged: the first touch of an unmapped user page
//! allocates a zero-filled frame and maps it, then the faulting instruction
//! restarts. Everything else — faults with no current process, faults on
//! kernel addresses, protection violations, frame exhaustion — is fatal.

use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::mm::addr::{PhysAddr, VirtAddr};
use crate::mm::frame_allocator::FrameAllocator;
use crate::mm::paging::{PageDirectory, PageFlags};
use crate::mm::phys::PhysMemory;
use crate::mm::{FRAME_SIZE, KERNEL_VIRTUAL_START};
use crate::trap::{TrapFrame, TrapOutcome};

bitflags! {
    /// Page-fault error code bits pushed by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultError: u32 {
        /// Set when the fault was a protection violation on a present page;
        /// clear when the page was not present.
        const PRESENT = 1 << 0;
        /// Set when the access was a write.
        const WRITE = 1 << 1;
        /// Set when the access came from ring 3.
        const USER = 1 << 2;
    }
}

/// Allocate, map and zero-fill the user page containing `virt`.
///
/// Shared between the fault handler and the user-copy path in
/// [`crate::mm::user`], which materialises pages the same way the MMU
/// would have on a hardware dereference.
pub(crate) fn demand_page(
    mem: &mut dyn PhysMemory,
    frames: &mut FrameAllocator,
    directory: PageDirectory,
    virt: VirtAddr,
    write: bool,
) -> KernelResult<PhysAddr> {
    let page = virt.align_down();
    let frame = frames
        .alloc()
        .ok_or(KernelError::OutOfMemory { requested_frames: 1 })?;

    let mut flags = PageFlags::PRESENT | PageFlags::USER;
    if write || page.as_u32() < KERNEL_VIRTUAL_START {
        flags |= PageFlags::WRITABLE;
    }

    if let Err(e) = directory.map(mem, frames, page, frame, flags) {
        frames.free(frame);
        return Err(e);
    }
    mem.fill(frame, FRAME_SIZE, 0);
    Ok(frame)
}

/// Trap handler for vector 14.
pub fn page_fault_handler(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    frame: &mut TrapFrame,
    fault_addr: VirtAddr,
) -> TrapOutcome {
    let error = PageFaultError::from_bits_truncate(frame.info.error_code);

    log::debug!(
        "Page fault at {} (eip: {:#x}, present={}, write={}, user={})",
        fault_addr,
        frame.stack.eip,
        error.contains(PageFaultError::PRESENT),
        error.contains(PageFaultError::WRITE),
        error.contains(PageFaultError::USER),
    );

    let directory = match kernel.procs.current_process() {
        Some(process) => process.context.directory,
        None => {
            log::error!("Page fault with no current process at address: {}", fault_addr);
            return TrapOutcome::Halt;
        }
    };

    if fault_addr.as_u32() >= KERNEL_VIRTUAL_START {
        log::error!(
            "Page fault in kernel space at address: {}, eip: {:#x}",
            fault_addr,
            frame.stack.eip
        );
        return TrapOutcome::Halt;
    }

    if !error.contains(PageFaultError::PRESENT) {
        let write = error.contains(PageFaultError::WRITE);
        match demand_page(mem, &mut kernel.frames, directory, fault_addr, write) {
            Ok(frame_phys) => {
                log::debug!(
                    "Mapped {} -> {} for PID {}",
                    fault_addr.align_down(),
                    frame_phys,
                    kernel.procs.current_process().map(|p| p.pid.0).unwrap_or(0),
                );
                return TrapOutcome::Continue;
            }
            Err(e) => {
                log::error!("Failed to demand-page {}: {}", fault_addr, e);
                return TrapOutcome::Halt;
            }
        }
    }

    log::error!(
        "Page fault (protection violation) at {}, eip: {:#x}, error_code: {:#x}",
        fault_addr,
        frame.stack.eip,
        frame.info.error_code
    );
    TrapOutcome::Halt
}

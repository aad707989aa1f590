//! User-memory accessors
//!
//! Syscall arguments that point into user space are reached by walking the
//! calling process's page tables, never by trusting the raw pointer. Writes
//! to unmapped user pages demand-page them first, which is exactly what the
//! MMU would have done had the kernel dereferenced the address directly.

use crate::error::{KernelError, KernelResult};
use crate::mm::addr::VirtAddr;
use crate::mm::frame_allocator::FrameAllocator;
use crate::mm::page_fault::demand_page;
use crate::mm::paging::PageDirectory;
use crate::mm::phys::PhysMemory;
use crate::mm::{FRAME_SIZE, KERNEL_VIRTUAL_START};

/// Read a NUL-terminated string from user space into `buf`.
///
/// Returns the string length (excluding the terminator). Unmapped pages
/// read as demand-zero, so running off the end of mapped memory terminates
/// the string rather than faulting. Strings longer than `buf` are
/// truncated at the buffer boundary.
pub fn read_user_cstr(
    mem: &dyn PhysMemory,
    directory: PageDirectory,
    addr: VirtAddr,
    buf: &mut [u8],
) -> KernelResult<usize> {
    if addr.as_u32() == 0 {
        return Err(KernelError::InvalidArgument { name: "null user pointer" });
    }
    if addr.as_u32() >= KERNEL_VIRTUAL_START {
        return Err(KernelError::InvalidAddress { addr: addr.as_u32() });
    }

    let mut len = 0usize;
    let mut cursor = addr;
    while len < buf.len() {
        let in_page = FRAME_SIZE - cursor.page_offset() as usize;
        let chunk = in_page.min(buf.len() - len);

        match directory.translate(mem, cursor) {
            Some(phys) => {
                mem.read(phys, &mut buf[len..len + chunk]);
                if let Some(nul) = buf[len..len + chunk].iter().position(|&b| b == 0) {
                    return Ok(len + nul);
                }
            }
            // Untouched page: reads as zeroes, so the string ends here.
            None => {
                buf[len] = 0;
                return Ok(len);
            }
        }

        len += chunk;
        cursor = cursor.offset(chunk as u32);
        if cursor.as_u32() >= KERNEL_VIRTUAL_START {
            break;
        }
    }
    Ok(len)
}

/// Write `bytes` into user space at `addr`, demand-paging any page that is
/// not mapped yet.
pub fn copy_to_user(
    mem: &mut dyn PhysMemory,
    frames: &mut FrameAllocator,
    directory: PageDirectory,
    addr: VirtAddr,
    bytes: &[u8],
) -> KernelResult<()> {
    if addr.as_u32() == 0 {
        return Err(KernelError::InvalidArgument { name: "null user pointer" });
    }
    let end = addr.as_u32() as u64 + bytes.len() as u64;
    if end > KERNEL_VIRTUAL_START as u64 {
        return Err(KernelError::InvalidAddress { addr: addr.as_u32() });
    }

    let mut written = 0usize;
    let mut cursor = addr;
    while written < bytes.len() {
        let in_page = FRAME_SIZE - cursor.page_offset() as usize;
        let chunk = in_page.min(bytes.len() - written);

        let phys = match directory.translate(mem, cursor) {
            Some(phys) => phys,
            None => {
                demand_page(mem, frames, directory, cursor, true)?;
                directory
                    .translate(mem, cursor)
                    .expect("page still unmapped after demand paging")
            }
        };
        mem.write(phys, &bytes[written..written + chunk]);

        written += chunk;
        cursor = cursor.offset(chunk as u32);
    }
    Ok(())
}

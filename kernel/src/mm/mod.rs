//! Memory management
//!
//! Physical frame bitmap, two-level paging with a shared higher-half kernel
//! mapping, demand paging for user space, and the user-memory accessors the
//! syscall layer goes through.

pub mod addr;
pub mod frame_allocator;
pub mod page_fault;
pub mod paging;
pub mod phys;
pub mod user;

pub use addr::{KernelWindow, PhysAddr, VirtAddr};
pub use frame_allocator::FrameAllocator;
pub use page_fault::page_fault_handler;
pub use paging::{PageDirectory, PageFlags};
pub use phys::{BufferMemory, PhysMemory};

/// Size of a physical frame / virtual page.
pub const FRAME_SIZE: usize = 4096;

/// Entries per page directory and per page table.
pub const PAGE_DIRECTORY_ENTRIES: usize = 1024;
pub const PAGE_TABLE_ENTRIES: usize = 1024;

/// Fixed RAM window the frame bitmap covers.
pub const TOTAL_PHYSICAL_MEMORY: usize = 128 * 1024 * 1024;
pub const TOTAL_FRAMES: usize = TOTAL_PHYSICAL_MEMORY / FRAME_SIZE;

/// Base of the higher-half kernel mapping, shared by every address space.
pub const KERNEL_VIRTUAL_START: u32 = 0xC000_0000;

/// First page directory slot belonging to the kernel (0x300).
pub const KERNEL_PDT_IDX: usize = (KERNEL_VIRTUAL_START >> 22) as usize;

/// User virtual memory map.
pub const USER_CODE_START: u32 = 0x0804_8000;
pub const USER_HEAP_START: u32 = 0x0810_0000;
pub const USER_STACK_TOP: u32 = 0xBFFF_F000;

//! Process creation
//!
//! Builds the address space and the ring-0 -> ring-3 `iret` frame for a new
//! user process from a flat boot-module image, plus the ring-0-only variant
//! for kernel processes.

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::mm::{
    PageDirectory, PageFlags, PhysAddr, PhysMemory, VirtAddr, FRAME_SIZE, USER_CODE_START,
    USER_STACK_TOP,
};
use crate::process::pcb::{
    KernelStack, Process, ProcessState, KERNEL_CS_SELECTOR, KERNEL_EFLAGS, USER_CS_SELECTOR,
    USER_DS_SELECTOR, USER_EFLAGS,
};
use crate::trap::StackState;

/// The five words an IA-32 `iret` consumes, written to a kernel stack by a
/// builder that also reports the resulting stack depth. Nothing outside
/// this type byte-bashes an iret frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IretFrame {
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl IretFrame {
    pub fn from_stack_state(state: &StackState) -> Self {
        Self {
            eip: state.eip,
            cs: state.cs,
            eflags: state.eflags,
            esp: state.esp,
            ss: state.ss,
        }
    }

    /// Lay out a privilege-crossing frame at the top of `kstack`
    /// (`ss, esp, eflags, cs, eip`, pushed in that order) and return the
    /// stack depth in bytes. `iret` from that depth enters ring 3.
    pub fn push_user(&self, kstack: &mut KernelStack) -> usize {
        kstack.write_word(4, self.ss);
        kstack.write_word(8, self.esp);
        kstack.write_word(12, self.eflags);
        kstack.write_word(16, self.cs);
        kstack.write_word(20, self.eip);
        20
    }

    /// Same-privilege variant: no `ss`/`esp` words, but a return address
    /// beneath the frame so the entry function has somewhere to `ret` to.
    pub fn push_kernel(&self, kstack: &mut KernelStack, return_to: VirtAddr) -> usize {
        kstack.write_word(4, return_to.as_u32());
        kstack.write_word(8, self.eflags);
        kstack.write_word(12, self.cs);
        kstack.write_word(16, self.eip);
        16
    }
}

/// Rebuild the iret frame on `process`'s kernel stack from its saved trap
/// frame. Used when creating, forking and preempting alike: the next switch
/// to the process pops this frame.
pub fn arm_user_resume(process: &mut Process) {
    let frame = IretFrame::from_stack_state(&process.context.frame);
    process.kstack_depth = frame.push_user(&mut process.kstack);
}

/// Create the initial user process from a flat program image sitting in
/// physical memory (a multiboot module). The image is copied page by page
/// to freshly allocated frames mapped from [`USER_CODE_START`]; the user
/// stack is not mapped up front, the first push demand-pages it.
pub fn create_process(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    image: PhysAddr,
    image_size: u32,
) -> KernelResult<usize> {
    let slot = kernel.procs.allocate()?;
    let pid = kernel.procs.process(slot).pid;

    log::info!(
        "Creating user process with PID: {}, module size: {} bytes",
        pid,
        image_size
    );

    let directory = match PageDirectory::new_user(mem, &mut kernel.frames, kernel.kernel_pd) {
        Ok(directory) => directory,
        Err(e) => {
            log::error!("Failed to create page directory for PID {}", pid);
            kernel.procs.release(slot);
            return Err(e);
        }
    };

    let pages_needed = (image_size as usize).div_ceil(FRAME_SIZE);
    log::debug!(
        "PID {}: code {:#010x}..{:#010x} ({} page(s)), stack top {:#010x}",
        pid,
        USER_CODE_START,
        USER_CODE_START + (pages_needed * FRAME_SIZE) as u32,
        pages_needed,
        USER_STACK_TOP
    );

    let mut bounce = [0u8; FRAME_SIZE];
    for page in 0..pages_needed {
        let frame = match kernel.frames.alloc() {
            Some(frame) => frame,
            None => {
                log::error!("Failed to allocate frame for user code page {}", page);
                directory.destroy(mem, &mut kernel.frames);
                kernel.procs.release(slot);
                return Err(KernelError::OutOfMemory { requested_frames: 1 });
            }
        };

        let virt = VirtAddr::new(USER_CODE_START + (page * FRAME_SIZE) as u32);
        let flags = PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE;
        if let Err(e) = directory.map(mem, &mut kernel.frames, virt, frame, flags) {
            kernel.frames.free(frame);
            directory.destroy(mem, &mut kernel.frames);
            kernel.procs.release(slot);
            return Err(e);
        }

        // Copy this page's slice of the image; the zeroed bounce buffer
        // pads the tail of the last page.
        let offset = page * FRAME_SIZE;
        let copy_size = FRAME_SIZE.min(image_size as usize - offset);
        bounce.fill(0);
        mem.read(image.offset(offset as u32), &mut bounce[..copy_size]);
        mem.write(frame, &bounce);
    }

    let process = kernel.procs.process_mut(slot);
    process.context.directory = directory;
    process.context.frame = StackState {
        eip: USER_CODE_START,
        cs: USER_CS_SELECTOR,
        eflags: USER_EFLAGS,
        esp: USER_STACK_TOP,
        ss: USER_DS_SELECTOR,
    };
    arm_user_resume(process);

    log::debug!(
        "PID {}: entry {:#010x}, cs {:#x}, ss {:#x}, cr3 {}",
        pid,
        USER_CODE_START,
        USER_CS_SELECTOR,
        USER_DS_SELECTOR,
        directory.cr3()
    );

    process.state = ProcessState::Ready;
    kernel.procs.push_ready_front(slot);
    Ok(slot)
}

/// Create a ring-0 process that starts at `entry`. `idle_return` is pushed
/// beneath the iret frame so the entry function returns into the idle loop
/// instead of falling off the stack.
pub fn create_kernel_process(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    entry: VirtAddr,
    idle_return: VirtAddr,
) -> KernelResult<usize> {
    let slot = kernel.procs.allocate()?;
    let pid = kernel.procs.process(slot).pid;

    log::info!(
        "Creating kernel process with PID: {}, entry point: {}",
        pid,
        entry
    );

    let directory = match PageDirectory::new_user(mem, &mut kernel.frames, kernel.kernel_pd) {
        Ok(directory) => directory,
        Err(e) => {
            log::error!("Failed to create page directory for PID {}", pid);
            kernel.procs.release(slot);
            return Err(e);
        }
    };

    let process = kernel.procs.process_mut(slot);
    process.context.directory = directory;
    process.context.frame = StackState {
        eip: entry.as_u32(),
        cs: KERNEL_CS_SELECTOR,
        eflags: KERNEL_EFLAGS,
        esp: 0,
        ss: 0,
    };
    let frame = IretFrame::from_stack_state(&process.context.frame);
    process.kstack_depth = frame.push_kernel(&mut process.kstack, idle_return);

    process.state = ProcessState::Ready;
    kernel.procs.push_ready_front(slot);
    Ok(slot)
}

//! Syscall implementations: `printf`, `fork`, `exit`, `wait`
//!
//! `fork` is the heavyweight one: a full eager copy of the parent's user
//! address space, with the child resuming at the instruction after
//! `int 0x80` because its trap frame is copied byte-exact from the
//! parent's. Any mid-fork allocation failure tears the partially built
//! child back down; nothing leaks.

use crate::kernel::Kernel;
use crate::mm::paging::PageFlags;
use crate::mm::user::{copy_to_user, read_user_cstr};
use crate::mm::{PageDirectory, PhysAddr, PhysMemory, VirtAddr, FRAME_SIZE, KERNEL_PDT_IDX};
use crate::mm::PAGE_TABLE_ENTRIES;
use crate::process::creation::arm_user_resume;
use crate::process::pcb::ProcessState;
use crate::process::scheduler::schedule;
use crate::syscall::{SyscallArgs, SyscallResult, SYSCALL_ERROR};
use crate::trap::{TrapFrame, TrapOutcome};

/// `printf(fmt)`: write a NUL-terminated user string through the kernel
/// logger. No format-argument expansion happens in the kernel. Returns 1.
pub fn sys_printf(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    args: &SyscallArgs,
    _frame: &TrapFrame,
) -> SyscallResult {
    let directory = match kernel.procs.current_process() {
        Some(process) => process.context.directory,
        None => {
            log::error!("Printf called with no current process");
            return SyscallResult::Value(SYSCALL_ERROR);
        }
    };

    if args.arg1 == 0 {
        log::error!("Printf called with NULL format pointer");
        return SyscallResult::Value(SYSCALL_ERROR);
    }

    let mut buf = [0u8; 1024];
    match read_user_cstr(mem, directory, VirtAddr::new(args.arg1), &mut buf) {
        Ok(len) => {
            // Log the valid UTF-8 prefix; a user process feeding us garbage
            // does not get to corrupt the serial stream.
            let text = match core::str::from_utf8(&buf[..len]) {
                Ok(text) => text,
                Err(e) => core::str::from_utf8(&buf[..e.valid_up_to()]).unwrap_or(""),
            };
            log::info!("{}", text);
            SyscallResult::Value(1)
        }
        Err(_) => SyscallResult::Value(SYSCALL_ERROR),
    }
}

/// `fork()`: duplicate the calling process. Returns the child PID to the
/// parent and 0 to the child.
pub fn sys_fork(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    _args: &SyscallArgs,
    frame: &TrapFrame,
) -> SyscallResult {
    let (parent_pid, parent_dir) = match kernel.procs.current_process() {
        Some(process) => (process.pid, process.context.directory),
        None => {
            log::error!("Fork called with no current process");
            return SyscallResult::Value(SYSCALL_ERROR);
        }
    };

    log::info!("Fork called by PID {}", parent_pid);

    let child_slot = match kernel.procs.allocate() {
        Ok(slot) => slot,
        Err(_) => {
            log::error!("Failed to allocate PCB for fork");
            return SyscallResult::Value(SYSCALL_ERROR);
        }
    };
    let child_pid = kernel.procs.process(child_slot).pid;
    kernel.procs.process_mut(child_slot).parent_pid = parent_pid;

    let child_dir = match PageDirectory::new_user(mem, &mut kernel.frames, kernel.kernel_pd) {
        Ok(directory) => directory,
        Err(_) => {
            log::error!("Failed to create page directory for fork");
            kernel.procs.release(child_slot);
            return SyscallResult::Value(SYSCALL_ERROR);
        }
    };

    // Eagerly copy every present user page. On failure, the child directory
    // walk in `destroy` releases whatever was copied so far.
    for pde_index in 0..KERNEL_PDT_IDX {
        let pde = parent_dir.entry(mem, pde_index);
        if pde & PageFlags::PRESENT.bits() == 0 {
            continue;
        }
        let parent_table = PhysAddr::new(pde & !0xFFF);

        for pte_index in 0..PAGE_TABLE_ENTRIES {
            let pte = mem.read_u32(parent_table.offset((pte_index * 4) as u32));
            if pte & PageFlags::PRESENT.bits() == 0 {
                continue;
            }

            let virt = VirtAddr::new(((pde_index as u32) << 22) | ((pte_index as u32) << 12));
            let parent_frame = PhysAddr::new(pte & !0xFFF);

            let child_frame = match kernel.frames.alloc() {
                Some(frame) => frame,
                None => {
                    log::error!("Failed to allocate frame for child process");
                    child_dir.destroy(mem, &mut kernel.frames);
                    kernel.procs.release(child_slot);
                    return SyscallResult::Value(SYSCALL_ERROR);
                }
            };
            mem.copy(child_frame, parent_frame, FRAME_SIZE);

            let flags = PageFlags::from_bits_truncate(pte & 0xFFF);
            if let Err(e) = child_dir.map(mem, &mut kernel.frames, virt, child_frame, flags) {
                log::error!("Failed to map {} in child: {}", virt, e);
                kernel.frames.free(child_frame);
                child_dir.destroy(mem, &mut kernel.frames);
                kernel.procs.release(child_slot);
                return SyscallResult::Value(SYSCALL_ERROR);
            }
        }
    }

    // The child resumes from a byte-exact copy of the parent's trap frame,
    // with EAX forced to 0 so fork() reads 0 on its side.
    let child = kernel.procs.process_mut(child_slot);
    child.context.directory = child_dir;
    child.context.regs = frame.cpu;
    child.context.regs.eax = 0;
    child.context.frame = frame.stack;
    arm_user_resume(child);
    child.state = ProcessState::Ready;
    kernel.procs.push_ready_front(child_slot);

    log::info!(
        "Fork successful: parent PID {} -> child PID {}",
        parent_pid,
        child_pid
    );
    SyscallResult::Value(child_pid.0)
}

/// `exit(status)`: terminate the calling process and schedule away. Never
/// returns to the caller.
pub fn sys_exit(
    kernel: &mut Kernel,
    _mem: &mut dyn PhysMemory,
    args: &SyscallArgs,
    _frame: &TrapFrame,
) -> SyscallResult {
    let slot = match kernel.procs.current_slot() {
        Some(slot) => slot,
        None => {
            log::error!("Exit called with no current process");
            return SyscallResult::Value(SYSCALL_ERROR);
        }
    };

    let pid = kernel.procs.process(slot).pid;
    log::info!("Process {} exiting with status {}", pid, args.arg1 as i32);

    {
        let process = kernel.procs.process_mut(slot);
        process.exit_status = args.arg1 as i32;
        process.state = ProcessState::Terminated;
    }
    kernel.procs.set_current(None);

    match schedule(kernel) {
        Some(next) => SyscallResult::NoReturn(TrapOutcome::Switch(next)),
        None => SyscallResult::NoReturn(TrapOutcome::Idle),
    }
}

/// `wait(statusp)`: reap one terminated child. Non-blocking: returns the
/// child PID, or `-1` when no child has terminated yet.
pub fn sys_wait(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    args: &SyscallArgs,
    _frame: &TrapFrame,
) -> SyscallResult {
    let (parent_pid, parent_dir) = match kernel.procs.current_process() {
        Some(process) => (process.pid, process.context.directory),
        None => {
            log::error!("Wait called with no current process");
            return SyscallResult::Value(SYSCALL_ERROR);
        }
    };

    log::info!("Process {} waiting for child", parent_pid);

    let child_slot = match kernel.procs.zombie_child_of(parent_pid) {
        Some(slot) => slot,
        None => {
            log::warn!("No terminated children found");
            return SyscallResult::Value(SYSCALL_ERROR);
        }
    };

    let (child_pid, status) = {
        let child = kernel.procs.process(child_slot);
        (child.pid, child.exit_status)
    };

    if args.arg1 != 0 {
        if let Err(e) = copy_to_user(
            mem,
            &mut kernel.frames,
            parent_dir,
            VirtAddr::new(args.arg1),
            &status.to_le_bytes(),
        ) {
            log::error!("Failed to deliver exit status to {:#x}: {}", args.arg1, e);
            return SyscallResult::Value(SYSCALL_ERROR);
        }
    }

    log::info!(
        "Process {} reaped child {} with status {}",
        parent_pid,
        child_pid,
        status
    );

    // Give the child's whole address space back before dropping its
    // identity.
    let child_dir = kernel.procs.process(child_slot).context.directory;
    child_dir.destroy(mem, &mut kernel.frames);
    kernel.procs.release(child_slot);

    SyscallResult::Value(child_pid.0)
}

//! Round-robin scheduler
//!
//! The scheduler runs in two situations: from the timer interrupt (ring-3
//! code was preempted) and voluntarily after a state change (`exit`). It
//! always pops the ready-queue head; the timer path first saves the
//! preempted process's trap frame into its PCB and re-queues it at the
//! tail, so a lone runaway process cannot starve the rest of the table.

use crate::kernel::Kernel;
use crate::process::creation::arm_user_resume;
use crate::process::pcb::ProcessState;
use crate::trap::{TrapFrame, TrapOutcome};

/// Pick the next process to run. Returns the chosen PCB slot, or `None`
/// when the ready queue is empty (the caller keeps running or idles).
///
/// The caller-side switch loads CR3 and the saved registers and `iret`s
/// through the frame prepared on the process's kernel stack; it also points
/// TSS `esp0` at that stack so the next ring-3 trap lands there.
pub fn schedule(kernel: &mut Kernel) -> Option<usize> {
    if let Some(current) = kernel.procs.current_process() {
        log::debug!(
            "schedule() called. Current PID: {}. Ready head PID: {}",
            current.pid,
            kernel
                .procs
                .ready_head()
                .map(|s| kernel.procs.process(s).pid.0)
                .unwrap_or(0),
        );
    }

    let next = kernel.procs.pop_ready()?;
    {
        let process = kernel.procs.process_mut(next);
        process.state = ProcessState::Running;
    }
    kernel.procs.set_current(Some(next));

    let process = kernel.procs.process(next);
    log::debug!(
        "Switching to PID {} (cr3 {}, eip {:#x}, kernel stack depth {})",
        process.pid,
        process.context.directory.cr3(),
        process.context.frame.eip,
        process.kstack_depth,
    );
    Some(next)
}

/// Timer-driven scheduling entry.
///
/// Snapshots the interrupted process's registers and trap frame out of the
/// kernel-stack frame into its PCB, rebuilds its resume frame, re-queues it
/// at the tail, then switches to the new head. When nothing else is ready
/// the interrupted process just keeps running.
pub fn timer_tick(kernel: &mut Kernel, frame: &mut TrapFrame) -> TrapOutcome {
    if kernel.procs.ready_head().is_none() {
        return TrapOutcome::Continue;
    }

    if let Some(slot) = kernel.procs.current_slot() {
        let process = kernel.procs.process_mut(slot);
        if process.state == ProcessState::Running {
            process.context.regs = frame.cpu;
            process.context.frame = frame.stack;
            arm_user_resume(process);
            process.state = ProcessState::Ready;
            kernel.procs.push_ready_back(slot);
            kernel.procs.set_current(None);
        }
    }

    match schedule(kernel) {
        Some(slot) => TrapOutcome::Switch(slot),
        None => TrapOutcome::Continue,
    }
}

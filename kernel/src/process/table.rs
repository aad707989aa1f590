//! Process table and ready queue
//!
//! A fixed slab of [`MAX_PROCESSES`] PCBs. The ready queue is singly linked
//! through `next_ready` slab indices: process creation and fork prepend
//! (LIFO), the timer re-queues the preempted process at the tail, and the
//! scheduler always pops the head.
//!
//! PIDs come from a monotonic counter starting at 1 and are never reused
//! within a run; slots are.

use crate::error::{KernelError, KernelResult};
use crate::process::pcb::{Pid, Process, ProcessState, KSTACK_FILL, MAX_PROCESSES};

pub struct ProcessTable {
    slots: [Process; MAX_PROCESSES],
    next_pid: u32,
    ready_head: Option<usize>,
    current: Option<usize>,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { Process::free() }; MAX_PROCESSES],
            next_pid: 1,
            ready_head: None,
            current: None,
        }
    }

    /// Claim the first FREE slot: assign the next PID, zero the context and
    /// paint the kernel stack with the debug fill byte.
    pub fn allocate(&mut self) -> KernelResult<usize> {
        for (slot, process) in self.slots.iter_mut().enumerate() {
            if process.state == ProcessState::Free {
                let pid = Pid(self.next_pid);
                self.next_pid += 1;

                process.pid = pid;
                process.parent_pid = Pid::NONE;
                process.context = crate::process::pcb::Context::zeroed();
                process.kstack.0.fill(KSTACK_FILL);
                process.kstack_depth = 0;
                process.next_ready = None;
                process.exit_status = 0;
                return Ok(slot);
            }
        }
        log::error!("No free PCBs available!");
        Err(KernelError::ResourceExhausted { resource: "process table" })
    }

    /// Return a slot to the FREE state, dropping its identity.
    pub fn release(&mut self, slot: usize) {
        let process = &mut self.slots[slot];
        process.state = ProcessState::Free;
        process.pid = Pid::NONE;
        process.parent_pid = Pid::NONE;
        process.next_ready = None;
    }

    pub fn process(&self, slot: usize) -> &Process {
        &self.slots[slot]
    }

    pub fn process_mut(&mut self, slot: usize) -> &mut Process {
        &mut self.slots[slot]
    }

    pub fn current_slot(&self) -> Option<usize> {
        self.current
    }

    pub fn set_current(&mut self, slot: Option<usize>) {
        self.current = slot;
    }

    pub fn current_process(&self) -> Option<&Process> {
        self.current.map(|slot| &self.slots[slot])
    }

    pub fn current_process_mut(&mut self) -> Option<&mut Process> {
        let slot = self.current?;
        Some(&mut self.slots[slot])
    }

    /// Prepend to the ready queue (new arrivals from create/fork).
    pub fn push_ready_front(&mut self, slot: usize) {
        self.slots[slot].next_ready = self.ready_head;
        self.ready_head = Some(slot);
    }

    /// Append to the ready queue (the preempted process goes behind
    /// everything already waiting).
    pub fn push_ready_back(&mut self, slot: usize) {
        self.slots[slot].next_ready = None;
        match self.ready_head {
            None => self.ready_head = Some(slot),
            Some(head) => {
                let mut tail = head;
                while let Some(next) = self.slots[tail].next_ready {
                    tail = next;
                }
                self.slots[tail].next_ready = Some(slot);
            }
        }
    }

    /// Pop the ready-queue head.
    pub fn pop_ready(&mut self) -> Option<usize> {
        let head = self.ready_head?;
        self.ready_head = self.slots[head].next_ready.take();
        Some(head)
    }

    pub fn ready_head(&self) -> Option<usize> {
        self.ready_head
    }

    /// First TERMINATED child of `parent`, if any.
    pub fn zombie_child_of(&self, parent: Pid) -> Option<usize> {
        self.slots.iter().position(|p| {
            p.state == ProcessState::Terminated && p.parent_pid == parent
        })
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<usize> {
        if pid.is_none() {
            return None;
        }
        self.slots.iter().position(|p| p.pid == pid)
    }

    /// Number of slots not in the FREE state.
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|p| p.state != ProcessState::Free)
            .count()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

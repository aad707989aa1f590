//! End-to-end process and syscall scenarios: the trap frames hardware
//! would push are fabricated by the harness, everything downstream of the
//! entry stubs is the real kernel.

mod common;

use common::*;
use onyx_kernel::mm::{
    BufferMemory, PhysAddr, PhysMemory, VirtAddr, FRAME_SIZE, KERNEL_PDT_IDX,
    PAGE_DIRECTORY_ENTRIES, USER_CODE_START, USER_STACK_TOP,
};
use onyx_kernel::process::{create_process, schedule, Pid, ProcessState};
use onyx_kernel::syscall::{SYS_EXIT, SYS_FORK, SYS_PRINTF, SYS_WAIT, SYSCALL_ERROR};
use onyx_kernel::trap::{CpuState, TrapOutcome};
use onyx_kernel::Kernel;

/// A fake flat program image: 0x90 filler with a string constant embedded
/// at a known offset, the way a real image carries its rodata.
const GREETING_OFFSET: u32 = 0x100;
const GREETING: &[u8] = b"hi\0";

fn load_program(kernel: &mut Kernel, mem: &mut BufferMemory) -> usize {
    let mut image = vec![0x90u8; 0x200];
    image[GREETING_OFFSET as usize..GREETING_OFFSET as usize + GREETING.len()]
        .copy_from_slice(GREETING);
    mem.write(PhysAddr::new(MODULE_BASE), &image);

    let slot = create_process(kernel, mem, PhysAddr::new(MODULE_BASE), image.len() as u32)
        .expect("create_process failed");
    let chosen = schedule(kernel).expect("fresh process not schedulable");
    assert_eq!(chosen, slot);
    slot
}

#[test]
fn printf_then_exit_runs_to_idle() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);
    let slot = load_program(&mut kernel, &mut mem);

    // printf(&greeting) -> returns 1 in EAX.
    let mut frame = syscall_frame(
        USER_CODE_START + 4,
        USER_STACK_TOP,
        syscall_regs(SYS_PRINTF, USER_CODE_START + GREETING_OFFSET),
    );
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Continue);
    assert_eq!(frame.cpu.eax, 1, "printf return value lands in EAX");

    // printf(NULL) -> -1.
    let mut frame = syscall_frame(
        USER_CODE_START + 8,
        USER_STACK_TOP,
        syscall_regs(SYS_PRINTF, 0),
    );
    kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(frame.cpu.eax, SYSCALL_ERROR);

    // exit(7): nothing else runnable, the scheduler idles.
    let mut frame = syscall_frame(
        USER_CODE_START + 12,
        USER_STACK_TOP,
        syscall_regs(SYS_EXIT, 7),
    );
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Idle);

    let process = kernel.procs.process(slot);
    assert_eq!(process.state, ProcessState::Terminated);
    assert_eq!(process.exit_status, 7);
    assert_eq!(kernel.procs.current_slot(), None);
}

#[test]
fn unknown_syscall_returns_the_sentinel() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);
    load_program(&mut kernel, &mut mem);

    let mut frame = syscall_frame(USER_CODE_START, USER_STACK_TOP, syscall_regs(99, 0));
    let before = kernel.frames.free_frames();
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));

    assert_eq!(outcome, TrapOutcome::Continue);
    assert_eq!(frame.cpu.eax, 0xFFFF_FFFF);
    // No state change beyond the EAX sentinel.
    assert_eq!(kernel.frames.free_frames(), before);
}

#[test]
fn first_stack_touch_demand_pages_one_zeroed_frame() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);
    let slot = load_program(&mut kernel, &mut mem);
    let directory = kernel.procs.process(slot).context.directory;

    let touch = VirtAddr::new(0xBFFF_EFFF);
    assert!(directory.translate(&mem, touch).is_none());

    // Write fault from ring 3 on a not-present page: error code W|U.
    let before = kernel.frames.free_frames();
    let mut frame = page_fault_frame(USER_CODE_START, 0x6);
    let outcome = kernel.handle_trap(&mut mem, &mut frame, touch);
    assert_eq!(outcome, TrapOutcome::Continue, "fault resolves, instruction restarts");
    assert_eq!(kernel.frames.free_frames(), before - 1, "exactly one frame used");

    // The whole page at 0xBFFF_E000 is mapped and zero-filled.
    let page = VirtAddr::new(0xBFFF_E000);
    let phys = directory.translate(&mem, page).expect("stack page not mapped");
    assert!(phys.is_frame_aligned());
    for offset in (0..FRAME_SIZE as u32).step_by(512) {
        assert_eq!(mem.read_u32(phys.offset(offset)), 0);
    }

    // A second fault in the same page does not occur; a touch of the next
    // page down maps another frame.
    let mut frame = page_fault_frame(USER_CODE_START, 0x6);
    kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0xBFFF_DFFF));
    assert_eq!(kernel.frames.free_frames(), before - 2);
}

#[test]
fn kernel_space_fault_is_fatal() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);
    load_program(&mut kernel, &mut mem);

    let mut frame = page_fault_frame(USER_CODE_START, 0x0);
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0xC010_0000));
    assert_eq!(outcome, TrapOutcome::Halt);
}

#[test]
fn fault_with_no_current_process_is_fatal() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);

    let mut frame = page_fault_frame(0, 0x6);
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0x1000));
    assert_eq!(outcome, TrapOutcome::Halt);
}

#[test]
fn fork_copies_and_isolates_the_address_space() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);
    let parent_slot = load_program(&mut kernel, &mut mem);
    let parent_dir = kernel.procs.process(parent_slot).context.directory;

    // Give the parent a demand-paged stack page with a known value in it.
    let mut frame = page_fault_frame(USER_CODE_START, 0x6);
    kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(USER_STACK_TOP - 4));
    let stack_page = VirtAddr::new(USER_STACK_TOP - 4);
    let parent_stack = parent_dir.translate(&mem, stack_page).unwrap();
    mem.write_u32(parent_stack, 0x1234_5678);

    // fork() from EIP just past the int 0x80.
    let fork_eip = USER_CODE_START + 0x42;
    let mut regs = syscall_regs(SYS_FORK, 0);
    regs.ecx = 0xAAAA_BBBB;
    let mut frame = syscall_frame(fork_eip, USER_STACK_TOP - 4, regs);
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Continue);

    let child_pid = frame.cpu.eax;
    assert_eq!(child_pid, 2, "parent sees the child PID");
    let child_slot = kernel.procs.find_by_pid(Pid(child_pid)).unwrap();
    let child = kernel.procs.process(child_slot);
    let child_dir = child.context.directory;

    // Child resumes at the same EIP with EAX forced to 0 and the rest of
    // the registers copied.
    assert_eq!(child.state, ProcessState::Ready);
    assert_eq!(child.parent_pid, Pid(1));
    assert_eq!(child.context.frame.eip, fork_eip);
    assert_eq!(child.context.frame.esp, USER_STACK_TOP - 4);
    assert_eq!(child.context.regs.eax, 0);
    assert_eq!(child.context.regs.ecx, 0xAAAA_BBBB);

    // Every mapped parent page was copied to a distinct frame.
    let child_stack = child_dir.translate(&mem, stack_page).unwrap();
    assert_ne!(child_stack, parent_stack);
    assert_eq!(mem.read_u32(child_stack), 0x1234_5678);

    // Kernel top half is shared identically.
    for i in KERNEL_PDT_IDX..PAGE_DIRECTORY_ENTRIES {
        assert_eq!(child_dir.entry(&mem, i), parent_dir.entry(&mem, i));
    }

    // Full-copy semantics: parent writes stay invisible to the child.
    mem.write_u32(parent_stack, 0xDEAD_0001);
    assert_eq!(mem.read_u32(child_stack), 0x1234_5678);
}

#[test]
fn fork_then_wait_round_trips_the_exit_status() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);
    let parent_slot = load_program(&mut kernel, &mut mem);

    // Parent forks.
    let fork_eip = USER_CODE_START + 0x10;
    let mut frame = syscall_frame(fork_eip, USER_STACK_TOP, syscall_regs(SYS_FORK, 0));
    kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    let child_slot = kernel.procs.find_by_pid(Pid(2)).unwrap();

    // wait() before the child exits is non-blocking and fails.
    let mut frame = syscall_frame(fork_eip, USER_STACK_TOP, syscall_regs(SYS_WAIT, 0));
    kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(frame.cpu.eax, SYSCALL_ERROR);

    // Timer tick: the parent is re-queued behind the child, the child
    // runs ("child" precedes "parent").
    let mut frame = tick_frame(fork_eip, USER_STACK_TOP, CpuState::default());
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Switch(child_slot));
    assert_eq!(kernel.procs.current_slot(), Some(child_slot));
    assert_eq!(
        kernel.procs.process(parent_slot).state,
        ProcessState::Ready,
        "preempted parent is back on the ready queue"
    );

    // Child exits 42; the scheduler switches straight back to the parent.
    let frames_before_reap = kernel.frames.free_frames();
    let mut frame = syscall_frame(fork_eip, USER_STACK_TOP, syscall_regs(SYS_EXIT, 42));
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Switch(parent_slot));
    assert_eq!(kernel.procs.process(child_slot).state, ProcessState::Terminated);

    // Parent waits: status written through the user pointer, child PID
    // returned, child PCB freed, child frames reclaimed.
    let status_ptr = USER_STACK_TOP - 0x20;
    let mut frame = syscall_frame(fork_eip, USER_STACK_TOP, syscall_regs(SYS_WAIT, status_ptr));
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Continue);
    assert_eq!(frame.cpu.eax, 2, "wait returns the reaped child PID");

    let parent_dir = kernel.procs.process(parent_slot).context.directory;
    let status_phys = parent_dir
        .translate(&mem, VirtAddr::new(status_ptr))
        .expect("status page not materialised");
    assert_eq!(mem.read_u32(status_phys) as i32, 42);

    assert_eq!(kernel.procs.process(child_slot).state, ProcessState::Free);
    assert_eq!(kernel.procs.process(child_slot).pid, Pid::NONE);
    assert!(
        kernel.frames.free_frames() > frames_before_reap,
        "the child's frames went back to the allocator"
    );

    // A second wait finds no children.
    let mut frame = syscall_frame(fork_eip, USER_STACK_TOP, syscall_regs(SYS_WAIT, 0));
    kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(frame.cpu.eax, SYSCALL_ERROR);
}

#[test]
fn preemption_saves_and_restores_the_interrupted_context() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);
    let parent_slot = load_program(&mut kernel, &mut mem);

    // Fork so two processes compete for the CPU.
    let mut frame = syscall_frame(USER_CODE_START, USER_STACK_TOP, syscall_regs(SYS_FORK, 0));
    kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    let child_slot = kernel.procs.find_by_pid(Pid(2)).unwrap();

    // Tick while the parent runs at a distinctive register state.
    let regs = CpuState {
        eax: 0x11,
        ebx: 0x22,
        ecx: 0x33,
        edx: 0x44,
        esi: 0x55,
        edi: 0x66,
        ebp: 0x77,
        esp: 0,
    };
    let mut frame = tick_frame(USER_CODE_START + 0x80, USER_STACK_TOP - 8, regs);
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Switch(child_slot));

    // The parent's PCB now holds the interrupted state, armed for resume.
    let parent = kernel.procs.process(parent_slot);
    assert_eq!(parent.context.regs, regs);
    assert_eq!(parent.context.frame.eip, USER_CODE_START + 0x80);
    assert_eq!(parent.context.frame.esp, USER_STACK_TOP - 8);
    assert_eq!(parent.kstack_depth, 20);
    // The iret frame on its kernel stack resumes at the interrupted EIP.
    assert_eq!(parent.kstack.read_word(20), USER_CODE_START + 0x80);

    // Next tick rotates back: child re-queued, parent chosen again.
    let mut frame = tick_frame(USER_CODE_START, USER_STACK_TOP, CpuState::default());
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Switch(parent_slot));
    assert_eq!(kernel.procs.process(child_slot).state, ProcessState::Ready);
}

#[test]
fn tick_with_empty_queue_keeps_the_current_process() {
    let mut ram = fresh_ram();
    let mut mem = BufferMemory::new(&mut ram);
    let mut kernel = boot_kernel(&mut mem);
    let slot = load_program(&mut kernel, &mut mem);

    let mut frame = tick_frame(USER_CODE_START, USER_STACK_TOP, CpuState::default());
    let outcome = kernel.handle_trap(&mut mem, &mut frame, VirtAddr::new(0));
    assert_eq!(outcome, TrapOutcome::Continue);
    assert_eq!(kernel.procs.current_slot(), Some(slot));
    assert_eq!(kernel.procs.process(slot).state, ProcessState::Running);
}

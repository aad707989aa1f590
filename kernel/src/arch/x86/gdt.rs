//! Global descriptor table and TSS
//!
//! Six descriptors: null, kernel code/data, user code/data, TSS. Flat
//! 4 GiB segments; the only job the TSS does is carry `esp0`, the kernel
//! stack adopted on ring-3 -> ring-0 transitions.

use core::arch::asm;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::process::pcb::{KERNEL_DS_SELECTOR, TSS_SELECTOR};

pub const GDT_ENTRIES: usize = 6;

const NULL_INDEX: usize = 0;
const CODE_INDEX: usize = 1;
const DATA_INDEX: usize = 2;
const USER_CODE_INDEX: usize = 3;
const USER_DATA_INDEX: usize = 4;
const TSS_INDEX: usize = 5;

const ACCESS_PRESENT: u8 = 0x80;
const ACCESS_RING0: u8 = 0x00;
const ACCESS_RING3: u8 = 0x60;
/// Code/data (non-system) descriptor.
const ACCESS_SEGMENT: u8 = 0x10;
const ACCESS_EXECUTABLE: u8 = 0x08;
/// Bit 1 of the access byte: "readable" for code segments, "writable" for
/// data segments. Same bit, two meanings, two names.
const ACCESS_READABLE: u8 = 0x02;
const ACCESS_WRITABLE: u8 = ACCESS_READABLE;
/// 32-bit available TSS.
const ACCESS_TSS: u8 = 0x89;

const GRAN_4KB: u8 = 0x80;
const GRAN_32BIT: u8 = 0x40;

#[derive(Debug, Clone, Copy, Default)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn new(base: u32, limit: u32, access: u8, gran: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_middle: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (gran & 0xF0),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// 32-bit task state segment. Only `ss0`/`esp0` and the I/O map base are
/// ever non-zero.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct TaskStateSegment {
    prev_task: u32,
    esp0: u32,
    ss0: u32,
    unused: [u32; 22],
    iomap_base: u16,
    reserved: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            prev_task: 0,
            esp0: 0,
            ss0: KERNEL_DS_SELECTOR,
            unused: [0; 22],
            iomap_base: core::mem::size_of::<TaskStateSegment>() as u16,
            reserved: 0,
        }
    }
}

static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());

lazy_static! {
    static ref GDT: [GdtEntry; GDT_ENTRIES] = {
        let flat = 0xFFFF_FFFF;
        let gran = GRAN_4KB | GRAN_32BIT;
        let tss_base = {
            let guard = TSS.lock();
            &*guard as *const TaskStateSegment as u32
        };
        let tss_limit = core::mem::size_of::<TaskStateSegment>() as u32 - 1;

        let mut gdt = [GdtEntry::new(0, 0, 0, 0); GDT_ENTRIES];
        gdt[NULL_INDEX] = GdtEntry::new(0, 0, 0, 0);
        gdt[CODE_INDEX] = GdtEntry::new(
            0,
            flat,
            ACCESS_PRESENT | ACCESS_RING0 | ACCESS_SEGMENT | ACCESS_EXECUTABLE | ACCESS_READABLE,
            gran,
        );
        gdt[DATA_INDEX] = GdtEntry::new(
            0,
            flat,
            ACCESS_PRESENT | ACCESS_RING0 | ACCESS_SEGMENT | ACCESS_WRITABLE,
            gran,
        );
        gdt[USER_CODE_INDEX] = GdtEntry::new(
            0,
            flat,
            ACCESS_PRESENT | ACCESS_RING3 | ACCESS_SEGMENT | ACCESS_EXECUTABLE | ACCESS_READABLE,
            gran,
        );
        gdt[USER_DATA_INDEX] = GdtEntry::new(
            0,
            flat,
            ACCESS_PRESENT | ACCESS_RING3 | ACCESS_SEGMENT | ACCESS_WRITABLE,
            gran,
        );
        // Byte granularity; the TSS limit is its size.
        gdt[TSS_INDEX] = GdtEntry::new(tss_base, tss_limit, ACCESS_TSS, 0x00);
        gdt
    };
}

/// Load the GDT, reload the segment registers, and load the task register.
pub fn init() {
    log::info!("Initializing GDT with {} entries", GDT_ENTRIES);

    let pointer = GdtPointer {
        limit: (core::mem::size_of::<GdtEntry>() * GDT_ENTRIES - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    // SAFETY: the pointer references the lazily initialized static GDT,
    // which lives for the whole kernel run. The far jump reloads CS with
    // the kernel code selector defined in that same table.
    unsafe {
        asm!(
            "lgdt [{ptr}]",
            "mov ax, 0x10",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            // Far return reloads CS; intel-syntax stand-in for ljmp.
            "push 0x08",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            ptr = in(reg) &pointer as *const GdtPointer,
            out("eax") _,
        );
        asm!("ltr ax", in("ax") TSS_SELECTOR as u16);
    }

    log::info!("GDT initialized");
}

/// Point TSS `esp0` at the given kernel stack top. Called on every context
/// switch so the next ring-3 trap lands on the incoming process's stack.
pub fn tss_set_kernel_stack(stack_top: u32) {
    TSS.lock().esp0 = stack_top;
}

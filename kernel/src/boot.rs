//! Multiboot boot protocol
//!
//! The entry glue hands over the multiboot magic and the physical address
//! of the info structure. Everything the structure points at is physical
//! and is read through [`PhysMemory`], never dereferenced raw. Module 0 is
//! the initial user program (a flat image entered at offset 0); modules
//! with an index >= 1 that carry a command line are probed as initrd
//! candidates.

use crate::error::{KernelError, KernelResult};
use crate::fs::Initrd;
use crate::kernel::Kernel;
use crate::mm::{PhysAddr, PhysMemory};
use crate::process::create_process;

/// Magic the boot loader leaves in EAX.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// `flags` bit: the module fields are valid.
pub const MULTIBOOT_INFO_MODS: u32 = 1 << 3;

/// Byte offsets into the multiboot info structure.
mod info_field {
    pub const FLAGS: u32 = 0;
    pub const MODS_COUNT: u32 = 20;
    pub const MODS_ADDR: u32 = 24;
}

/// Byte offsets into one entry of the module list (16 bytes per entry).
mod module_field {
    pub const MOD_START: u32 = 0;
    pub const MOD_END: u32 = 4;
    pub const CMDLINE: u32 = 8;
    pub const ENTRY_SIZE: u32 = 16;
}

/// The multiboot info fields this kernel consults.
#[derive(Debug, Clone, Copy)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mods_count: u32,
    pub mods_addr: PhysAddr,
}

impl MultibootInfo {
    pub fn read(mem: &dyn PhysMemory, at: PhysAddr) -> Self {
        Self {
            flags: mem.read_u32(at.offset(info_field::FLAGS)),
            mods_count: mem.read_u32(at.offset(info_field::MODS_COUNT)),
            mods_addr: PhysAddr::new(mem.read_u32(at.offset(info_field::MODS_ADDR))),
        }
    }

    pub const fn has_modules(&self) -> bool {
        self.flags & MULTIBOOT_INFO_MODS != 0
    }
}

/// One boot module: a physical byte range plus an optional command line.
#[derive(Debug, Clone, Copy)]
pub struct BootModule {
    pub start: PhysAddr,
    pub end: PhysAddr,
    pub cmdline: PhysAddr,
}

impl BootModule {
    pub fn read(mem: &dyn PhysMemory, list: PhysAddr, index: u32) -> Self {
        let at = list.offset(index * module_field::ENTRY_SIZE);
        Self {
            start: PhysAddr::new(mem.read_u32(at.offset(module_field::MOD_START))),
            end: PhysAddr::new(mem.read_u32(at.offset(module_field::MOD_END))),
            cmdline: PhysAddr::new(mem.read_u32(at.offset(module_field::CMDLINE))),
        }
    }

    pub const fn size(&self) -> u32 {
        self.end.as_u32() - self.start.as_u32()
    }
}

/// Portable part of kernel main: validate the boot magic, walk the module
/// list, start the initial user process and mount the initrd. The caller
/// (arch entry) then enables interrupts and enters the scheduler.
pub fn kmain(
    kernel: &mut Kernel,
    mem: &mut dyn PhysMemory,
    magic: u32,
    mbinfo: PhysAddr,
) -> KernelResult<()> {
    log::info!("Kernel starting...");

    if magic != MULTIBOOT_BOOTLOADER_MAGIC {
        log::error!("Invalid magic number: {:#x}", magic);
        return Err(KernelError::BadBootData { what: "multiboot magic" });
    }

    let info = MultibootInfo::read(mem, mbinfo);
    if info.mods_count == 0 {
        log::info!("No modules found to load");
        return Ok(());
    }
    if !info.has_modules() {
        log::error!("Module information not available in multiboot structure");
        return Err(KernelError::BadBootData { what: "multiboot module flag" });
    }

    log::info!("Modules found: {}", info.mods_count);

    for index in 0..info.mods_count {
        let module = BootModule::read(mem, info.mods_addr, index);
        log::info!(
            "Module {} at {}..{} (size: {} bytes)",
            index,
            module.start,
            module.end,
            module.size()
        );

        if index == 0 {
            match create_process(kernel, mem, module.start, module.size()) {
                Ok(slot) => {
                    let pid = kernel.procs.process(slot).pid;
                    log::info!("Created user process with PID: {} to run module", pid);
                }
                Err(e) => log::error!("Failed to create process for module: {}", e),
            }
        } else if module.cmdline.as_u32() != 0 {
            log::info!("Found initrd module at index {}", index);
            match Initrd::probe(mem, module.start) {
                Ok(initrd) => {
                    log::info!("Successfully mounted initrd filesystem at /");
                    for entry in initrd.files() {
                        log::info!("  {}", entry.name());
                    }
                    kernel.initrd = Some(initrd);
                }
                Err(e) => log::error!("Failed to mount initrd filesystem: {}", e),
            }
        }
    }

    Ok(())
}

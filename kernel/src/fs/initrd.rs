//! Initial ramdisk
//!
//! A read-only, in-memory archive handed over as a boot module. Layout:
//!
//! ```text
//! offset  size   field
//! 0       6      signature "INITRD"
//! 6       2      reserved (0)
//! 8       4      magic = 0xBF
//! 12      4      num_files (<= 64)
//! 16      64*48  file table: name[32], size u32, offset u32,
//!                type u32 (0 = file, 1 = dir), permissions u32
//! ...            file bodies at data_base + entry.offset
//! ```
//!
//! When the signature is missing the first 64 bytes are scanned for the
//! magic word; debug builds additionally synthesise a single-file archive
//! so the filesystem path stays exercisable without a prepared image.

use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};
use crate::mm::{PhysAddr, PhysMemory};

pub const INITRD_SIGNATURE: &[u8; 6] = b"INITRD";
pub const INITRD_MAGIC: u32 = 0xBF;
pub const MAX_FILES: usize = 64;
pub const MAX_NAME_LEN: usize = 32;

/// Bytes from the start of the header (magic) to the first file body.
/// The header embeds the full 64-entry table regardless of `num_files`.
const HEADER_SIZE: u32 = 8 + (MAX_FILES as u32) * FILE_ENTRY_SIZE;
/// name[32] + size + offset + type + permissions.
const FILE_ENTRY_SIZE: u32 = 48;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilePermissions: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXEC = 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Unknown(u32),
}

impl From<u32> for FileType {
    fn from(raw: u32) -> Self {
        match raw {
            0 => FileType::File,
            1 => FileType::Directory,
            other => FileType::Unknown(other),
        }
    }
}

/// One file-table entry.
#[derive(Debug, Clone, Copy)]
pub struct FileEntry {
    name: [u8; MAX_NAME_LEN],
    pub size: u32,
    pub offset: u32,
    pub file_type: FileType,
    pub permissions: FilePermissions,
}

impl FileEntry {
    const fn empty() -> Self {
        Self {
            name: [0; MAX_NAME_LEN],
            size: 0,
            offset: 0,
            file_type: FileType::File,
            permissions: FilePermissions::empty(),
        }
    }

    /// The NUL-terminated name as a string slice.
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

/// Parsed initrd: the file table plus the physical base of the body data.
pub struct Initrd {
    files: [FileEntry; MAX_FILES],
    num_files: u32,
    data_base: PhysAddr,
    /// Debug-build stand-in contents when no archive was found.
    #[cfg(debug_assertions)]
    synthesised: Option<&'static [u8]>,
}

impl Initrd {
    /// Probe `location` for an initrd archive and parse its file table.
    pub fn probe(mem: &dyn PhysMemory, location: PhysAddr) -> KernelResult<Self> {
        let mut signature = [0u8; 6];
        mem.read(location, &mut signature);

        let header = if &signature == INITRD_SIGNATURE {
            log::info!("INITRD signature found at the beginning of module");
            Some(location.offset(8))
        } else {
            // Tolerate images with leading padding: scan for the bare magic.
            (0..64u32).find_map(|i| {
                (mem.read_u32(location.offset(i)) == INITRD_MAGIC).then(|| {
                    log::info!("Found initrd magic at offset {}", i);
                    location.offset(i)
                })
            })
        };

        let header = match header {
            Some(header) => header,
            None => return Self::missing(),
        };

        if mem.read_u32(header) != INITRD_MAGIC {
            return Err(KernelError::BadImage { what: "initrd magic mismatch" });
        }

        let num_files = mem.read_u32(header.offset(4));
        if num_files as usize > MAX_FILES {
            return Err(KernelError::BadImage { what: "initrd file count exceeds table" });
        }

        let mut files = [FileEntry::empty(); MAX_FILES];
        for (i, entry) in files.iter_mut().enumerate().take(num_files as usize) {
            let at = header.offset(8 + i as u32 * FILE_ENTRY_SIZE);
            mem.read(at, &mut entry.name);
            entry.size = mem.read_u32(at.offset(32));
            entry.offset = mem.read_u32(at.offset(36));
            entry.file_type = FileType::from(mem.read_u32(at.offset(40)));
            entry.permissions =
                FilePermissions::from_bits_truncate(mem.read_u32(at.offset(44)));
            log::debug!(
                "File {}: {} (size: {} bytes, offset: {:#x})",
                i,
                entry.name(),
                entry.size,
                entry.offset
            );
        }

        log::info!("Initialized initrd with {} files", num_files);
        Ok(Self {
            files,
            num_files,
            data_base: header.offset(HEADER_SIZE),
            #[cfg(debug_assertions)]
            synthesised: None,
        })
    }

    /// No archive present. Debug builds synthesise a stand-in; release
    /// builds report the module as unusable.
    #[cfg(debug_assertions)]
    fn missing() -> KernelResult<Self> {
        log::warn!("No valid initrd found, creating a temporary one for testing");
        Ok(Self::synthesise())
    }

    #[cfg(not(debug_assertions))]
    fn missing() -> KernelResult<Self> {
        Err(KernelError::BadImage { what: "no initrd signature or magic" })
    }

    #[cfg(debug_assertions)]
    fn synthesise() -> Self {
        static CONTENTS: &[u8] = b"This is a test file created in memory.";

        let mut files = [FileEntry::empty(); MAX_FILES];
        files[0].name[..8].copy_from_slice(b"test.txt");
        files[0].size = CONTENTS.len() as u32;
        files[0].file_type = FileType::File;
        files[0].permissions = FilePermissions::READ;

        log::info!("Created temporary initrd with 1 files");
        Self {
            files,
            num_files: 1,
            data_base: PhysAddr::new(0),
            synthesised: Some(CONTENTS),
        }
    }

    pub fn num_files(&self) -> usize {
        self.num_files as usize
    }

    /// Iterate the file table.
    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.iter().take(self.num_files as usize)
    }

    /// Look a file up by path; a single leading `/` is tolerated.
    pub fn find(&self, path: &str) -> Option<&FileEntry> {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.files().find(|entry| entry.name() == path)
    }

    /// Read up to `buf.len()` bytes of `entry` starting at `position`.
    /// Returns the number of bytes read; 0 past the end of the file.
    pub fn read(
        &self,
        mem: &dyn PhysMemory,
        entry: &FileEntry,
        position: u32,
        buf: &mut [u8],
    ) -> KernelResult<usize> {
        if position >= entry.size {
            return Ok(0);
        }
        let remaining = (entry.size - position) as usize;
        let to_read = remaining.min(buf.len());

        #[cfg(debug_assertions)]
        if let Some(contents) = self.synthesised {
            let start = (entry.offset + position) as usize;
            buf[..to_read].copy_from_slice(&contents[start..start + to_read]);
            return Ok(to_read);
        }

        mem.read(
            self.data_base.offset(entry.offset + position),
            &mut buf[..to_read],
        );
        Ok(to_read)
    }
}

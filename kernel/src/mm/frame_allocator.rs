//! Physical frame allocator
//!
//! A dense bitmap over a fixed 128 MiB RAM window, one bit per 4 KiB frame
//! (`1` = allocated). Allocation is a linear first-fit scan; with at most
//! 32768 frames and allocations happening only on page faults, process
//! creation and fork, the scan cost is irrelevant next to the simplicity.
//!
//! Frames below the kernel image and the frames of the image itself
//! (including this allocator's own storage in kernel `.bss`) are permanently
//! reserved at init and never handed out.

use crate::mm::addr::{KernelWindow, PhysAddr};
use crate::mm::{FRAME_SIZE, TOTAL_FRAMES, TOTAL_PHYSICAL_MEMORY};

const BITS_PER_WORD: usize = 32;
const BITMAP_WORDS: usize = TOTAL_FRAMES / BITS_PER_WORD;

/// Bitmap allocator over the physical RAM window.
pub struct FrameAllocator {
    /// One bit per frame, `1` = allocated.
    bitmap: [u32; BITMAP_WORDS],
    total_frames: usize,
}

impl FrameAllocator {
    /// Build the allocator and reserve the low-memory and kernel-image
    /// frames described by `window`.
    pub fn init(window: &KernelWindow) -> Self {
        log::info!("Initializing page frame allocator");

        let mut allocator = Self {
            bitmap: [0; BITMAP_WORDS],
            total_frames: TOTAL_FRAMES,
        };

        let kernel_start_frame = window.phys_start.frame_index();
        let kernel_end_frame = window.phys_end.align_up().frame_index();

        log::debug!(
            "Physical memory: {} MB total, kernel image {}..{} ({} KB)",
            TOTAL_PHYSICAL_MEMORY / (1024 * 1024),
            window.phys_start,
            window.phys_end,
            (window.phys_end.as_u32() - window.phys_start.as_u32()) / 1024,
        );
        log::debug!(
            "Frames: {} total, {} reserved below kernel, {} reserved for kernel image",
            TOTAL_FRAMES,
            kernel_start_frame,
            kernel_end_frame - kernel_start_frame,
        );

        // Everything below the kernel image stays untouchable (BIOS data,
        // real-mode IVT, boot loader leftovers), as does the image itself.
        for frame in 0..kernel_end_frame {
            allocator.set_bit(frame);
        }

        log::info!("Page frame allocator initialized");
        allocator
    }

    /// Allocate one frame; returns its physical base address, or `None` when
    /// physical memory is exhausted. First-fit: the lowest free frame wins,
    /// with fully allocated bitmap words skipped whole.
    pub fn alloc(&mut self) -> Option<PhysAddr> {
        for word_index in 0..BITMAP_WORDS {
            let word = self.bitmap[word_index];
            if word == u32::MAX {
                continue;
            }
            let bit = word.trailing_ones() as usize;
            let frame = word_index * BITS_PER_WORD + bit;
            if frame >= self.total_frames {
                break;
            }
            self.bitmap[word_index] |= 1 << bit;
            return Some(PhysAddr::new((frame * FRAME_SIZE) as u32));
        }
        None
    }

    /// Release a frame. Out-of-range addresses are ignored.
    pub fn free(&mut self, addr: PhysAddr) {
        let frame = addr.frame_index();
        if frame < self.total_frames {
            self.clear_bit(frame);
        }
    }

    /// Whether the frame containing `addr` is allocated. Out-of-range
    /// addresses report `true`: they are never free for use.
    pub fn is_allocated(&self, addr: PhysAddr) -> bool {
        let frame = addr.frame_index();
        if frame < self.total_frames {
            self.test_bit(frame)
        } else {
            true
        }
    }

    /// Number of frames currently free.
    pub fn free_frames(&self) -> usize {
        self.bitmap
            .iter()
            .map(|word| word.count_zeros() as usize)
            .sum::<usize>()
            .min(self.total_frames)
    }

    fn set_bit(&mut self, frame: usize) {
        self.bitmap[frame / BITS_PER_WORD] |= 1 << (frame % BITS_PER_WORD);
    }

    fn clear_bit(&mut self, frame: usize) {
        self.bitmap[frame / BITS_PER_WORD] &= !(1 << (frame % BITS_PER_WORD));
    }

    fn test_bit(&self, frame: usize) -> bool {
        self.bitmap[frame / BITS_PER_WORD] & (1 << (frame % BITS_PER_WORD)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::addr::VirtAddr;

    fn window() -> KernelWindow {
        KernelWindow {
            phys_start: PhysAddr::new(0x0010_0000),
            phys_end: PhysAddr::new(0x0014_2000),
            virt_start: VirtAddr::new(0xC010_0000),
            virt_end: VirtAddr::new(0xC014_2000),
        }
    }

    #[test]
    fn reserved_regions_are_allocated_after_init() {
        let a = FrameAllocator::init(&window());
        // Low memory.
        assert!(a.is_allocated(PhysAddr::new(0)));
        assert!(a.is_allocated(PhysAddr::new(0x0009_F000)));
        // Kernel image.
        assert!(a.is_allocated(PhysAddr::new(0x0010_0000)));
        assert!(a.is_allocated(PhysAddr::new(0x0014_1FFF)));
        // First frame past the image is free.
        assert!(!a.is_allocated(PhysAddr::new(0x0014_2000)));
    }

    #[test]
    fn allocations_are_pairwise_distinct_and_marked() {
        let mut a = FrameAllocator::init(&window());
        let mut seen = std::vec::Vec::new();
        for _ in 0..64 {
            let frame = a.alloc().expect("allocation failed");
            assert!(frame.is_frame_aligned());
            assert!(a.is_allocated(frame));
            assert!(!seen.contains(&frame), "frame {} handed out twice", frame);
            seen.push(frame);
        }
    }

    #[test]
    fn freed_frame_may_be_reused() {
        let mut a = FrameAllocator::init(&window());
        let first = a.alloc().unwrap();
        let second = a.alloc().unwrap();
        assert_ne!(first, second);

        a.free(first);
        assert!(!a.is_allocated(first));
        // First-fit scan returns the lowest free frame, which is the one
        // just released.
        assert_eq!(a.alloc().unwrap(), first);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut a = FrameAllocator::init(&window());
        let free = a.free_frames();
        for _ in 0..free {
            assert!(a.alloc().is_some());
        }
        assert!(a.alloc().is_none());
    }

    #[test]
    fn out_of_range_queries_are_conservative() {
        let mut a = FrameAllocator::init(&window());
        let beyond = PhysAddr::new((TOTAL_PHYSICAL_MEMORY) as u32);
        assert!(a.is_allocated(beyond));
        // Freeing out of range is a silent no-op.
        a.free(beyond);
        assert!(a.is_allocated(beyond));
    }
}

//! # Initial Context Frame
//!
//! Where a seeded Cortex-M4 context sits on its stack and what it holds.
//! This is plain address arithmetic, so it is also built for host tests.
//!
//! `coopos_switch` pops S16–S31 (hard-float only), then R3–R11 and PC, from
//! increasing addresses. A seeded frame is that same block, zeroed except
//! for R4 (the task entry) and PC (the start trampoline):
//!
//! ```text
//!   word  0 .. fp       S16..S31   (hard-float only)
//!   word  fp            R3         padding for 8-byte alignment
//!   word  fp + 1        R4         entry
//!   word  fp + 2 .. 8   R5..R11
//!   word  fp + 9        PC         trampoline
//! ```

use crate::error::{KernelError, Result};

/// R3 (padding), R4–R11 and the return address.
const CORE_WORDS: usize = 10;

/// Shape of the initial frame for a given number of saved FPU words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameLayout {
    fp_words: usize,
}

impl FrameLayout {
    pub(crate) const fn new(fp_words: usize) -> Self {
        Self { fp_words }
    }

    pub(crate) const fn words(self) -> usize {
        self.fp_words + CORE_WORDS
    }

    /// Bytes the frame occupies.
    pub(crate) const fn size(self) -> usize {
        self.words() * 4
    }

    pub(crate) const fn r4_slot(self) -> usize {
        self.fp_words + 1
    }

    pub(crate) const fn pc_slot(self) -> usize {
        self.fp_words + CORE_WORDS - 1
    }

    /// Address of the frame inside the region `base..base + len`, ending at
    /// the region's 8-byte aligned top.
    ///
    /// # Errors
    /// `StackTooSmall` if the frame doesn't fit below the aligned top.
    pub(crate) fn place(self, base: usize, len: usize) -> Result<usize> {
        base.checked_add(len)
            .map(|end| end & !0x07)
            .and_then(|top| top.checked_sub(self.size()))
            .filter(|&frame| frame >= base)
            .ok_or(KernelError::StackTooSmall {
                needed: self.size(),
                provided: len,
            })
    }

    /// Write the initial register values into `frame`.
    pub(crate) fn fill(self, frame: &mut [u32], entry: u32, start: u32) {
        debug_assert_eq!(frame.len(), self.words());
        frame.fill(0);
        frame[self.r4_slot()] = entry;
        frame[self.pc_slot()] = start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x2000_0000;
    const ENTRY: u32 = 0x0800_1235;
    const START: u32 = 0x0800_0101;

    fn filled(layout: FrameLayout) -> Vec<u32> {
        let mut frame = vec![0xDEAD_BEEF; layout.words()];
        layout.fill(&mut frame, ENTRY, START);
        frame
    }

    #[test]
    fn test_soft_float_slots() {
        let layout = FrameLayout::new(0);
        assert_eq!(layout.size(), 40);

        let frame = filled(layout);
        assert_eq!(frame[1], ENTRY);
        assert_eq!(frame[9], START);
        for (i, word) in frame.iter().enumerate() {
            if i != 1 && i != 9 {
                assert_eq!(*word, 0, "word {}", i);
            }
        }
    }

    #[test]
    fn test_hard_float_slots() {
        let layout = FrameLayout::new(16);
        assert_eq!(layout.size(), 104);

        let frame = filled(layout);
        assert!(frame[..17].iter().all(|&w| w == 0));
        assert_eq!(frame[17], ENTRY);
        assert!(frame[18..25].iter().all(|&w| w == 0));
        assert_eq!(frame[25], START);
    }

    #[test]
    fn test_frame_sits_at_aligned_top() {
        let layout = FrameLayout::new(0);
        assert_eq!(layout.place(BASE, 1024), Ok(BASE + 1024 - 40));

        // Region ends at BASE + 0x67, aligned top is BASE + 0x60
        let frame = layout.place(BASE + 3, 100).unwrap();
        assert_eq!(frame, BASE + 0x60 - 40);
        assert_eq!(frame % 8, 0);

        let frame = FrameLayout::new(16).place(BASE + 3, 200).unwrap();
        assert_eq!(frame % 8, 0);
        assert!(frame >= BASE + 3);
    }

    #[test]
    fn test_region_smaller_than_frame() {
        let layout = FrameLayout::new(0);
        assert_eq!(layout.place(BASE, 40), Ok(BASE));
        assert_eq!(
            layout.place(BASE, 39),
            Err(KernelError::StackTooSmall {
                needed: 40,
                provided: 39
            })
        );
        // Fits by length, but not once the top is aligned down
        assert_eq!(
            layout.place(BASE + 4, 40),
            Err(KernelError::StackTooSmall {
                needed: 40,
                provided: 40
            })
        );
        assert_eq!(
            FrameLayout::new(16).place(BASE, 100),
            Err(KernelError::StackTooSmall {
                needed: 104,
                provided: 100
            })
        );
        assert!(layout.place(BASE, 0).is_err());
    }
}

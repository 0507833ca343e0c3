use std::num::NonZeroUsize;

use crate::error::RuntimeError;

/// Number of cells a tape gets when no capacity is configured.
pub const DEFAULT_TAPE_CAPACITY: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

/// A fixed-capacity strip of byte cells with a cursor.
///
/// The cursor always satisfies `cursor < capacity`. Moves that would leave
/// `[0, capacity)` are rejected whole and leave the cursor untouched; nothing
/// wraps or clamps. Cell arithmetic wraps modulo 256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tape {
    cells: Box<[u8]>,
    cursor: usize,
}

impl Tape {
    /// Allocate `capacity` zeroed cells with the cursor at 0.
    ///
    /// Allocation failure aborts the process; there is no state worth
    /// recovering at this point.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cells: vec![0u8; capacity.get()].into_boxed_slice(),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Value of the cell under the cursor.
    #[inline(always)]
    pub fn current(&self) -> u8 {
        self.cells[self.cursor]
    }

    #[inline(always)]
    pub(crate) fn set_current(&mut self, value: u8) {
        self.cells[self.cursor] = value;
    }

    /// Add a signed delta to the current cell, wrapping at 8 bits.
    #[inline(always)]
    pub(crate) fn add(&mut self, delta: i64) {
        // Truncation keeps delta mod 256, which is all an 8-bit cell sees.
        let cell = &mut self.cells[self.cursor];
        *cell = cell.wrapping_add(delta as u8);
    }

    pub(crate) fn move_forward(&mut self, count: usize) -> Result<(), RuntimeError> {
        match self.cursor.checked_add(count) {
            Some(next) if next < self.cells.len() => {
                self.cursor = next;
                Ok(())
            }
            _ => Err(RuntimeError::TapeOverflow {
                cursor: self.cursor,
                count,
                capacity: self.cells.len(),
            }),
        }
    }

    pub(crate) fn move_backward(&mut self, count: usize) -> Result<(), RuntimeError> {
        match self.cursor.checked_sub(count) {
            Some(next) => {
                self.cursor = next;
                Ok(())
            }
            None => Err(RuntimeError::TapeUnderflow {
                cursor: self.cursor,
                count,
            }),
        }
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new(DEFAULT_TAPE_CAPACITY)
    }
}

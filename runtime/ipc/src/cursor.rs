//! Buffer allocator shared by the encode and decode paths
//!
//! A [`Cursor`] only does bookkeeping: it hands out byte ranges of the payload
//! region and slots of the offsets table, front to back. The owning
//! [`IpcIo`](crate::IpcIo) or [`IpcIoReader`](crate::IpcIoReader) applies
//! those ranges to its memory.

use core::ops::Range;

use bitflags::bitflags;

use crate::config::align_up;
use crate::{IpcIoError, Result};

bitflags! {
    /// Message buffer status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IoFlags: u32 {
        /// Set once at construction
        const INITIALIZED = 1 << 0;

        /// Sticky: the buffer is no longer usable
        const OVERFLOW    = 1 << 1;
    }
}

/// Payload and offsets-table cursors over one message
#[derive(Debug, Clone)]
pub(crate) struct Cursor {
    flags: IoFlags,
    /// Payload capacity in bytes
    capacity: usize,
    /// Current payload offset, relative to the payload base
    pos: usize,
    /// Bytes left in the payload region
    bytes_left: usize,
    /// Offsets-table capacity in slots
    max_objects: usize,
    /// Next offsets-table slot
    slot: usize,
    /// Slots left in the offsets table
    slots_left: usize,
}

impl Cursor {
    pub(crate) fn new(capacity: usize, max_objects: usize) -> Self {
        Self {
            flags: IoFlags::INITIALIZED,
            capacity,
            pos: 0,
            bytes_left: capacity,
            max_objects,
            slot: 0,
            slots_left: max_objects,
        }
    }

    /// A cursor that rejected its construction parameters
    pub(crate) fn overflowed() -> Self {
        Self {
            flags: IoFlags::OVERFLOW,
            capacity: 0,
            pos: 0,
            bytes_left: 0,
            max_objects: 0,
            slot: 0,
            slots_left: 0,
        }
    }

    pub(crate) fn flags(&self) -> IoFlags {
        self.flags
    }

    pub(crate) fn is_available(&self) -> bool {
        self.flags.contains(IoFlags::INITIALIZED) && !self.flags.contains(IoFlags::OVERFLOW)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes_left
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    pub(crate) fn remaining_objects(&self) -> usize {
        self.slots_left
    }

    /// Fail with [`IpcIoError::Overflow`] once the buffer is unusable
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(IpcIoError::Overflow)
        }
    }

    /// Set the sticky overflow flag and hand the error back
    pub(crate) fn fail(&mut self, err: IpcIoError) -> IpcIoError {
        if !self.flags.contains(IoFlags::OVERFLOW) {
            log::warn!("ipc io overflow at offset {}: {}", self.pos, err);
        }
        self.flags.insert(IoFlags::OVERFLOW);
        err
    }

    /// Reserve `size` bytes, advancing by `size` rounded up to the alignment
    ///
    /// Returns the range of the full (padded) reservation.
    pub(crate) fn reserve(&mut self, size: usize) -> Result<Range<usize>> {
        self.check()?;
        match align_up(size) {
            Some(aligned) => self.advance(aligned),
            None => Err(self.fail(IpcIoError::OutOfSpace {
                requested: size,
                remaining: self.bytes_left,
            })),
        }
    }

    /// Reserve exactly `size` bytes
    pub(crate) fn reserve_unaligned(&mut self, size: usize) -> Result<Range<usize>> {
        self.check()?;
        self.advance(size)
    }

    fn advance(&mut self, size: usize) -> Result<Range<usize>> {
        if size > self.bytes_left {
            return Err(self.fail(IpcIoError::OutOfSpace {
                requested: size,
                remaining: self.bytes_left,
            }));
        }

        let start = self.pos;
        self.pos += size;
        self.bytes_left -= size;
        Ok(start..self.pos)
    }

    /// Check that an offsets-table slot is left without consuming it
    pub(crate) fn peek_slot(&mut self) -> Result<usize> {
        self.check()?;
        if self.slots_left == 0 {
            return Err(self.fail(IpcIoError::ObjectSlotsExhausted {
                max: self.max_objects,
            }));
        }
        Ok(self.slot)
    }

    /// Consume the slot returned by [`Cursor::peek_slot`]
    pub(crate) fn commit_slot(&mut self) {
        debug_assert!(self.slots_left > 0);
        self.slot += 1;
        self.slots_left -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_reserve_rounds_size() {
        let mut cursor = Cursor::new(16, 0);

        assert_eq!(cursor.reserve(1).unwrap(), 0..4);
        assert_eq!(cursor.reserve(6).unwrap(), 4..12);
        assert_eq!(cursor.remaining(), 4);
        assert_eq!(cursor.position() + cursor.remaining(), cursor.capacity());
    }

    #[test]
    fn test_unaligned_reserve_is_exact() {
        let mut cursor = Cursor::new(8, 0);

        assert_eq!(cursor.reserve_unaligned(1).unwrap(), 0..1);
        assert_eq!(cursor.reserve_unaligned(1).unwrap(), 1..2);
        // Aligned reservations round the size, not the position
        assert_eq!(cursor.reserve(2).unwrap(), 2..6);
        assert_eq!(cursor.remaining(), 2);
    }

    #[test]
    fn test_reserve_past_end_is_sticky() {
        let mut cursor = Cursor::new(8, 0);
        cursor.reserve(4).unwrap();

        let err = cursor.reserve(8).unwrap_err();
        assert_eq!(err, IpcIoError::OutOfSpace { requested: 8, remaining: 4 });
        assert!(cursor.flags().contains(IoFlags::OVERFLOW));
        // Cursor did not move
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.remaining(), 4);

        // Even a fitting reservation now fails
        assert_eq!(cursor.reserve(4), Err(IpcIoError::Overflow));
        assert_eq!(cursor.reserve_unaligned(1), Err(IpcIoError::Overflow));
    }

    #[test]
    fn test_huge_reserve_does_not_wrap() {
        let mut cursor = Cursor::new(8, 0);
        assert!(matches!(
            cursor.reserve(usize::MAX),
            Err(IpcIoError::OutOfSpace { .. })
        ));
        assert!(!cursor.is_available());
    }

    #[test]
    fn test_slots() {
        let mut cursor = Cursor::new(8, 2);

        assert_eq!(cursor.peek_slot().unwrap(), 0);
        cursor.commit_slot();
        assert_eq!(cursor.peek_slot().unwrap(), 1);
        cursor.commit_slot();
        assert_eq!(cursor.remaining_objects(), 0);

        assert_eq!(
            cursor.peek_slot(),
            Err(IpcIoError::ObjectSlotsExhausted { max: 2 })
        );
        assert!(!cursor.is_available());
    }

    #[test]
    fn test_overflowed_cursor() {
        let mut cursor = Cursor::overflowed();
        assert!(!cursor.is_available());
        assert!(!cursor.flags().contains(IoFlags::INITIALIZED));
        assert_eq!(cursor.reserve(0), Err(IpcIoError::Overflow));
    }
}

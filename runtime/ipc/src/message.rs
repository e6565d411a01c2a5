//! Message descriptor exchanged with the transport

use crate::config::OFFSET_SLOT_SIZE;
use crate::primitive::Primitive;

/// Received (or ready-to-send) message
///
/// `data` holds the payload and `offsets` the offsets table, one native word
/// per special object. `data_size` and `object_count` are the sizes declared
/// by the transport; they may be smaller than the slices carrying them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcMsg<'a> {
    pub data: &'a [u8],
    pub data_size: usize,
    pub offsets: &'a [u8],
    pub object_count: usize,
}

impl<'a> IpcMsg<'a> {
    /// Describe a message whose declared sizes are the full slices
    pub fn new(data: &'a [u8], offsets: &'a [u8]) -> Self {
        Self {
            data,
            data_size: data.len(),
            offsets,
            object_count: offsets.len() / OFFSET_SLOT_SIZE,
        }
    }

    /// Check that the declared sizes fit the slices
    pub fn is_well_formed(&self) -> bool {
        self.data_size <= self.data.len()
            && self
                .object_count
                .checked_mul(OFFSET_SLOT_SIZE)
                .is_some_and(|len| len <= self.offsets.len())
    }

    /// Payload offset recorded in offsets-table slot `index`
    pub fn offset(&self, index: usize) -> Option<usize> {
        if index >= self.object_count {
            return None;
        }
        let start = index * OFFSET_SLOT_SIZE;
        self.offsets.get(start..).and_then(usize::read_from)
    }
}

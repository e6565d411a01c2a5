//! IPC Message Buffer - Argument and handle marshalling for inter-process calls
//!
//! # Purpose
//! Encodes call arguments into a caller-supplied, fixed-capacity buffer and
//! decodes them back out of a received message, alongside the "special
//! objects" (file descriptors, service handles, transferable buffers) that the
//! transport must translate when the message crosses the process boundary.
//!
//! # Integration Points
//! - Depends on: nothing at runtime (no allocation beyond the cleanup list)
//! - Provides to: service stubs and proxies on both ends of a call
//! - IPC endpoints: none; the transport that moves messages lives elsewhere
//! - Capabilities required: none
//!
//! # Architecture
//! ```text
//! caller buffer
//! ┌──────────────────────────────┬──────────────────────────────────────┐
//! │ offsets table                │ payload                              │
//! │ max_objects × word           │ fields, 4-byte aligned unless packed │
//! └──────────────────────────────┴──────────────────────────────────────┘
//!        │ slot i = payload offset of special object i ─────▲
//! ```
//!
//! - [`IpcIo`] encodes a fresh message front to back
//! - [`IpcIoReader`] decodes a received [`IpcMsg`] front to back, zero copy
//! - [`ObjectCodec`] owns the special-object record layout, with the
//!   [`TaggedRecord`] and [`KernelObject`] backends
//! - [`CleanupList`] releases transferred buffers exactly once
//!
//! Values use the host's native representation; both ends of a channel share
//! one architecture.
//!
//! # Error Model
//! Every operation returns [`Result`]. The first failure also sets the sticky
//! [`IoFlags::OVERFLOW`] flag, after which every operation on that instance
//! fails with [`IpcIoError::Overflow`]. An overflowed buffer must be
//! discarded.
//!
//! # Usage
//! ```
//! use kaal_ipc_io::{IpcIo, IpcIoReader};
//!
//! let mut buf = [0u8; 256];
//! let mut io = IpcIo::new(&mut buf, 1);
//! io.push(7i32)?;
//! io.push_str("hello")?;
//! io.push_fd(3)?;
//!
//! let mut reader = IpcIoReader::from_message(io.as_message()?);
//! assert_eq!(reader.pop::<i32>()?, 7);
//! assert_eq!(reader.pop_str()?, "hello");
//! assert_eq!(reader.pop_fd()?, 3);
//! # Ok::<(), kaal_ipc_io::IpcIoError>(())
//! ```

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

pub mod config;
mod cursor;
mod io;
pub mod kernel;
mod message;
mod object;
mod primitive;
mod reader;
mod release;
pub mod tagged;

pub use cursor::IoFlags;
pub use io::IpcIo;
pub use kernel::KernelObject;
pub use message::IpcMsg;
pub use object::{
    BuffPtr, IpcContext, ObjectCodec, ObjectKind, RawFd, SpecialObj, SvcIdentity,
};
pub use primitive::{Primitive, Unaligned};
pub use reader::IpcIoReader;
pub use release::{CleanupList, ReleaseFn};
pub use tagged::TaggedRecord;

use thiserror::Error;

/// Special-object backend selected by cargo feature
#[cfg(feature = "kernel-object")]
pub type DefaultObjectCodec = KernelObject;

/// Special-object backend selected by cargo feature
#[cfg(not(feature = "kernel-object"))]
pub type DefaultObjectCodec = TaggedRecord;

/// Error types for message buffer operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IpcIoError {
    #[error("Buffer overflowed earlier and is no longer usable")]
    Overflow,

    #[error("Out of buffer space (requested: {requested} bytes, remaining: {remaining})")]
    OutOfSpace { requested: usize, remaining: usize },

    #[error("Out of special object slots (max: {max})")]
    ObjectSlotsExhausted { max: usize },

    #[error("String too long: {len} bytes")]
    StringTooLong { len: usize },

    #[error("Malformed string")]
    InvalidString,

    #[error("Invalid flat object size: {size}")]
    InvalidFlatObject { size: usize },

    #[error("Transferable buffer too large: {size} bytes")]
    BufferTooLarge { size: usize },

    #[error("Invalid file descriptor: {0}")]
    InvalidFd(RawFd),

    #[error("Special object offset mismatch (recorded: {expected}, read position: {actual})")]
    ObjectOffsetMismatch { expected: usize, actual: usize },

    #[error("Expected {expected:?} object, found {found:?}")]
    UnexpectedObject {
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("Unknown special object kind: {0:#x}")]
    UnknownObjectKind(u32),

    #[error("{0:?} objects are not supported by this backend")]
    UnsupportedObject(ObjectKind),

    #[error("Invalid value encoding")]
    InvalidValue,

    #[error("Malformed message descriptor")]
    InvalidMessage,
}

pub type Result<T> = core::result::Result<T, IpcIoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_default_codec_matches_config() {
        assert_eq!(<DefaultObjectCodec as ObjectCodec>::NAME, config::object_backend());
    }

    #[test]
    fn test_error_display() {
        let err = IpcIoError::OutOfSpace {
            requested: 8,
            remaining: 4,
        };
        assert_eq!(
            err.to_string(),
            "Out of buffer space (requested: 8 bytes, remaining: 4)"
        );
        assert_eq!(
            IpcIoError::UnknownObjectKind(0x2a).to_string(),
            "Unknown special object kind: 0x2a"
        );
    }
}

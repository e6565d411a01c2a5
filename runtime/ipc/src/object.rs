//! Special objects
//!
//! Payload elements the transport has to translate when a message crosses
//! the process boundary: file descriptors are duplicated, service handles are
//! mapped into the receiver's handle space and transferable buffers change
//! owner. Each one is written as a fixed-size record and indexed in the
//! offsets table so the transport can find it without parsing the payload.
//!
//! The record layout is owned by an [`ObjectCodec`]. Two backends exist:
//! [`TaggedRecord`](crate::TaggedRecord) and
//! [`KernelObject`](crate::KernelObject).

use crate::primitive::Primitive;
use crate::{IpcIoError, Result};

/// Raw file descriptor value
pub type RawFd = i32;

/// Special object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// File descriptor
    Fd,
    /// Transferable buffer
    Buffer,
    /// Remote-service handle
    Service,
}

/// Transport context of the receiving thread
///
/// Attached to every service handle popped from a message so that calls made
/// through the handle go out over the same driver connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcContext {
    /// Driver connection
    pub driver_fd: RawFd,
    /// Base of the driver's receive mapping
    pub mmap_addr: usize,
    /// Size of the driver's receive mapping
    pub mmap_size: usize,
}

impl IpcContext {
    pub const fn new(driver_fd: RawFd, mmap_addr: usize, mmap_size: usize) -> Self {
        Self {
            driver_fd,
            mmap_addr,
            mmap_size,
        }
    }
}

/// Capability naming a remote (or local) service object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvcIdentity {
    /// Driver handle; [`SvcIdentity::LOCAL_HANDLE`] for objects owned by this process
    pub handle: u32,
    /// Object token
    pub token: usize,
    /// Opaque cookie returned to the owner on every call
    pub cookie: usize,
    /// Transport context, set when popped from a received message
    pub context: Option<IpcContext>,
}

impl SvcIdentity {
    /// Handle value marking an object that lives in the sending process
    pub const LOCAL_HANDLE: u32 = u32::MAX;

    /// Reference to an existing remote object
    pub const fn remote(handle: u32, token: usize, cookie: usize) -> Self {
        Self {
            handle,
            token,
            cookie,
            context: None,
        }
    }

    /// Object owned by this process, handed out as a new capability
    pub const fn local(token: usize, cookie: usize) -> Self {
        Self {
            handle: Self::LOCAL_HANDLE,
            token,
            cookie,
            context: None,
        }
    }

    /// Check if this names an object owned by the sender
    pub const fn is_local(&self) -> bool {
        self.handle == Self::LOCAL_HANDLE
    }

    pub fn with_context(mut self, context: IpcContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Memory region whose ownership crosses the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuffPtr {
    /// Address of the region in the owner's address space
    pub addr: usize,
    /// Size in bytes
    pub size: u32,
}

impl BuffPtr {
    pub const fn new(addr: usize, size: u32) -> Self {
        Self { addr, size }
    }

    /// Describe an existing slice
    ///
    /// Returns `None` if the slice is larger than `u32::MAX` bytes.
    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        Some(Self {
            addr: buf.as_ptr() as usize,
            size: buf.len().try_into().ok()?,
        })
    }

    /// View the region as a slice
    ///
    /// # Safety
    /// `addr` must point to `size` readable bytes that stay valid and
    /// unmodified for `'b`.
    pub unsafe fn as_slice<'b>(&self) -> &'b [u8] {
        core::slice::from_raw_parts(self.addr as *const u8, self.size as usize)
    }
}

/// Tagged union over the special object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialObj {
    Fd(RawFd),
    Buffer(BuffPtr),
    Service(SvcIdentity),
}

impl SpecialObj {
    pub fn kind(&self) -> ObjectKind {
        match self {
            SpecialObj::Fd(_) => ObjectKind::Fd,
            SpecialObj::Buffer(_) => ObjectKind::Buffer,
            SpecialObj::Service(_) => ObjectKind::Service,
        }
    }
}

/// Wire layout of special-object records
///
/// Implementations are stateless; the backend is selected through the type
/// parameter of [`IpcIo`](crate::IpcIo) and [`IpcIoReader`](crate::IpcIoReader).
pub trait ObjectCodec {
    /// Backend name, for logging
    const NAME: &'static str;

    /// Size of one record in bytes (a multiple of the field alignment)
    const RECORD_SIZE: usize;

    /// Check if this backend can carry objects of `kind`
    fn supports(kind: ObjectKind) -> bool;

    /// Fill `record` (exactly `RECORD_SIZE` zeroed bytes)
    ///
    /// Only called for objects whose kind is [`supported`](Self::supports).
    fn encode(obj: &SpecialObj, record: &mut [u8]);

    /// Parse a record
    fn decode(record: &[u8]) -> Result<SpecialObj>;
}

// Record field helpers. `put` callers guarantee the record is RECORD_SIZE long.

pub(crate) fn put<T: Primitive>(record: &mut [u8], offset: usize, value: T) {
    value.write_to(&mut record[offset..]);
}

pub(crate) fn get<T: Primitive>(record: &[u8], offset: usize) -> Result<T> {
    record
        .get(offset..)
        .and_then(T::read_from)
        .ok_or(IpcIoError::InvalidMessage)
}

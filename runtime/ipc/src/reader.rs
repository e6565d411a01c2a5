//! Decoding side of a message buffer

use core::ffi::CStr;
use core::marker::PhantomData;

use crate::config::{MAX_IO_SIZE, OFFSET_SLOT_SIZE};
use crate::cursor::{Cursor, IoFlags};
use crate::message::IpcMsg;
use crate::object::{BuffPtr, IpcContext, ObjectCodec, ObjectKind, RawFd, SpecialObj, SvcIdentity};
use crate::primitive::{Primitive, Unaligned};
use crate::release::CleanupList;
use crate::{DefaultObjectCodec, IpcIoError, Result};

/// Read-only view over a received message
///
/// Fields are popped front to back in the order they were pushed. Strings
/// and flat objects are returned as borrows of the message itself, so they
/// live as long as the message and no copy is made.
///
/// Special objects are checked against the offsets table: the next recorded
/// offset must equal the current read position. Plain fields carry no such
/// marker, so popping them out of order yields wrong (but in-bounds) values.
pub struct IpcIoReader<'a, C: ObjectCodec = DefaultObjectCodec> {
    data: &'a [u8],
    offsets: &'a [u8],
    cursor: Cursor,
    releases: CleanupList,
    _codec: PhantomData<C>,
}

impl<'a> IpcIoReader<'a, DefaultObjectCodec> {
    /// Wrap a received message using the build-time object backend
    ///
    /// See [`IpcIoReader::from_message_with_codec`].
    pub fn from_message(msg: IpcMsg<'a>) -> Self {
        Self::from_message_with_codec(msg)
    }
}

impl<'a, C: ObjectCodec> IpcIoReader<'a, C> {
    /// Wrap a received message without copying it
    ///
    /// The declared `data_size` and `object_count` become the initial
    /// capacity and object slots. The reader starts in overflow if they do not
    /// fit the slices of the descriptor.
    pub fn from_message_with_codec(msg: IpcMsg<'a>) -> Self {
        if !msg.is_well_formed() {
            log::warn!(
                "malformed message: {} data bytes declared ({} present), {} objects declared ({} offset bytes present)",
                msg.data_size,
                msg.data.len(),
                msg.object_count,
                msg.offsets.len()
            );
            return Self {
                data: &[],
                offsets: &[],
                cursor: Cursor::overflowed(),
                releases: CleanupList::new(),
                _codec: PhantomData,
            };
        }

        log::trace!(
            "ipc io reader: {} data bytes, {} objects ({})",
            msg.data_size,
            msg.object_count,
            C::NAME
        );
        Self {
            data: &msg.data[..msg.data_size],
            offsets: &msg.offsets[..msg.object_count * OFFSET_SLOT_SIZE],
            cursor: Cursor::new(msg.data_size, msg.object_count),
            releases: CleanupList::new(),
            _codec: PhantomData,
        }
    }

    /// Check that no operation has failed yet
    pub fn is_available(&self) -> bool {
        self.cursor.is_available()
    }

    pub fn flags(&self) -> IoFlags {
        self.cursor.flags()
    }

    /// Declared payload size
    pub fn capacity(&self) -> usize {
        self.cursor.capacity()
    }

    /// Payload bytes not read yet
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Special objects not read yet
    pub fn remaining_objects(&self) -> usize {
        self.cursor.remaining_objects()
    }

    /// Payload bytes consumed so far
    pub fn data_len(&self) -> usize {
        self.cursor.position()
    }

    /// Special objects consumed so far
    pub fn object_count(&self) -> usize {
        self.cursor.slot()
    }

    /// Byte length of the offsets table
    pub fn offsets_len(&self) -> usize {
        self.offsets.len()
    }

    /// Borrow the next `size` bytes; the cursor advances by `size` rounded
    /// up to the field alignment
    pub fn reserve(&mut self, size: usize) -> Result<&'a [u8]> {
        let range = self.cursor.reserve(size)?;
        let data = self.data;
        Ok(&data[range.start..range.start + size])
    }

    /// Borrow exactly the next `size` bytes
    pub fn reserve_unaligned(&mut self, size: usize) -> Result<&'a [u8]> {
        let range = self.cursor.reserve_unaligned(size)?;
        let data = self.data;
        Ok(&data[range])
    }

    fn decoded<T>(&mut self, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| self.cursor.fail(IpcIoError::InvalidValue))
    }

    /// Read an aligned fixed-width value
    pub fn pop<T: Primitive>(&mut self) -> Result<T> {
        let bytes = self.reserve(T::SIZE)?;
        self.decoded(T::read_from(bytes))
    }

    /// Read a single-byte value packed without padding
    pub fn pop_unaligned<T: Unaligned>(&mut self) -> Result<T> {
        let bytes = self.reserve_unaligned(T::SIZE)?;
        self.decoded(T::read_from(bytes))
    }

    /// Borrow a string as a C string (terminator included)
    pub fn pop_cstr(&mut self) -> Result<&'a CStr> {
        let len = self.pop::<u32>()? as usize;
        if len > MAX_IO_SIZE {
            return Err(self.cursor.fail(IpcIoError::StringTooLong { len }));
        }

        let bytes = self.reserve(len + 1)?;
        CStr::from_bytes_with_nul(bytes).map_err(|_| self.cursor.fail(IpcIoError::InvalidString))
    }

    /// Borrow a UTF-8 string
    pub fn pop_str(&mut self) -> Result<&'a str> {
        let s = self.pop_cstr()?;
        s.to_str()
            .map_err(|_| self.cursor.fail(IpcIoError::InvalidString))
    }

    /// Borrow an opaque blob
    pub fn pop_flat(&mut self) -> Result<&'a [u8]> {
        let size = self.pop::<u32>()? as usize;
        if size == 0 || size > MAX_IO_SIZE {
            return Err(self.cursor.fail(IpcIoError::InvalidFlatObject { size }));
        }
        self.reserve(size)
    }

    /// Read a flat object back as a plain-old-data struct
    ///
    /// The size on the wire must match `T` exactly.
    pub fn pop_pod<T: bytemuck::Pod>(&mut self) -> Result<T> {
        let bytes = self.pop_flat()?;
        if bytes.len() != core::mem::size_of::<T>() {
            return Err(self.cursor.fail(IpcIoError::InvalidFlatObject { size: bytes.len() }));
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Read the next special object
    ///
    /// Fails if the next offsets-table entry does not point at the current
    /// read position.
    pub fn pop_object(&mut self) -> Result<SpecialObj> {
        let slot = self.cursor.peek_slot()?;
        let actual = self.cursor.position();
        let entry = slot * OFFSET_SLOT_SIZE;
        let recorded = self.offsets.get(entry..).and_then(usize::read_from);

        match recorded {
            Some(expected) if expected == actual => {}
            Some(expected) => {
                return Err(self
                    .cursor
                    .fail(IpcIoError::ObjectOffsetMismatch { expected, actual }));
            }
            None => return Err(self.cursor.fail(IpcIoError::InvalidMessage)),
        }

        let record = self.reserve(C::RECORD_SIZE)?;
        self.cursor.commit_slot();
        let obj = C::decode(record).map_err(|err| self.cursor.fail(err))?;

        log::trace!("popped {:?} object at offset {} (slot {})", obj.kind(), actual, slot);
        Ok(obj)
    }

    fn unexpected(&mut self, expected: ObjectKind, found: ObjectKind) -> IpcIoError {
        self.cursor
            .fail(IpcIoError::UnexpectedObject { expected, found })
    }

    /// Read a file descriptor
    pub fn pop_fd(&mut self) -> Result<RawFd> {
        match self.pop_object()? {
            SpecialObj::Fd(fd) => Ok(fd),
            other => Err(self.unexpected(ObjectKind::Fd, other.kind())),
        }
    }

    /// Read a service handle, attaching the transport context it arrived on
    pub fn pop_svc(&mut self, context: &IpcContext) -> Result<SvcIdentity> {
        match self.pop_object()? {
            SpecialObj::Service(svc) => Ok(svc.with_context(*context)),
            other => Err(self.unexpected(ObjectKind::Service, other.kind())),
        }
    }

    /// Read a transferable buffer
    pub fn pop_buff(&mut self) -> Result<BuffPtr> {
        match self.pop_object()? {
            SpecialObj::Buffer(buff) => Ok(buff),
            other => Err(self.unexpected(ObjectKind::Buffer, other.kind())),
        }
    }

    /// Read a transferable buffer and take responsibility for releasing it
    pub fn pop_buff_with_release<F>(&mut self, release: F) -> Result<BuffPtr>
    where
        F: FnOnce(BuffPtr) + 'static,
    {
        let buff = self.pop_buff()?;
        self.releases.register(buff, release);
        Ok(buff)
    }

    /// Take responsibility for releasing `buff` when this message is swept
    pub fn register_release<F>(&mut self, buff: BuffPtr, release: F)
    where
        F: FnOnce(BuffPtr) + 'static,
    {
        self.releases.register(buff, release);
    }

    /// Release every registered buffer now; see [`CleanupList::sweep`]
    pub fn sweep_releases(&mut self) -> usize {
        self.releases.sweep()
    }

    /// Buffers waiting to be released
    pub fn pending_releases(&self) -> usize {
        self.releases.len()
    }
}

impl<C: ObjectCodec> core::fmt::Debug for IpcIoReader<'_, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IpcIoReader")
            .field("codec", &C::NAME)
            .field("flags", &self.cursor.flags())
            .field("data_len", &self.data_len())
            .field("remaining", &self.remaining())
            .field("object_count", &self.object_count())
            .field("remaining_objects", &self.remaining_objects())
            .field("releases", &self.releases)
            .finish()
    }
}

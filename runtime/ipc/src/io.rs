//! Encoding side of a message buffer

use core::ffi::CStr;
use core::marker::PhantomData;
use core::ops::Range;

use crate::config::{MAX_BUFF_SIZE, MAX_IO_SIZE, MAX_OBJ_NUM, OFFSET_SLOT_SIZE};
use crate::cursor::{Cursor, IoFlags};
use crate::message::IpcMsg;
use crate::object::{BuffPtr, ObjectCodec, RawFd, SpecialObj, SvcIdentity};
use crate::primitive::{Primitive, Unaligned};
use crate::release::CleanupList;
use crate::{DefaultObjectCodec, IpcIoError, Result};

/// Message buffer being encoded
///
/// Carves an offsets table of `max_objects` words from the front of the
/// caller's buffer and uses the rest as the payload region:
///
/// ```text
/// [ offsets table: max_objects × word ][ payload ... ]
/// ```
///
/// Fields are appended front to back. The first failure sets the sticky
/// overflow flag; every later call fails with [`IpcIoError::Overflow`] and
/// leaves the buffer untouched.
pub struct IpcIo<'a, C: ObjectCodec = DefaultObjectCodec> {
    buf: &'a mut [u8],
    table_len: usize,
    cursor: Cursor,
    releases: CleanupList,
    _codec: PhantomData<C>,
}

impl<'a> IpcIo<'a, DefaultObjectCodec> {
    /// Create an encoder using the build-time object backend
    ///
    /// See [`IpcIo::with_codec`].
    pub fn new(buf: &'a mut [u8], max_objects: usize) -> Self {
        Self::with_codec(buf, max_objects)
    }
}

impl<'a, C: ObjectCodec> IpcIo<'a, C> {
    /// Create an encoder over `buf` with room for `max_objects` special objects
    ///
    /// The instance starts in overflow if `buf` is empty or larger than
    /// [`MAX_IO_SIZE`], if `max_objects` exceeds [`MAX_OBJ_NUM`], or if the
    /// offsets table would not fit in `buf`.
    pub fn with_codec(buf: &'a mut [u8], max_objects: usize) -> Self {
        let size = buf.len();
        let table_len = max_objects.saturating_mul(OFFSET_SLOT_SIZE);

        let cursor = if size == 0 || size > MAX_IO_SIZE || max_objects > MAX_OBJ_NUM {
            log::warn!(
                "rejecting ipc io buffer: size {} (max {}), objects {} (max {})",
                size,
                MAX_IO_SIZE,
                max_objects,
                MAX_OBJ_NUM
            );
            Cursor::overflowed()
        } else if table_len > size {
            log::warn!(
                "offsets table for {} objects does not fit in {} bytes",
                max_objects,
                size
            );
            Cursor::overflowed()
        } else {
            log::trace!(
                "ipc io: {} payload bytes, {} object slots ({})",
                size - table_len,
                max_objects,
                C::NAME
            );
            Cursor::new(size - table_len, max_objects)
        };

        let table_len = if cursor.is_available() { table_len } else { 0 };
        Self {
            buf,
            table_len,
            cursor,
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

    /// Payload capacity in bytes
    pub fn capacity(&self) -> usize {
        self.cursor.capacity()
    }

    /// Payload bytes still free
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Object slots still free
    pub fn remaining_objects(&self) -> usize {
        self.cursor.remaining_objects()
    }

    /// Payload bytes written so far, or 0 once the buffer has overflowed
    pub fn data_len(&self) -> usize {
        if self.is_available() {
            self.cursor.position()
        } else {
            0
        }
    }

    /// Special objects written so far
    pub fn object_count(&self) -> usize {
        self.cursor.slot()
    }

    /// Byte length of the offsets table in front of the payload
    pub fn offsets_len(&self) -> usize {
        self.table_len
    }

    /// Descriptor of the encoded message, as handed to the transport
    ///
    /// Fails with [`IpcIoError::Overflow`] once any push has failed, since
    /// the payload may end in a partly written field.
    pub fn as_message(&self) -> Result<IpcMsg<'_>> {
        self.cursor.check()?;
        let data_size = self.cursor.position();
        let object_count = self.object_count();
        Ok(IpcMsg {
            data: &self.buf[self.table_len..self.table_len + data_size],
            data_size,
            offsets: &self.buf[..object_count * OFFSET_SLOT_SIZE],
            object_count,
        })
    }

    fn payload_range(&mut self, range: Range<usize>) -> &mut [u8] {
        let start = self.table_len + range.start;
        let end = self.table_len + range.end;
        let bytes = &mut self.buf[start..end];
        bytes.fill(0);
        bytes
    }

    /// Reserve `size` bytes of payload; the cursor advances by `size` rounded
    /// up to the field alignment
    ///
    /// The returned bytes are zeroed.
    pub fn reserve(&mut self, size: usize) -> Result<&mut [u8]> {
        let range = self.cursor.reserve(size)?;
        Ok(&mut self.payload_range(range)[..size])
    }

    /// Reserve exactly `size` bytes of payload
    pub fn reserve_unaligned(&mut self, size: usize) -> Result<&mut [u8]> {
        let range = self.cursor.reserve_unaligned(size)?;
        Ok(self.payload_range(range))
    }

    /// Append a fixed-width value as an aligned field
    pub fn push<T: Primitive>(&mut self, value: T) -> Result<()> {
        value.write_to(self.reserve(T::SIZE)?);
        Ok(())
    }

    /// Append a single-byte value without padding
    pub fn push_unaligned<T: Unaligned>(&mut self, value: T) -> Result<()> {
        value.write_to(self.reserve_unaligned(T::SIZE)?);
        Ok(())
    }

    /// Append a string as `[u32 len][bytes, NUL, padding]`
    ///
    /// Fails if the string contains a NUL byte or is [`MAX_IO_SIZE`] bytes
    /// or longer.
    pub fn push_str(&mut self, s: &str) -> Result<()> {
        self.cursor.check()?;
        if s.as_bytes().contains(&0) {
            return Err(self.cursor.fail(IpcIoError::InvalidString));
        }
        self.push_string_bytes(s.as_bytes())
    }

    /// Append a C string, see [`IpcIo::push_str`]
    pub fn push_cstr(&mut self, s: &CStr) -> Result<()> {
        self.push_string_bytes(s.to_bytes())
    }

    fn push_string_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.cursor.check()?;
        let len = bytes.len();
        if len >= MAX_IO_SIZE {
            return Err(self.cursor.fail(IpcIoError::StringTooLong { len }));
        }

        self.push(len as u32)?;
        // Reserved bytes are zeroed, which supplies the terminator
        self.reserve(len + 1)?[..len].copy_from_slice(bytes);
        Ok(())
    }

    /// Append an opaque blob as `[u32 size][bytes, padding]`
    ///
    /// Fails if `data` is empty or larger than [`MAX_IO_SIZE`].
    pub fn push_flat(&mut self, data: &[u8]) -> Result<()> {
        self.cursor.check()?;
        let size = data.len();
        if size == 0 || size > MAX_IO_SIZE {
            return Err(self.cursor.fail(IpcIoError::InvalidFlatObject { size }));
        }

        self.push(size as u32)?;
        self.reserve(size)?.copy_from_slice(data);
        Ok(())
    }

    /// Append a plain-old-data struct as a flat object
    pub fn push_pod<T: bytemuck::Pod>(&mut self, value: &T) -> Result<()> {
        self.push_flat(bytemuck::bytes_of(value))
    }

    /// Append a special object and record its offset
    pub fn push_object(&mut self, obj: &SpecialObj) -> Result<()> {
        self.cursor.check()?;
        let kind = obj.kind();
        if !C::supports(kind) {
            return Err(self.cursor.fail(IpcIoError::UnsupportedObject(kind)));
        }

        let slot = self.cursor.peek_slot()?;
        let range = self.cursor.reserve(C::RECORD_SIZE)?;
        let offset = range.start;
        C::encode(obj, &mut self.payload_range(range)[..C::RECORD_SIZE]);

        let entry = slot * OFFSET_SLOT_SIZE;
        offset.write_to(&mut self.buf[entry..entry + OFFSET_SLOT_SIZE]);
        self.cursor.commit_slot();

        log::trace!("pushed {:?} object at offset {} (slot {})", kind, offset, slot);
        Ok(())
    }

    /// Append a file descriptor for duplication into the receiver
    pub fn push_fd(&mut self, fd: RawFd) -> Result<()> {
        self.cursor.check()?;
        if fd < 0 {
            return Err(self.cursor.fail(IpcIoError::InvalidFd(fd)));
        }
        self.push_object(&SpecialObj::Fd(fd))
    }

    /// Append a service handle
    ///
    /// A [local](SvcIdentity::is_local) identity is written as an object
    /// creation record, anything else as a reference.
    pub fn push_svc(&mut self, svc: &SvcIdentity) -> Result<()> {
        self.push_object(&SpecialObj::Service(*svc))
    }

    /// Append a transferable buffer
    pub fn push_buff(&mut self, buff: BuffPtr) -> Result<()> {
        self.cursor.check()?;
        if buff.size as usize > MAX_BUFF_SIZE {
            return Err(self.cursor.fail(IpcIoError::BufferTooLarge {
                size: buff.size as usize,
            }));
        }
        self.push_object(&SpecialObj::Buffer(buff))
    }

    /// Append a transferable buffer and hand its release to this message
    ///
    /// `release` is registered even if the push fails, so the buffer is
    /// released when the message is swept or dropped either way.
    pub fn push_buff_with_release<F>(&mut self, buff: BuffPtr, release: F) -> Result<()>
    where
        F: FnOnce(BuffPtr) + 'static,
    {
        self.releases.register(buff, release);
        self.push_buff(buff)
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

impl<C: ObjectCodec> core::fmt::Debug for IpcIo<'_, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IpcIo")
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KernelObject, TaggedRecord};
    use std::mem::size_of;

    #[test]
    fn test_construction_carves_offsets_table() {
        let mut buf = [0u8; 256];
        let io = IpcIo::new(&mut buf, 4);

        assert!(io.is_available());
        assert_eq!(io.flags(), IoFlags::INITIALIZED);
        assert_eq!(io.offsets_len(), 4 * size_of::<usize>());
        assert_eq!(io.capacity(), 256 - 4 * size_of::<usize>());
        assert_eq!(io.remaining(), io.capacity());
        assert_eq!(io.remaining_objects(), 4);
    }

    #[test]
    fn test_construction_rejects_limits() {
        let mut empty = [0u8; 0];
        assert!(!IpcIo::new(&mut empty, 0).is_available());

        let mut big = [0u8; MAX_IO_SIZE + 1];
        assert!(!IpcIo::new(&mut big, 0).is_available());

        let mut buf = [0u8; 512];
        assert!(!IpcIo::new(&mut buf, MAX_OBJ_NUM + 1).is_available());
    }

    #[test]
    fn test_construction_rejects_table_overflow() {
        let mut buf = [0u8; 8];
        let mut io = IpcIo::new(&mut buf, 3);

        assert!(io.flags().contains(IoFlags::OVERFLOW));
        assert_eq!(io.remaining(), 0);
        assert_eq!(io.remaining_objects(), 0);
        assert_eq!(io.push(1u8), Err(IpcIoError::Overflow));
    }

    #[test]
    fn test_padding_is_zeroed() {
        let mut buf = [0xAAu8; 16];
        let mut io = IpcIo::new(&mut buf, 0);
        io.push(true).unwrap();
        drop(io);

        assert_eq!(&buf[..4], &[1, 0, 0, 0]);
        assert_eq!(buf[4], 0xAA);
    }

    #[test]
    fn test_string_layout() {
        let mut buf = [0xAAu8; 32];
        let mut io = IpcIo::new(&mut buf, 0);
        io.push_str("hello").unwrap();
        assert_eq!(io.data_len(), 4 + 8);
        drop(io);

        assert_eq!(&buf[..4], &5u32.to_ne_bytes());
        assert_eq!(&buf[4..12], b"hello\0\0\0");
    }

    #[test]
    fn test_string_with_nul_rejected() {
        let mut buf = [0u8; 32];
        let mut io = IpcIo::new(&mut buf, 0);
        assert_eq!(io.push_str("a\0b"), Err(IpcIoError::InvalidString));
        assert!(!io.is_available());
    }

    #[test]
    fn test_flat_object_bounds() {
        let mut buf = [0u8; 64];
        let mut io = IpcIo::new(&mut buf, 0);
        assert_eq!(
            io.push_flat(&[]),
            Err(IpcIoError::InvalidFlatObject { size: 0 })
        );
        assert_eq!(io.data_len(), 0);
    }

    #[test]
    fn test_object_offsets_recorded() {
        let mut buf = [0u8; 256];
        let mut io = IpcIo::<TaggedRecord>::with_codec(&mut buf, 2);
        io.push(7u32).unwrap();
        io.push_fd(3).unwrap();
        io.push_svc(&SvcIdentity::remote(1, 2, 3)).unwrap();

        let msg = io.as_message().unwrap();
        assert_eq!(msg.object_count, 2);
        assert_eq!(msg.offset(0), Some(4));
        assert_eq!(msg.offset(1), Some(4 + TaggedRecord::RECORD_SIZE));
        assert_eq!(msg.data_size, 4 + 2 * TaggedRecord::RECORD_SIZE);
    }

    #[test]
    fn test_overflowed_encoder_yields_no_message() {
        let mut buf = [0u8; 12];
        let mut io = IpcIo::new(&mut buf, 0);
        io.push(7u32).unwrap();
        io.push(8u32).unwrap();
        assert_eq!(io.data_len(), 8);

        // Length word fits, body does not
        assert!(io.push_str("hello").is_err());
        assert!(!io.is_available());
        assert_eq!(io.data_len(), 0);
        assert_eq!(io.as_message(), Err(IpcIoError::Overflow));
    }

    #[test]
    fn test_negative_fd_rejected() {
        let mut buf = [0u8; 128];
        let mut io = IpcIo::new(&mut buf, 1);
        assert_eq!(io.push_fd(-1), Err(IpcIoError::InvalidFd(-1)));
        assert_eq!(io.remaining_objects(), 1);
    }

    #[test]
    fn test_kernel_backend_rejects_buffers() {
        let mut buf = [0u8; 128];
        let mut io = IpcIo::<KernelObject>::with_codec(&mut buf, 1);
        assert_eq!(
            io.push_buff(BuffPtr::new(0x1000, 8)),
            Err(IpcIoError::UnsupportedObject(crate::ObjectKind::Buffer))
        );
        assert_eq!(io.data_len(), 0);
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let mut buf = [0u8; 128];
        let mut io = IpcIo::new(&mut buf, 1);
        let size = MAX_BUFF_SIZE as u32 + 1;
        assert_eq!(
            io.push_buff(BuffPtr::new(0x1000, size)),
            Err(IpcIoError::BufferTooLarge { size: size as usize })
        );
    }

    #[test]
    fn test_release_registered_on_failed_push() {
        use std::cell::Cell;
        use std::rc::Rc;

        let released = Rc::new(Cell::new(0));
        let mut buf = [0u8; 16];
        let mut io = IpcIo::new(&mut buf, 0);

        let counter = released.clone();
        let result = io.push_buff_with_release(BuffPtr::new(0x1000, 8), move |_| {
            counter.set(counter.get() + 1)
        });
        assert!(result.is_err());
        assert_eq!(io.pending_releases(), 1);

        drop(io);
        assert_eq!(released.get(), 1);
    }
}

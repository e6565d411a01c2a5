//! Kernel-object backend
//!
//! Writes special objects in the flat object layout the kernel IPC driver
//! translates natively, so the driver can duplicate descriptors and map
//! handles without a user-space shim. Only file descriptors and service
//! handles have a native form here.
//!
//! # Record Layout
//! ```text
//! 0        4        8                  8+W          8+2W
//! [ type ] [ flags] [ binder | handle ] [  cookie  ]
//!   u32      u32      usize  | u32         usize
//! ```

use core::mem::size_of;

use static_assertions::const_assert_eq;

use crate::config::IPC_IO_ALIGN;
use crate::object::{get, put, ObjectCodec, ObjectKind, SpecialObj, SvcIdentity};
use crate::{IpcIoError, Result};

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | c4 as u32
}

const TYPE_LARGE: u8 = 0x85;

/// Local object: the receiver is handed a new capability
pub const BINDER_TYPE_BINDER: u32 = pack_chars(b's', b'b', b'*', TYPE_LARGE);
/// Reference to an object the receiver already knows
pub const BINDER_TYPE_HANDLE: u32 = pack_chars(b's', b'h', b'*', TYPE_LARGE);
/// File descriptor to duplicate into the receiver
pub const BINDER_TYPE_FD: u32 = pack_chars(b'f', b'd', b'*', TYPE_LARGE);

pub const FLAT_BINDER_FLAG_ACCEPTS_FDS: u32 = 0x100;

/// Flags written on every object
pub const OBJECT_FLAGS: u32 = 0x7f | FLAT_BINDER_FLAG_ACCEPTS_FDS;

const TYPE: usize = 0;
const FLAGS: usize = 4;
const BINDER: usize = 8;
const COOKIE: usize = BINDER + size_of::<usize>();

/// Kernel-native flat objects
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelObject;

const_assert_eq!(KernelObject::RECORD_SIZE % IPC_IO_ALIGN, 0);

impl ObjectCodec for KernelObject {
    const NAME: &'static str = "kernel-object";
    const RECORD_SIZE: usize = COOKIE + size_of::<usize>();

    fn supports(kind: ObjectKind) -> bool {
        matches!(kind, ObjectKind::Fd | ObjectKind::Service)
    }

    fn encode(obj: &SpecialObj, record: &mut [u8]) {
        put(record, FLAGS, OBJECT_FLAGS);
        match obj {
            SpecialObj::Fd(fd) => {
                put(record, TYPE, BINDER_TYPE_FD);
                put(record, BINDER, *fd as u32);
            }
            SpecialObj::Service(svc) if svc.is_local() => {
                put(record, TYPE, BINDER_TYPE_BINDER);
                put(record, BINDER, svc.token);
                put(record, COOKIE, svc.cookie);
            }
            SpecialObj::Service(svc) => {
                put(record, TYPE, BINDER_TYPE_HANDLE);
                put(record, BINDER, svc.handle);
                put(record, COOKIE, svc.cookie);
            }
            SpecialObj::Buffer(_) => {
                debug_assert!(false, "buffers have no kernel-object form");
            }
        }
    }

    fn decode(record: &[u8]) -> Result<SpecialObj> {
        match get::<u32>(record, TYPE)? {
            BINDER_TYPE_FD => {
                let fd = get::<u32>(record, BINDER)? as i32;
                if fd < 0 {
                    return Err(IpcIoError::InvalidFd(fd));
                }
                Ok(SpecialObj::Fd(fd))
            }
            BINDER_TYPE_BINDER => Ok(SpecialObj::Service(SvcIdentity::local(
                get(record, BINDER)?,
                get(record, COOKIE)?,
            ))),
            BINDER_TYPE_HANDLE => {
                let handle: u32 = get(record, BINDER)?;
                if handle == SvcIdentity::LOCAL_HANDLE {
                    return Err(IpcIoError::InvalidMessage);
                }
                Ok(SpecialObj::Service(SvcIdentity::remote(
                    handle,
                    0,
                    get(record, COOKIE)?,
                )))
            }
            other => Err(IpcIoError::UnknownObjectKind(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    #[test]
    fn test_type_constants() {
        assert_eq!(BINDER_TYPE_BINDER, 0x7362_2a85);
        assert_eq!(BINDER_TYPE_HANDLE, 0x7368_2a85);
        assert_eq!(BINDER_TYPE_FD, 0x6664_2a85);
    }

    #[test]
    fn test_supported_kinds() {
        assert!(KernelObject::supports(ObjectKind::Fd));
        assert!(KernelObject::supports(ObjectKind::Service));
        assert!(!KernelObject::supports(ObjectKind::Buffer));
    }

    #[test]
    fn test_local_object_is_creation_record() {
        let mut record = vec![0u8; KernelObject::RECORD_SIZE];
        KernelObject::encode(&SpecialObj::Service(SvcIdentity::local(0x40, 0x80)), &mut record);

        assert_eq!(&record[..4], &BINDER_TYPE_BINDER.to_ne_bytes());
        assert_eq!(&record[4..8], &OBJECT_FLAGS.to_ne_bytes());
        assert_eq!(
            KernelObject::decode(&record).unwrap(),
            SpecialObj::Service(SvcIdentity::local(0x40, 0x80))
        );
    }

    #[test]
    fn test_remote_handle_is_reference_record() {
        let mut record = vec![0u8; KernelObject::RECORD_SIZE];
        KernelObject::encode(&SpecialObj::Service(SvcIdentity::remote(5, 0x40, 0x80)), &mut record);

        assert_eq!(&record[..4], &BINDER_TYPE_HANDLE.to_ne_bytes());
        // The token does not travel with a reference
        assert_eq!(
            KernelObject::decode(&record).unwrap(),
            SpecialObj::Service(SvcIdentity::remote(5, 0, 0x80))
        );
    }

    #[test]
    fn test_handle_record_with_local_sentinel_rejected() {
        let mut record = vec![0u8; KernelObject::RECORD_SIZE];
        KernelObject::encode(&SpecialObj::Service(SvcIdentity::remote(5, 0, 0x80)), &mut record);
        record[BINDER..BINDER + 4].copy_from_slice(&SvcIdentity::LOCAL_HANDLE.to_ne_bytes());

        assert_eq!(KernelObject::decode(&record), Err(IpcIoError::InvalidMessage));
    }

    #[test]
    fn test_fd_record() {
        let mut record = vec![0u8; KernelObject::RECORD_SIZE];
        KernelObject::encode(&SpecialObj::Fd(12), &mut record);
        assert_eq!(KernelObject::decode(&record).unwrap(), SpecialObj::Fd(12));
    }
}

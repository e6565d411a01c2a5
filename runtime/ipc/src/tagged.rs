//! Tagged-record backend
//!
//! # Record Layout
//! ```text
//! 0        4        8            8+W          8+2W
//! [ kind ] [ aux  ] [  word0   ] [  word1   ]
//!   u32      u32       usize        usize
//! ```
//!
//! | kind            | aux    | word0 | word1  |
//! |-----------------|--------|-------|--------|
//! | `KIND_FD`       | fd     | 0     | 0      |
//! | `KIND_BUFFER`   | size   | addr  | 0      |
//! | `KIND_SVC_REF`  | handle | token | cookie |
//! | `KIND_SVC_NEW`  | handle | token | cookie |

use core::mem::size_of;

use static_assertions::const_assert_eq;

use crate::config::{IPC_IO_ALIGN, MAX_BUFF_SIZE};
use crate::object::{get, put, BuffPtr, ObjectCodec, ObjectKind, SpecialObj, SvcIdentity};
use crate::{IpcIoError, Result};

pub const KIND_FD: u32 = 0;
pub const KIND_BUFFER: u32 = 1;
/// Reference to an existing remote object
pub const KIND_SVC_REF: u32 = 2;
/// Local object handed out as a new capability
pub const KIND_SVC_NEW: u32 = 3;

const KIND: usize = 0;
const AUX: usize = 4;
const WORD0: usize = 8;
const WORD1: usize = WORD0 + size_of::<usize>();

/// Internal `{kind, payload}` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedRecord;

const_assert_eq!(TaggedRecord::RECORD_SIZE % IPC_IO_ALIGN, 0);

impl ObjectCodec for TaggedRecord {
    const NAME: &'static str = "tagged-record";
    const RECORD_SIZE: usize = WORD1 + size_of::<usize>();

    fn supports(_kind: ObjectKind) -> bool {
        true
    }

    fn encode(obj: &SpecialObj, record: &mut [u8]) {
        match obj {
            SpecialObj::Fd(fd) => {
                put(record, KIND, KIND_FD);
                put(record, AUX, *fd as u32);
            }
            SpecialObj::Buffer(buff) => {
                put(record, KIND, KIND_BUFFER);
                put(record, AUX, buff.size);
                put(record, WORD0, buff.addr);
            }
            SpecialObj::Service(svc) => {
                let kind = if svc.is_local() {
                    KIND_SVC_NEW
                } else {
                    KIND_SVC_REF
                };
                put(record, KIND, kind);
                put(record, AUX, svc.handle);
                put(record, WORD0, svc.token);
                put(record, WORD1, svc.cookie);
            }
        }
    }

    fn decode(record: &[u8]) -> Result<SpecialObj> {
        let aux: u32 = get(record, AUX)?;
        match get::<u32>(record, KIND)? {
            KIND_FD => {
                let fd = aux as i32;
                if fd < 0 {
                    return Err(IpcIoError::InvalidFd(fd));
                }
                Ok(SpecialObj::Fd(fd))
            }
            KIND_BUFFER => {
                if aux as usize > MAX_BUFF_SIZE {
                    return Err(IpcIoError::BufferTooLarge { size: aux as usize });
                }
                Ok(SpecialObj::Buffer(BuffPtr::new(get(record, WORD0)?, aux)))
            }
            // A reference never names a local object
            KIND_SVC_REF if aux == SvcIdentity::LOCAL_HANDLE => Err(IpcIoError::InvalidMessage),
            KIND_SVC_REF => Ok(SpecialObj::Service(SvcIdentity::remote(
                aux,
                get(record, WORD0)?,
                get(record, WORD1)?,
            ))),
            KIND_SVC_NEW => Ok(SpecialObj::Service(SvcIdentity::local(
                get(record, WORD0)?,
                get(record, WORD1)?,
            ))),
            other => Err(IpcIoError::UnknownObjectKind(other)),
        }
    }
}

//! Platform limits and backend selection
//!
//! The limits are fixed by the transport driver and shared by both ends of a
//! channel. The special-object backend is picked at build time:
//!
//! ```bash
//! # Tagged records (default)
//! cargo build -p kaal-ipc-io
//!
//! # Kernel-native flat objects
//! cargo build -p kaal-ipc-io --no-default-features --features kernel-object
//! ```

use static_assertions::const_assert;

/// Maximum size of one message buffer (offsets table + payload)
pub const MAX_IO_SIZE: usize = 8192;

/// Maximum number of special objects one message may carry
pub const MAX_OBJ_NUM: usize = 32;

/// Maximum size of a transferable buffer
pub const MAX_BUFF_SIZE: usize = 65536;

/// Alignment applied to the size of every aligned field
pub const IPC_IO_ALIGN: usize = 4;

/// Size of one offsets-table slot (one machine word)
pub const OFFSET_SLOT_SIZE: usize = core::mem::size_of::<usize>();

const_assert!(IPC_IO_ALIGN.is_power_of_two());
const_assert!(MAX_IO_SIZE % IPC_IO_ALIGN == 0);
const_assert!(MAX_OBJ_NUM * OFFSET_SLOT_SIZE < MAX_IO_SIZE);
const_assert!(MAX_IO_SIZE <= u32::MAX as usize);
const_assert!(MAX_BUFF_SIZE <= u32::MAX as usize);

/// Round `size` up to the next multiple of [`IPC_IO_ALIGN`]
///
/// Returns `None` if rounding would overflow `usize`.
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(IPC_IO_ALIGN - 1) {
        Some(v) => Some(v & !(IPC_IO_ALIGN - 1)),
        None => None,
    }
}

/// Name of the special-object backend selected at build time
pub fn object_backend() -> &'static str {
    if is_kernel_object() {
        "kernel-object"
    } else {
        "tagged-record"
    }
}

/// Check if the kernel-native object layout is selected
pub const fn is_kernel_object() -> bool {
    cfg!(feature = "kernel-object")
}

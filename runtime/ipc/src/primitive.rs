//! Fixed-width values
//!
//! Values are stored in the host's native representation. Both ends of a
//! channel run on the same architecture, so no byte-order or width
//! conversion is done.
//!
//! A C `char` is one byte on the wire: carry it as `u8` or `i8`, usually
//! through `push_unaligned`. Rust `char` is a different field, a 4-byte
//! Unicode scalar value.

use core::mem::size_of;

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width value that can be pushed to and popped from a message buffer
pub trait Primitive: Copy + sealed::Sealed {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Write the native representation into `dst[..Self::SIZE]`
    fn write_to(self, dst: &mut [u8]);

    /// Read a value back from `src[..Self::SIZE]`
    ///
    /// Returns `None` if `src` is too short or the bytes are not a valid value.
    fn read_from(src: &[u8]) -> Option<Self>;
}

/// Single-byte values that may be packed without alignment
pub trait Unaligned: Primitive {}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Primitive for $ty {
                const SIZE: usize = size_of::<$ty>();

                #[inline]
                fn write_to(self, dst: &mut [u8]) {
                    dst[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
                }

                #[inline]
                fn read_from(src: &[u8]) -> Option<Self> {
                    let bytes = src.get(..Self::SIZE)?.try_into().ok()?;
                    Some(<$ty>::from_ne_bytes(bytes))
                }
            }
        )*
    };
}

impl_primitive!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64);

impl sealed::Sealed for bool {}

impl Primitive for bool {
    const SIZE: usize = 1;

    #[inline]
    fn write_to(self, dst: &mut [u8]) {
        dst[0] = self as u8;
    }

    #[inline]
    fn read_from(src: &[u8]) -> Option<Self> {
        match *src.first()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }
}

// Stored as its 32-bit scalar value
impl sealed::Sealed for char {}

impl Primitive for char {
    const SIZE: usize = size_of::<u32>();

    #[inline]
    fn write_to(self, dst: &mut [u8]) {
        (self as u32).write_to(dst);
    }

    #[inline]
    fn read_from(src: &[u8]) -> Option<Self> {
        char::from_u32(u32::read_from(src)?)
    }
}

impl Unaligned for bool {}
impl Unaligned for i8 {}
impl Unaligned for u8 {}

//! Shared element-wise summation primitives used by the reduction engine
//! and the loopback transport.

use crate::error::{Result, StratumError};
use crate::types::{CommElement, DataType};

/// Trait for types that support element-wise accumulation.
trait Accumulate: Copy + 'static {
    fn add(a: Self, b: Self) -> Self;
    fn read_ne(bytes: &[u8]) -> Self;
    fn write_ne(self, bytes: &mut [u8]);
}

macro_rules! impl_accumulate {
    (int: $($ty:ty),*) => {
        $(
            impl Accumulate for $ty {
                #[inline]
                fn add(a: Self, b: Self) -> Self {
                    a.wrapping_add(b)
                }
                #[inline]
                fn read_ne(bytes: &[u8]) -> Self {
                    Self::from_ne_bytes(bytes.try_into().expect("slice length matches type size"))
                }
                #[inline]
                fn write_ne(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Accumulate for $ty {
                #[inline]
                fn add(a: Self, b: Self) -> Self {
                    a + b
                }
                #[inline]
                fn read_ne(bytes: &[u8]) -> Self {
                    Self::from_ne_bytes(bytes.try_into().expect("slice length matches type size"))
                }
                #[inline]
                fn write_ne(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_accumulate!(int: i32, i64);
impl_accumulate!(float: f32, f64);

/// Element-wise `dst += src` on byte slices interpreted as `dtype` elements.
///
/// `dst` and `src` must contain the same whole number of `dtype` elements.
pub(crate) fn accumulate_slice(dst: &mut [u8], src: &[u8], dtype: DataType) -> Result<()> {
    if dst.len() != src.len() {
        return Err(StratumError::BufferSizeMismatch {
            expected: dst.len(),
            actual: src.len(),
        });
    }
    if dst.len() % dtype.size_in_bytes() != 0 {
        return Err(StratumError::MisalignedBuffer {
            len: dst.len(),
            dtype,
        });
    }
    match dtype {
        DataType::I32 => accumulate_slice_typed::<i32>(dst, src),
        DataType::I64 => accumulate_slice_typed::<i64>(dst, src),
        DataType::F32 => accumulate_slice_typed::<f32>(dst, src),
        DataType::F64 => accumulate_slice_typed::<f64>(dst, src),
    }
    Ok(())
}

fn accumulate_slice_typed<T: Accumulate>(dst: &mut [u8], src: &[u8]) {
    let t_size = std::mem::size_of::<T>();
    for (d, s) in dst.chunks_exact_mut(t_size).zip(src.chunks_exact(t_size)) {
        let r = T::add(T::read_ne(d), T::read_ne(s));
        r.write_ne(d);
    }
}

/// View a slice of communicable elements as its raw bytes.
pub(crate) fn as_bytes<T: CommElement>(elems: &[T]) -> &[u8] {
    // Sound: CommElement is sealed to plain numeric types with no padding
    // and no invalid bit patterns.
    unsafe { std::slice::from_raw_parts(elems.as_ptr().cast::<u8>(), std::mem::size_of_val(elems)) }
}

/// View a mutable slice of communicable elements as its raw bytes.
pub(crate) fn as_bytes_mut<T: CommElement>(elems: &mut [T]) -> &mut [u8] {
    // Sound for the same reason as `as_bytes`; any byte pattern written back
    // is a valid element value.
    unsafe {
        std::slice::from_raw_parts_mut(
            elems.as_mut_ptr().cast::<u8>(),
            std::mem::size_of_val(elems),
        )
    }
}

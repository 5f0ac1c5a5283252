//! Conversion between [`Value`]s and native-sized memory cells.
//!
//! Arguments are written into invocation-local [`MarshalBuffer`]s, one per
//! parameter, grouped in an [`ArgFrame`]. Results are read back from the
//! [`ReturnCell`] libffi writes into.

use std::ffi::{c_void, CString};
use std::ptr;

use crate::error::{FfiError, MarshalError};
use crate::types::{PlatformWidths, TypeTag};
use crate::value::{integer_value, read_c_string, Value};

mod sealed {
    pub trait Sealed {}
}

/// Plain scalar types for which every bit pattern is a valid value.
pub trait Scalar: Copy + sealed::Sealed {}

macro_rules! scalar {
    ($($ty:ty),*) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Scalar for $ty {}
        )*
    };
}

scalar!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize, f32, f64);

/// One argument slot, large and aligned enough for any supported scalar.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCell([u8; 8]);

impl NativeCell {
    fn holding<T: Scalar>(value: T) -> Self {
        debug_assert!(std::mem::size_of::<T>() <= 8);
        let mut cell = Self::default();
        // SAFETY: T is a scalar no larger than the cell.
        unsafe { ptr::write_unaligned(cell.0.as_mut_ptr() as *mut T, value) };
        cell
    }

    pub fn read<T: Scalar>(&self) -> T {
        // SAFETY: any bit pattern is a valid scalar.
        unsafe { ptr::read_unaligned(self.0.as_ptr() as *const T) }
    }

    fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr() as *mut c_void
    }
}

/// Buffer the engine writes a result into.
///
/// libffi widens integral results narrower than a machine word to a full
/// `ffi_arg`, so narrow integers are read as a word and truncated.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnCell([u8; 16]);

impl ReturnCell {
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.0.as_mut_ptr() as *mut c_void
    }

    pub fn read<T: Scalar>(&self) -> T {
        // SAFETY: any bit pattern is a valid scalar and the cell is 16 bytes.
        unsafe { ptr::read_unaligned(self.0.as_ptr() as *const T) }
    }

    /// Store a scalar the way the engine would, for stand-in results.
    pub fn store<T: Scalar>(&mut self, value: T) {
        *self = Self::default();
        // SAFETY: T is at most 8 bytes.
        unsafe { ptr::write_unaligned(self.0.as_mut_ptr() as *mut T, value) };
    }

    /// Read a narrow integer result out of its widened word.
    fn word(&self) -> usize {
        self.read::<usize>()
    }
}

/// Native copy of a single argument plus whatever must outlive the call.
#[derive(Debug)]
pub struct MarshalBuffer {
    cell: NativeCell,
    owned: Option<CString>,
}

impl MarshalBuffer {
    fn scalar<T: Scalar>(value: T) -> Self {
        Self {
            cell: NativeCell::holding(value),
            owned: None,
        }
    }

    pub fn cell(&self) -> &NativeCell {
        &self.cell
    }

    /// Whether releasing this buffer frees a transient native copy.
    pub fn has_release(&self) -> bool {
        self.owned.is_some()
    }

    /// Free any transient native copy. Returns whether one was freed.
    pub fn release(mut self) -> bool {
        let owned = self.owned.take();
        let freed = owned.is_some();
        drop(owned);
        freed
    }

    fn as_arg_ptr(&self) -> *mut c_void {
        self.cell.as_ptr()
    }
}

/// Marshal one argument with the process-wide platform widths.
pub fn marshal_arg(value: &Value, tag: TypeTag) -> Result<MarshalBuffer, MarshalError> {
    marshal_arg_with(value, tag, PlatformWidths::current())
}

/// Marshal one argument into a native-sized cell in native byte order.
///
/// Integer values convert to any integer tag and float values to any float
/// tag with C cast semantics; other combinations are a type mismatch.
pub fn marshal_arg_with(
    value: &Value,
    tag: TypeTag,
    widths: &PlatformWidths,
) -> Result<MarshalBuffer, MarshalError> {
    let mismatch = || MarshalError::TypeMismatch {
        value: value.tag(),
        tag,
    };

    if tag.is_integer() {
        let v = value.as_integer().ok_or_else(mismatch)?;
        let buffer = match tag {
            TypeTag::Int8 => MarshalBuffer::scalar(v as i8),
            TypeTag::Int16 => MarshalBuffer::scalar(v as i16),
            TypeTag::Int32 => MarshalBuffer::scalar(v as i32),
            TypeTag::Int64 => MarshalBuffer::scalar(v as i64),
            TypeTag::UInt8 => MarshalBuffer::scalar(v as u8),
            TypeTag::UInt16 => MarshalBuffer::scalar(v as u16),
            TypeTag::UInt32 => MarshalBuffer::scalar(v as u32),
            TypeTag::UInt64 => MarshalBuffer::scalar(v as u64),
            TypeTag::Int if widths.int_size == 2 => MarshalBuffer::scalar(v as i16),
            TypeTag::Int => MarshalBuffer::scalar(v as i32),
            TypeTag::UInt if widths.int_size == 2 => MarshalBuffer::scalar(v as u16),
            _ => MarshalBuffer::scalar(v as u32),
        };
        return Ok(buffer);
    }

    match tag {
        TypeTag::Bool => match value {
            Value::Bool(b) if widths.bool_size == 1 => Ok(MarshalBuffer::scalar(*b as i8)),
            Value::Bool(b) => Ok(MarshalBuffer::scalar(*b as i16)),
            _ => Err(mismatch()),
        },
        TypeTag::Float32 => {
            let v = value.as_float().ok_or_else(mismatch)?;
            Ok(MarshalBuffer::scalar(v as f32))
        }
        TypeTag::Float64 => {
            let v = value.as_float().ok_or_else(mismatch)?;
            Ok(MarshalBuffer::scalar(v))
        }
        TypeTag::Pointer | TypeTag::UintPtr | TypeTag::UnsafePointer => {
            let addr = value.as_address().ok_or_else(mismatch)?;
            Ok(MarshalBuffer::scalar(addr))
        }
        TypeTag::String => match value {
            Value::String(s) => {
                let owned = CString::new(s.as_str())
                    .map_err(|e| MarshalError::InteriorNul(e.nul_position()))?;
                // The heap allocation behind a CString does not move with it.
                Ok(MarshalBuffer {
                    cell: NativeCell::holding(owned.as_ptr() as usize),
                    owned: Some(owned),
                })
            }
            _ => Err(mismatch()),
        },
        TypeTag::Void | TypeTag::ErrorSentinel => Err(MarshalError::UnsupportedType(tag)),
        _ => Err(mismatch()),
    }
}

/// Read a result cell back into a value of the type implied by `tag`.
pub fn unmarshal_return(cell: &ReturnCell, tag: TypeTag) -> Result<Value, MarshalError> {
    unmarshal_return_with(cell, tag, PlatformWidths::current())
}

pub fn unmarshal_return_with(
    cell: &ReturnCell,
    tag: TypeTag,
    widths: &PlatformWidths,
) -> Result<Value, MarshalError> {
    let word = cell.word();
    let value = match tag {
        TypeTag::Void => Value::Void,
        TypeTag::Int8 => Value::I8(word as i8),
        TypeTag::Int16 => Value::I16(word as i16),
        TypeTag::Int32 => Value::I32(word as i32),
        TypeTag::Int64 => Value::I64(cell.read::<i64>()),
        TypeTag::UInt8 => Value::U8(word as u8),
        TypeTag::UInt16 => Value::U16(word as u16),
        TypeTag::UInt32 => Value::U32(word as u32),
        TypeTag::UInt64 => Value::U64(cell.read::<u64>()),
        TypeTag::Int if widths.int_size == 2 => integer_value(word as i16 as i128, tag),
        TypeTag::Int => integer_value(word as i32 as i128, tag),
        TypeTag::UInt if widths.int_size == 2 => integer_value(word as u16 as i128, tag),
        TypeTag::UInt => integer_value(word as u32 as i128, tag),
        TypeTag::Bool if widths.bool_size == 1 => Value::Bool(word as i8 != 0),
        TypeTag::Bool => Value::Bool(word as i16 != 0),
        TypeTag::Float32 => Value::F32(cell.read::<f32>()),
        TypeTag::Float64 => Value::F64(cell.read::<f64>()),
        TypeTag::Pointer => Value::Pointer(word),
        TypeTag::UintPtr => Value::UintPtr(word),
        TypeTag::UnsafePointer => Value::UnsafePointer(word),
        // SAFETY: the native function was declared as returning a C string.
        // The buffer stays owned by the native side.
        TypeTag::String => Value::String(unsafe { read_c_string(word) }),
        TypeTag::ErrorSentinel => return Err(MarshalError::UnsupportedType(tag)),
    };
    Ok(value)
}

/// All marshaled arguments of one invocation.
#[derive(Debug, Default)]
pub struct ArgFrame {
    buffers: Vec<MarshalBuffer>,
}

impl ArgFrame {
    /// Marshal every argument against its tag. On the first failure the
    /// buffers built so far are released before the error is returned.
    pub fn marshal(values: &[Value], tags: &[TypeTag]) -> Result<Self, FfiError> {
        let mut frame = ArgFrame {
            buffers: Vec::with_capacity(values.len()),
        };
        if let Err(err) = frame.push_all(values, tags) {
            let released = frame.release();
            log::trace!("released {released} string copies after error: {err}");
            return Err(err);
        }
        Ok(frame)
    }

    /// Append buffers until one argument fails. Buffers built before the
    /// failure stay in the frame.
    fn push_all(&mut self, values: &[Value], tags: &[TypeTag]) -> Result<(), FfiError> {
        for (index, (value, tag)) in values.iter().zip(tags).enumerate() {
            let buffer =
                marshal_arg(value, *tag).map_err(|source| FfiError::Marshal { index, source })?;
            self.buffers.push(buffer);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Argument-pointer vector for `ffi_call`, one entry per buffer.
    ///
    /// The pointers stay valid while `self` is alive and unmodified.
    pub fn pointers(&self) -> Vec<*mut c_void> {
        self.buffers.iter().map(MarshalBuffer::as_arg_ptr).collect()
    }

    /// Release every buffer. Returns the number of transient native copies
    /// freed.
    pub fn release(self) -> usize {
        self.buffers
            .into_iter()
            .map(MarshalBuffer::release)
            .filter(|freed| *freed)
            .count()
    }
}

//! Managed values passed to and returned from callables.

use std::ffi::{c_char, CStr};

use crate::error::{FfiError, MarshalError};
use crate::types::TypeTag;

/// A dynamically typed argument or result.
///
/// Pointer-like variants carry plain addresses so values stay `Send`; what
/// the address points to is the caller's business.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    /// Native `int`, narrowed to the platform width on the way out.
    Int(isize),
    /// Native `unsigned int`, narrowed to the platform width on the way out.
    UInt(usize),
    F32(f32),
    F64(f64),
    Pointer(usize),
    UintPtr(usize),
    UnsafePointer(usize),
    String(String),
    /// Content of the error slot; `None` means the call succeeded.
    Error(Option<FfiError>),
}

impl Value {
    /// The tag this value naturally marshals as.
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Void => TypeTag::Void,
            Value::Bool(_) => TypeTag::Bool,
            Value::I8(_) => TypeTag::Int8,
            Value::I16(_) => TypeTag::Int16,
            Value::I32(_) => TypeTag::Int32,
            Value::I64(_) => TypeTag::Int64,
            Value::U8(_) => TypeTag::UInt8,
            Value::U16(_) => TypeTag::UInt16,
            Value::U32(_) => TypeTag::UInt32,
            Value::U64(_) => TypeTag::UInt64,
            Value::Int(_) => TypeTag::Int,
            Value::UInt(_) => TypeTag::UInt,
            Value::F32(_) => TypeTag::Float32,
            Value::F64(_) => TypeTag::Float64,
            Value::Pointer(_) => TypeTag::Pointer,
            Value::UintPtr(_) => TypeTag::UintPtr,
            Value::UnsafePointer(_) => TypeTag::UnsafePointer,
            Value::String(_) => TypeTag::String,
            Value::Error(_) => TypeTag::ErrorSentinel,
        }
    }

    /// Zero value of a tag, used to fill the primary result when a call
    /// fails through the error slot.
    pub fn zero(tag: TypeTag) -> Value {
        match tag {
            TypeTag::Void => Value::Void,
            TypeTag::Bool => Value::Bool(false),
            TypeTag::Int8 => Value::I8(0),
            TypeTag::Int16 => Value::I16(0),
            TypeTag::Int32 => Value::I32(0),
            TypeTag::Int64 => Value::I64(0),
            TypeTag::UInt8 => Value::U8(0),
            TypeTag::UInt16 => Value::U16(0),
            TypeTag::UInt32 => Value::U32(0),
            TypeTag::UInt64 => Value::U64(0),
            TypeTag::Int => Value::Int(0),
            TypeTag::UInt => Value::UInt(0),
            TypeTag::Float32 => Value::F32(0.0),
            TypeTag::Float64 => Value::F64(0.0),
            TypeTag::Pointer => Value::Pointer(0),
            TypeTag::UintPtr => Value::UintPtr(0),
            TypeTag::UnsafePointer => Value::UnsafePointer(0),
            TypeTag::String => Value::String(String::new()),
            TypeTag::ErrorSentinel => Value::Error(None),
        }
    }

    /// Integer payload widened to `i128`, for any integer variant.
    pub(crate) fn as_integer(&self) -> Option<i128> {
        let v = match *self {
            Value::I8(v) => v as i128,
            Value::I16(v) => v as i128,
            Value::I32(v) => v as i128,
            Value::I64(v) => v as i128,
            Value::U8(v) => v as i128,
            Value::U16(v) => v as i128,
            Value::U32(v) => v as i128,
            Value::U64(v) => v as i128,
            Value::Int(v) => v as i128,
            Value::UInt(v) => v as i128,
            _ => return None,
        };
        Some(v)
    }

    pub(crate) fn as_float(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn as_address(&self) -> Option<usize> {
        match *self {
            Value::Pointer(v) | Value::UintPtr(v) | Value::UnsafePointer(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a decoded native result into the caller's declared result
    /// type.
    ///
    /// Conversions stay within a family (integers, floats, pointers) using C
    /// cast semantics. A pointer converted to `String` is read as a
    /// NUL-terminated C string.
    pub fn convert_to(self, tag: TypeTag) -> Result<Value, MarshalError> {
        if self.tag() == tag {
            return Ok(self);
        }
        let mismatch = MarshalError::TypeMismatch {
            value: self.tag(),
            tag,
        };
        if tag == TypeTag::Void {
            return Ok(Value::Void);
        }
        if tag.is_integer() {
            return self.as_integer().map(|v| integer_value(v, tag)).ok_or(mismatch);
        }
        match tag {
            TypeTag::Bool => match self.as_integer() {
                Some(v) => Ok(Value::Bool(v != 0)),
                None => Err(mismatch),
            },
            TypeTag::Float32 => self.as_float().map(|v| Value::F32(v as f32)).ok_or(mismatch),
            TypeTag::Float64 => self.as_float().map(Value::F64).ok_or(mismatch),
            TypeTag::Pointer => self.as_address().map(Value::Pointer).ok_or(mismatch),
            TypeTag::UintPtr => self.as_address().map(Value::UintPtr).ok_or(mismatch),
            TypeTag::UnsafePointer => self
                .as_address()
                .map(Value::UnsafePointer)
                .ok_or(mismatch),
            TypeTag::String => match self.as_address() {
                // SAFETY: the address came back from native code declared as
                // returning a C string.
                Some(addr) => Ok(Value::String(unsafe { read_c_string(addr) })),
                None => Err(mismatch),
            },
            _ => Err(mismatch),
        }
    }
}

/// Build the value variant for an integer tag, truncating like a C cast.
pub(crate) fn integer_value(v: i128, tag: TypeTag) -> Value {
    match tag {
        TypeTag::Int8 => Value::I8(v as i8),
        TypeTag::Int16 => Value::I16(v as i16),
        TypeTag::Int32 => Value::I32(v as i32),
        TypeTag::Int64 => Value::I64(v as i64),
        TypeTag::UInt8 => Value::U8(v as u8),
        TypeTag::UInt16 => Value::U16(v as u16),
        TypeTag::UInt32 => Value::U32(v as u32),
        TypeTag::UInt64 => Value::U64(v as u64),
        TypeTag::Int => Value::Int(v as isize),
        TypeTag::UInt => Value::UInt(v as usize),
        _ => Value::I64(v as i64),
    }
}

/// Copy a NUL-terminated string out of native memory. Null reads as empty.
///
/// # Safety
///
/// `addr` must be null or point to a readable NUL-terminated buffer.
pub(crate) unsafe fn read_c_string(addr: usize) -> String {
    if addr == 0 {
        return String::new();
    }
    CStr::from_ptr(addr as *const c_char)
        .to_string_lossy()
        .into_owned()
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    isize => Int,
    usize => UInt,
    f32 => F32,
    f64 => F64,
    String => String,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_zero_matches_tag() {
        for tag in [
            TypeTag::Bool,
            TypeTag::Int16,
            TypeTag::UInt,
            TypeTag::Float64,
            TypeTag::UnsafePointer,
            TypeTag::String,
        ] {
            assert_eq!(Value::zero(tag).tag(), tag);
        }
    }

    #[test]
    fn test_converts_to_agrees_with_convert_to() {
        let tags = [
            TypeTag::Void,
            TypeTag::Bool,
            TypeTag::Int8,
            TypeTag::UInt16,
            TypeTag::Int64,
            TypeTag::Int,
            TypeTag::UInt,
            TypeTag::Float32,
            TypeTag::Float64,
            TypeTag::Pointer,
            TypeTag::UintPtr,
            TypeTag::UnsafePointer,
            TypeTag::String,
        ];
        for native in tags {
            for managed in tags {
                assert_eq!(
                    native.converts_to(managed),
                    Value::zero(native).convert_to(managed).is_ok(),
                    "{native} -> {managed}"
                );
            }
        }
        assert!(!TypeTag::Void.converts_to(TypeTag::Int));
        assert!(!TypeTag::Int32.converts_to(TypeTag::String));
        assert!(TypeTag::Pointer.converts_to(TypeTag::String));
    }

    #[test]
    fn test_convert_integer_truncates() {
        let v = Value::I64(0x1_0000_0001).convert_to(TypeTag::UInt32).unwrap();
        assert_eq!(v, Value::U32(1));
        let v = Value::I8(-1).convert_to(TypeTag::UInt8).unwrap();
        assert_eq!(v, Value::U8(255));
    }

    #[test]
    fn test_convert_integer_to_bool() {
        assert_eq!(
            Value::I8(1).convert_to(TypeTag::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::I16(0).convert_to(TypeTag::Bool).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_convert_across_families_fails() {
        let err = Value::F64(1.0).convert_to(TypeTag::Int32).unwrap_err();
        assert_eq!(
            err,
            MarshalError::TypeMismatch {
                value: TypeTag::Float64,
                tag: TypeTag::Int32
            }
        );
    }

    #[test]
    fn test_convert_pointer_to_string() {
        let text = CString::new("native").unwrap();
        let v = Value::UintPtr(text.as_ptr() as usize)
            .convert_to(TypeTag::String)
            .unwrap();
        assert_eq!(v, Value::String("native".to_string()));
        assert_eq!(
            Value::UintPtr(0).convert_to(TypeTag::String).unwrap(),
            Value::String(String::new())
        );
    }

    #[test]
    fn test_anything_converts_to_void() {
        assert_eq!(Value::F32(1.5).convert_to(TypeTag::Void).unwrap(), Value::Void);
    }
}

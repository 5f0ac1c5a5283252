//! Type tags, ABI descriptors and function signatures.
//!
//! A [`TypeTag`] names the semantic type of a parameter or result as the
//! caller sees it. The type mapper turns tags into [`AbiType`]s, the
//! descriptors libffi understands, and back again when no better type hint
//! is available.

use std::ffi::c_int;
use std::fmt;
use std::ptr::addr_of_mut;

use libffi::low::{ffi_type, types};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::FfiError;

/// Semantic type of a parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    /// No value. Legal as a return type, or as the sole parameter marker.
    Void,
    /// Native `_Bool`, passed as a 0/1 integer.
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    /// Native `int`; width follows the platform.
    Int,
    /// Native `unsigned int`; width follows the platform.
    UInt,
    Float32,
    Float64,
    /// Pointer to caller-owned memory.
    Pointer,
    /// Address held as an integer.
    UintPtr,
    /// Untyped `void *`.
    UnsafePointer,
    /// NUL-terminated `char *`.
    String,
    /// Trailing error slot of a managed signature. Never crosses the ABI.
    ErrorSentinel,
}

impl TypeTag {
    /// Parse a tag from its signature-file spelling or a common C alias.
    pub fn parse(s: &str) -> Option<Self> {
        let tag = match s.trim().to_lowercase().as_str() {
            "void" => TypeTag::Void,
            "bool" | "_bool" => TypeTag::Bool,
            "i8" | "int8" | "int8_t" | "char" => TypeTag::Int8,
            "i16" | "int16" | "int16_t" | "short" => TypeTag::Int16,
            "i32" | "int32" | "int32_t" => TypeTag::Int32,
            "i64" | "int64" | "int64_t" | "long long" => TypeTag::Int64,
            "u8" | "uint8" | "uint8_t" => TypeTag::UInt8,
            "u16" | "uint16" | "uint16_t" => TypeTag::UInt16,
            "u32" | "uint32" | "uint32_t" => TypeTag::UInt32,
            "u64" | "uint64" | "uint64_t" => TypeTag::UInt64,
            "int" => TypeTag::Int,
            "uint" | "unsigned" | "unsigned int" => TypeTag::UInt,
            "f32" | "float" => TypeTag::Float32,
            "f64" | "double" => TypeTag::Float64,
            "ptr" | "pointer" => TypeTag::Pointer,
            "uintptr" | "uintptr_t" | "size_t" | "usize" => TypeTag::UintPtr,
            "unsafe_ptr" | "void*" | "void *" => TypeTag::UnsafePointer,
            "string" | "str" | "char*" | "char *" | "const char*" | "const char *" => {
                TypeTag::String
            }
            "error" => TypeTag::ErrorSentinel,
            _ => return None,
        };
        Some(tag)
    }

    /// Map this tag to its argument-side ABI descriptor.
    pub fn to_abi(self) -> Result<AbiType, FfiError> {
        self.to_abi_with(PlatformWidths::current())
    }

    /// Map this tag to a return-side ABI descriptor. Only here does `Void`
    /// have a descriptor.
    pub fn to_abi_return(self) -> Result<AbiType, FfiError> {
        match self {
            TypeTag::Void => Ok(AbiType::Void),
            other => other.to_abi(),
        }
    }

    /// Argument-side mapping against explicit platform widths.
    pub fn to_abi_with(self, widths: &PlatformWidths) -> Result<AbiType, FfiError> {
        let abi = match self {
            TypeTag::String | TypeTag::Pointer | TypeTag::UnsafePointer | TypeTag::UintPtr => {
                AbiType::Pointer
            }
            TypeTag::Int if widths.int_size == 2 => AbiType::SInt16,
            TypeTag::Int => AbiType::SInt32,
            TypeTag::UInt if widths.int_size == 2 => AbiType::UInt16,
            TypeTag::UInt => AbiType::UInt32,
            TypeTag::Int8 => AbiType::SInt8,
            TypeTag::Int16 => AbiType::SInt16,
            TypeTag::Int32 => AbiType::SInt32,
            TypeTag::Int64 => AbiType::SInt64,
            TypeTag::UInt8 => AbiType::UInt8,
            TypeTag::UInt16 => AbiType::UInt16,
            TypeTag::UInt32 => AbiType::UInt32,
            TypeTag::UInt64 => AbiType::UInt64,
            TypeTag::Bool if widths.bool_size == 1 => AbiType::SInt8,
            TypeTag::Bool => AbiType::SInt16,
            TypeTag::Float32 => AbiType::Float,
            TypeTag::Float64 => AbiType::Double,
            TypeTag::Void => return Err(FfiError::IllegalVoidParameter { position: 0 }),
            TypeTag::ErrorSentinel => return Err(FfiError::UnsupportedType { tag: self }),
        };
        Ok(abi)
    }

    /// Default tag for an ABI descriptor, used when a result has no type hint.
    ///
    /// Lossy: every descriptor shared by several tags decodes to one of them.
    pub fn from_abi(abi: AbiType) -> Self {
        match abi {
            AbiType::Void => TypeTag::Void,
            AbiType::UInt8 => TypeTag::UInt8,
            AbiType::SInt8 => TypeTag::Int8,
            AbiType::UInt16 => TypeTag::UInt16,
            AbiType::SInt16 => TypeTag::Int16,
            AbiType::UInt32 => TypeTag::UInt32,
            AbiType::SInt32 => TypeTag::Int32,
            AbiType::UInt64 => TypeTag::UInt64,
            AbiType::SInt64 => TypeTag::Int64,
            AbiType::Float => TypeTag::Float32,
            AbiType::Double => TypeTag::Float64,
            AbiType::Pointer => TypeTag::UintPtr,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeTag::Int8
                | TypeTag::Int16
                | TypeTag::Int32
                | TypeTag::Int64
                | TypeTag::UInt8
                | TypeTag::UInt16
                | TypeTag::UInt32
                | TypeTag::UInt64
                | TypeTag::Int
                | TypeTag::UInt
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeTag::Float32 | TypeTag::Float64)
    }

    pub fn is_pointer(self) -> bool {
        matches!(
            self,
            TypeTag::Pointer | TypeTag::UintPtr | TypeTag::UnsafePointer
        )
    }

    /// Whether a native result of this type can be handed back as `target`.
    /// Matches the conversions [`Value::convert_to`](crate::Value::convert_to)
    /// accepts.
    pub fn converts_to(self, target: TypeTag) -> bool {
        if self == target || target == TypeTag::Void {
            return true;
        }
        match target {
            TypeTag::Bool => self.is_integer(),
            TypeTag::Float32 | TypeTag::Float64 => self.is_float(),
            TypeTag::Pointer | TypeTag::UintPtr | TypeTag::UnsafePointer | TypeTag::String => {
                self.is_pointer()
            }
            TypeTag::ErrorSentinel => false,
            _ => target.is_integer() && self.is_integer(),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Void => "void",
            TypeTag::Bool => "bool",
            TypeTag::Int8 => "i8",
            TypeTag::Int16 => "i16",
            TypeTag::Int32 => "i32",
            TypeTag::Int64 => "i64",
            TypeTag::UInt8 => "u8",
            TypeTag::UInt16 => "u16",
            TypeTag::UInt32 => "u32",
            TypeTag::UInt64 => "u64",
            TypeTag::Int => "int",
            TypeTag::UInt => "uint",
            TypeTag::Float32 => "f32",
            TypeTag::Float64 => "f64",
            TypeTag::Pointer => "ptr",
            TypeTag::UintPtr => "uintptr",
            TypeTag::UnsafePointer => "unsafe_ptr",
            TypeTag::String => "string",
            TypeTag::ErrorSentinel => "error",
        };
        f.write_str(name)
    }
}

/// Native ABI type descriptor, one per libffi built-in scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiType {
    Void,
    UInt8,
    SInt8,
    UInt16,
    SInt16,
    UInt32,
    SInt32,
    UInt64,
    SInt64,
    Float,
    Double,
    Pointer,
}

impl AbiType {
    /// Pointer to the matching libffi static descriptor.
    ///
    /// libffi never writes to the built-in scalar descriptors, so handing out
    /// `*mut` pointers to them from shared code is sound.
    pub fn as_raw(self) -> *mut ffi_type {
        match self {
            AbiType::Void => addr_of_mut!(types::void),
            AbiType::UInt8 => addr_of_mut!(types::uint8),
            AbiType::SInt8 => addr_of_mut!(types::sint8),
            AbiType::UInt16 => addr_of_mut!(types::uint16),
            AbiType::SInt16 => addr_of_mut!(types::sint16),
            AbiType::UInt32 => addr_of_mut!(types::uint32),
            AbiType::SInt32 => addr_of_mut!(types::sint32),
            AbiType::UInt64 => addr_of_mut!(types::uint64),
            AbiType::SInt64 => addr_of_mut!(types::sint64),
            AbiType::Float => addr_of_mut!(types::float),
            AbiType::Double => addr_of_mut!(types::double),
            AbiType::Pointer => addr_of_mut!(types::pointer),
        }
    }

    /// Size in bytes of a value of this type.
    pub fn size(self) -> usize {
        match self {
            AbiType::Void => 0,
            AbiType::UInt8 | AbiType::SInt8 => 1,
            AbiType::UInt16 | AbiType::SInt16 => 2,
            AbiType::UInt32 | AbiType::SInt32 | AbiType::Float => 4,
            AbiType::UInt64 | AbiType::SInt64 | AbiType::Double => 8,
            AbiType::Pointer => std::mem::size_of::<usize>(),
        }
    }
}

/// Native widths that vary by platform, resolved once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformWidths {
    /// `sizeof(int)`: 2 or 4.
    pub int_size: usize,
    /// `sizeof(_Bool)`: 1 or 2.
    pub bool_size: usize,
}

static PLATFORM_WIDTHS: Lazy<PlatformWidths> = Lazy::new(|| {
    let widths = PlatformWidths {
        int_size: std::mem::size_of::<c_int>(),
        bool_size: std::mem::size_of::<bool>(),
    };
    log::debug!(
        "native widths: int={} bytes, bool={} bytes",
        widths.int_size,
        widths.bool_size
    );
    widths
});

impl PlatformWidths {
    pub fn current() -> &'static PlatformWidths {
        &PLATFORM_WIDTHS
    }
}

/// Native signature: what the calling-convention engine sees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Vec<TypeTag>,
    ret: TypeTag,
    returns_error: bool,
}

impl Signature {
    pub fn new(params: Vec<TypeTag>, ret: TypeTag, returns_error: bool) -> Self {
        Self {
            params,
            ret,
            returns_error,
        }
    }

    /// Declared parameters, including a sole `Void` marker if present.
    pub fn params(&self) -> &[TypeTag] {
        &self.params
    }

    pub fn ret(&self) -> TypeTag {
        self.ret
    }

    pub fn returns_error(&self) -> bool {
        self.returns_error
    }

    /// Parameters actually passed to the native function. A sole `Void`
    /// parameter means zero arguments.
    pub fn native_params(&self) -> &[TypeTag] {
        match self.params.as_slice() {
            [TypeTag::Void] => &[],
            params => params,
        }
    }

    /// Translate the parameters into ABI descriptors, rejecting `Void`
    /// anywhere except as the sole parameter.
    pub fn abi_params(&self) -> Result<Vec<AbiType>, FfiError> {
        self.native_params()
            .iter()
            .enumerate()
            .map(|(position, tag)| match tag {
                TypeTag::Void => Err(FfiError::IllegalVoidParameter { position }),
                tag => tag.to_abi(),
            })
            .collect()
    }

    pub fn abi_return(&self) -> Result<AbiType, FfiError> {
        self.ret.to_abi_return()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)?;
        if self.returns_error {
            write!(f, ", error")?;
        }
        Ok(())
    }
}

/// Caller-side signature: parameters plus up to two results, the second of
/// which must be the error slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedSignature {
    pub params: Vec<TypeTag>,
    pub results: Vec<TypeTag>,
}

impl ManagedSignature {
    pub fn new(params: Vec<TypeTag>, results: Vec<TypeTag>) -> Self {
        Self { params, results }
    }

    /// Build the shape used by `bind`: one primary result, optionally
    /// followed by the error slot.
    pub fn with_result(params: Vec<TypeTag>, ret: TypeTag, returns_error: bool) -> Self {
        let mut results = vec![ret];
        if returns_error {
            results.push(TypeTag::ErrorSentinel);
        }
        Self { params, results }
    }

    /// Validate the result shape and report whether the error slot is
    /// declared.
    pub fn returns_error(&self) -> Result<bool, FfiError> {
        match self.results.as_slice() {
            [] | [_] => Ok(false),
            [_, TypeTag::ErrorSentinel] => Ok(true),
            results => Err(FfiError::MultiReturnUnsupported {
                count: results.len(),
            }),
        }
    }

    /// Primary result type; `Void` when nothing is returned.
    pub fn primary_result(&self) -> TypeTag {
        self.results.first().copied().unwrap_or(TypeTag::Void)
    }

    /// Derive the native signature of the same shape.
    pub fn to_native(&self) -> Result<Signature, FfiError> {
        let returns_error = self.returns_error()?;
        Ok(Signature::new(
            self.params.clone(),
            self.primary_result(),
            returns_error,
        ))
    }
}

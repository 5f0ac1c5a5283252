//! Statically typed wrappers over [`Callable`].
//!
//! ```no_run
//! use nativecall::{BindMode, Function, NativeLibrary};
//!
//! let libm = NativeLibrary::open("m", BindMode::default())?;
//! let mut sqrt: Option<Function<(f64,), f64>> = None;
//! libm.bind_into("sqrt", &mut sqrt)?;
//! if let Some(sqrt) = &sqrt {
//!     assert_eq!(sqrt.call((9.0,)), 3.0);
//! }
//! # Ok::<(), nativecall::FfiError>(())
//! ```

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;

use crate::error::{FfiError, MarshalError};
use crate::stub::Callable;
use crate::types::{ManagedSignature, TypeTag};
use crate::value::Value;

mod sealed {
    pub trait Sealed {}
}

/// A Rust type with a fixed [`TypeTag`].
pub trait NativeType: Sized + sealed::Sealed {
    const TAG: TypeTag;

    fn into_value(self) -> Value;

    /// `None` unless `value` is exactly this type's variant.
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! native_type {
    ($($ty:ty => $tag:ident, $variant:ident);* $(;)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl NativeType for $ty {
                const TAG: TypeTag = TypeTag::$tag;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

native_type! {
    bool => Bool, Bool;
    i8 => Int8, I8;
    i16 => Int16, I16;
    i32 => Int32, I32;
    i64 => Int64, I64;
    u8 => UInt8, U8;
    u16 => UInt16, U16;
    u32 => UInt32, U32;
    u64 => UInt64, U64;
    isize => Int, Int;
    usize => UInt, UInt;
    f32 => Float32, F32;
    f64 => Float64, F64;
    String => String, String;
}

impl sealed::Sealed for () {}

impl NativeType for () {
    const TAG: TypeTag = TypeTag::Void;

    fn into_value(self) -> Value {
        Value::Void
    }

    fn from_value(value: Value) -> Option<Self> {
        matches!(value, Value::Void).then_some(())
    }
}

impl sealed::Sealed for *mut c_void {}

impl NativeType for *mut c_void {
    const TAG: TypeTag = TypeTag::UnsafePointer;

    fn into_value(self) -> Value {
        Value::UnsafePointer(self as usize)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::UnsafePointer(addr) => Some(addr as *mut c_void),
            _ => None,
        }
    }
}

impl sealed::Sealed for *const c_void {}

impl NativeType for *const c_void {
    const TAG: TypeTag = TypeTag::Pointer;

    fn into_value(self) -> Value {
        Value::Pointer(self as usize)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Pointer(addr) => Some(addr as *const c_void),
            _ => None,
        }
    }
}

/// Argument tuples.
pub trait ArgList {
    fn tags() -> Vec<TypeTag>;

    fn into_values(self) -> Vec<Value>;
}

macro_rules! arg_list {
    ($($name:ident),*) => {
        impl<$($name: NativeType),*> ArgList for ($($name,)*) {
            fn tags() -> Vec<TypeTag> {
                vec![$($name::TAG),*]
            }

            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<Value> {
                let ($($name,)*) = self;
                vec![$($name.into_value()),*]
            }
        }
    };
}

arg_list!();
arg_list!(A);
arg_list!(A, B);
arg_list!(A, B, C);
arg_list!(A, B, C, D);
arg_list!(A, B, C, D, E);
arg_list!(A, B, C, D, E, F);
arg_list!(A, B, C, D, E, F, G);
arg_list!(A, B, C, D, E, F, G, H);

/// Result types of a [`Function`].
///
/// A plain [`NativeType`] panics on call-time failures like
/// [`Callable::invoke`]; `Result<T, FfiError>` declares the error slot and
/// returns them.
pub trait ReturnType: Sized {
    const RESULT: TypeTag;
    const RETURNS_ERROR: bool;

    fn from_outcome(symbol: &str, outcome: Result<Option<Value>, FfiError>) -> Self;
}

fn typed_result<T: NativeType>(value: Option<Value>) -> Result<T, FfiError> {
    let value = value.unwrap_or(Value::Void);
    let found = value.tag();
    T::from_value(value).ok_or(FfiError::Unmarshal(MarshalError::TypeMismatch {
        value: found,
        tag: T::TAG,
    }))
}

macro_rules! return_type {
    ($($ty:ty),*) => {
        $(
            impl ReturnType for $ty {
                const RESULT: TypeTag = <$ty as NativeType>::TAG;
                const RETURNS_ERROR: bool = false;

                fn from_outcome(symbol: &str, outcome: Result<Option<Value>, FfiError>) -> Self {
                    match outcome.and_then(typed_result) {
                        Ok(value) => value,
                        Err(err) => panic!("calling '{}': {}", symbol, err),
                    }
                }
            }

            impl ReturnType for Result<$ty, FfiError> {
                const RESULT: TypeTag = <$ty as NativeType>::TAG;
                const RETURNS_ERROR: bool = true;

                fn from_outcome(_symbol: &str, outcome: Result<Option<Value>, FfiError>) -> Self {
                    outcome.and_then(typed_result)
                }
            }
        )*
    };
}

return_type!(
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    isize,
    usize,
    f32,
    f64,
    String,
    *mut c_void,
    *const c_void
);

/// A bound native function with a Rust signature `A -> R`.
pub struct Function<A, R> {
    callable: Callable,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A: ArgList, R: ReturnType> Function<A, R> {
    pub(crate) fn new(callable: Callable) -> Self {
        Self {
            callable,
            _signature: PhantomData,
        }
    }

    /// Managed signature implied by `A` and `R`.
    pub fn signature() -> ManagedSignature {
        ManagedSignature::with_result(A::tags(), R::RESULT, R::RETURNS_ERROR)
    }

    pub fn call(&self, args: A) -> R {
        let outcome = self.callable.try_invoke(&args.into_values());
        R::from_outcome(self.callable.symbol(), outcome)
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }
}

impl<A, R> Clone for Function<A, R> {
    fn clone(&self) -> Self {
        Self {
            callable: self.callable.clone(),
            _signature: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for Function<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Function").field(&self.callable).finish()
    }
}

//! Dynamic calls into native C libraries through libffi.
//!
//! A [`NativeLibrary`] loads a shared library and binds its symbols to
//! [`Callable`]s described by a [`ManagedSignature`]. Arguments and results
//! travel as [`Value`]s and are marshaled to native-sized memory around each
//! call; typed wrappers ([`Function`]) sit on top for callers that know the
//! signature at compile time.
//!
//! # Example
//!
//! ```no_run
//! use nativecall::{BindMode, NativeLibrary, TypeTag, Value};
//!
//! let libm = NativeLibrary::open("m", BindMode::default())?;
//! let sqrt = libm.bind("sqrt", TypeTag::Float64, false, &[TypeTag::Float64])?;
//! assert_eq!(sqrt.invoke(&[Value::F64(9.0)]), vec![Value::F64(3.0)]);
//! # Ok::<(), nativecall::FfiError>(())
//! ```
//!
//! # Error slot
//!
//! A managed signature may declare a second result of type
//! [`TypeTag::ErrorSentinel`]. Call-time failures (wrong arity, arguments
//! that cannot be marshaled, a closed library) then come back as
//! [`Value::Error`] instead of panicking.
//!
//! # Signature Files
//!
//! ```text
//! # libm.sig
//! sqrt: (f64) -> f64
//! pow: (double, double) -> double
//! ```
//!
//! Load with [`SignatureFile::parse_file`] and bind with
//! [`NativeLibrary::bind_file`].

mod cif;
mod config;
mod error;
mod library;
mod loader;
mod marshal;
mod parser;
mod stub;
mod typed;
mod types;
mod value;

pub use cif::{CacheKeyPolicy, CallInterface, CifCache};
pub use config::{BindMode, LoaderConfig, CACHE_KEY_ENV, LIBRARY_PATH_ENV};
pub use error::{ConfigError, FfiError, MarshalError};
pub use library::{NativeLibrary, SymbolAddress};
pub use loader::{platform_lib_name, resolve_candidates};
pub use marshal::{
    marshal_arg, marshal_arg_with, unmarshal_return, unmarshal_return_with, ArgFrame,
    MarshalBuffer, NativeCell, ReturnCell, Scalar,
};
pub use parser::{ParseError, SignatureEntry, SignatureFile};
pub use stub::Callable;
pub use typed::{ArgList, Function, NativeType, ReturnType};
pub use types::{AbiType, ManagedSignature, PlatformWidths, Signature, TypeTag};
pub use value::Value;

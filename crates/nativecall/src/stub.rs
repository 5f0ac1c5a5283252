//! Callables: bound native functions invoked with dynamic values.

use std::fmt;
use std::ptr;
use std::sync::Arc;

use libffi::low::CodePtr;
use libffi::raw;

use crate::cif::CallInterface;
use crate::error::FfiError;
use crate::library::{LibraryInner, SymbolAddress};
use crate::marshal::{unmarshal_return, ArgFrame, ReturnCell};
use crate::types::{Signature, TypeTag};
use crate::value::Value;

/// A native function bound to a call interface.
///
/// Holds its library alive; after the library is closed every invocation
/// reports `LibraryClosed` instead of calling into unloaded code.
///
/// Faults inside the native function itself (crashes, `errno`, status
/// codes) are not observed. A callable is exactly as safe as the signature
/// it was bound with.
#[derive(Clone)]
pub struct Callable {
    symbol: Arc<str>,
    library: Arc<LibraryInner>,
    interface: Arc<CallInterface>,
    address: SymbolAddress,
    result: TypeTag,
    returns_error: bool,
}

impl Callable {
    pub(crate) fn new(
        symbol: &str,
        library: Arc<LibraryInner>,
        interface: Arc<CallInterface>,
        address: SymbolAddress,
        result: TypeTag,
        returns_error: bool,
    ) -> Self {
        Self {
            symbol: Arc::from(symbol),
            library,
            interface,
            address,
            result,
            returns_error,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn address(&self) -> SymbolAddress {
        self.address
    }

    /// The native signature the call interface was prepared from.
    pub fn signature(&self) -> &Signature {
        self.interface.signature()
    }

    /// Managed result type; `Void` when no primary result is produced.
    pub fn result_type(&self) -> TypeTag {
        self.result
    }

    pub fn returns_error(&self) -> bool {
        self.returns_error
    }

    /// Invoke the function and shape the results for the managed side.
    ///
    /// Returns the primary result (omitted for `Void`), followed by a
    /// [`Value::Error`] when the error slot is declared. With an error slot,
    /// call-time failures land in it next to a zero primary result.
    ///
    /// # Panics
    ///
    /// Without an error slot, on wrong arity, an argument that cannot be
    /// marshaled to its parameter type, or a closed library.
    pub fn invoke(&self, args: &[Value]) -> Vec<Value> {
        match self.try_invoke(args) {
            Ok(value) => self.shape(value, None),
            Err(err) if self.returns_error => {
                log::debug!("'{}' failed: {}", self.symbol, err);
                let zero = (self.result != TypeTag::Void).then(|| Value::zero(self.result));
                self.shape(zero, Some(err))
            }
            Err(err) => panic!("calling '{}': {}", self.symbol, err),
        }
    }

    /// Invoke the function, reporting every call-time failure as an error.
    ///
    /// `Ok(None)` means the managed result type is `Void`.
    pub fn try_invoke(&self, args: &[Value]) -> Result<Option<Value>, FfiError> {
        // Held until the result is decoded: returned strings may live in
        // the library's own data.
        let _library = self.library.pin()?;

        let expected = self.interface.arg_count();
        if args.len() != expected {
            return Err(FfiError::LengthMismatch {
                expected,
                got: args.len(),
            });
        }

        let native = self.interface.signature();
        let frame = ArgFrame::marshal(args, native.native_params())?;
        let mut pointers = frame.pointers();
        let avalue = if pointers.is_empty() {
            ptr::null_mut()
        } else {
            pointers.as_mut_ptr()
        };

        let mut ret = ReturnCell::default();
        let code = CodePtr::from_ptr(self.address.as_ptr());
        log::trace!("calling '{}' {}", self.symbol, native);
        // SAFETY: the cif was prepared for `native`, every argument pointer
        // refers to a live buffer of the matching type, the return cell
        // fits any scalar result, and the read guard keeps the code mapped.
        unsafe {
            raw::ffi_call(
                self.interface.as_raw_ptr(),
                Some(*code.as_safe_fun()),
                ret.as_mut_ptr(),
                avalue,
            );
        }

        let decoded = unmarshal_return(&ret, native.ret());
        drop(pointers);
        let released = frame.release();
        if released > 0 {
            log::trace!("released {} string argument(s) of '{}'", released, self.symbol);
        }

        let value = decoded.map_err(FfiError::Unmarshal)?;
        if self.result == TypeTag::Void {
            return Ok(None);
        }
        value
            .convert_to(self.result)
            .map(Some)
            .map_err(FfiError::Unmarshal)
    }

    fn shape(&self, value: Option<Value>, error: Option<FfiError>) -> Vec<Value> {
        let mut results = Vec::with_capacity(2);
        results.extend(value);
        if self.returns_error {
            results.push(Value::Error(error));
        }
        results
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("symbol", &self.symbol)
            .field("library", &self.library.path())
            .field("signature", self.interface.signature())
            .field("result", &self.result)
            .field("returns_error", &self.returns_error)
            .finish()
    }
}

//! Native library handles: symbol lookup and binding.

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::fmt;
use std::sync::Arc;

use libloading::Library;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::cif::{CallInterface, CifCache};
use crate::config::{BindMode, LoaderConfig};
use crate::error::FfiError;
use crate::loader;
use crate::parser::{SignatureEntry, SignatureFile};
use crate::stub::Callable;
use crate::typed::{ArgList, Function, ReturnType};
use crate::types::{ManagedSignature, Signature, TypeTag};

/// Address of a resolved symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddress(usize);

impl SymbolAddress {
    pub fn as_ptr(self) -> *const c_void {
        self.0 as *const c_void
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Debug for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolAddress({:#x})", self.0)
    }
}

struct Caches {
    symbols: HashMap<String, SymbolAddress>,
    interfaces: CifCache,
}

/// State shared between a handle and the callables bound from it.
pub(crate) struct LibraryInner {
    path: String,
    // `None` once closed. Invocations hold a read guard for the whole
    // native call so `close` cannot unload code that is running.
    library: RwLock<Option<Library>>,
    // One lock for both caches: lookup-or-insert is a single critical
    // section.
    caches: Mutex<Caches>,
}

impl LibraryInner {
    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Read guard over the open library, or `LibraryClosed`.
    pub(crate) fn pin(&self) -> Result<RwLockReadGuard<'_, Option<Library>>, FfiError> {
        let guard = self.library.read();
        if guard.is_none() {
            return Err(self.closed());
        }
        Ok(guard)
    }

    fn closed(&self) -> FfiError {
        FfiError::LibraryClosed {
            path: self.path.clone(),
        }
    }
}

/// A loaded native library.
///
/// Cloning is cheap and shares the library and its caches. The library is
/// unloaded by [`close`](Self::close), or once the last handle and the last
/// callable bound from it are dropped.
#[derive(Clone)]
pub struct NativeLibrary {
    inner: Arc<LibraryInner>,
}

impl NativeLibrary {
    /// Open a library by bare name or path, with environment-derived search
    /// settings.
    ///
    /// Names without a path separator are searched for; `"libc"` resolves to
    /// the first loadable `libc.so*` on Linux.
    pub fn open(name: &str, mode: BindMode) -> Result<Self, FfiError> {
        Self::open_with(name, &LoaderConfig::from_env().with_mode(mode))
    }

    pub fn open_with(name: &str, config: &LoaderConfig) -> Result<Self, FfiError> {
        let (library, path) = loader::open(name, config.mode, config)?;
        log::debug!("opened library {} ({:?})", path, config.mode);
        Ok(Self {
            inner: Arc::new(LibraryInner {
                path,
                library: RwLock::new(Some(library)),
                caches: Mutex::new(Caches {
                    symbols: HashMap::new(),
                    interfaces: CifCache::new(config.cache_key),
                }),
            }),
        })
    }

    /// Get the path the library was loaded from.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.library.read().is_none()
    }

    /// Resolve a symbol, caching the address. Failed lookups are retried on
    /// the next call.
    pub fn symbol(&self, name: &str) -> Result<SymbolAddress, FfiError> {
        let library = self.inner.pin()?;
        let mut caches = self.inner.caches.lock();
        if let Some(address) = caches.symbols.get(name) {
            return Ok(*address);
        }

        let c_name = CString::new(name).map_err(|_| FfiError::InvalidSymbolName(name.to_string()))?;
        let library = library.as_ref().ok_or_else(|| self.inner.closed())?;
        // SAFETY: the symbol is only read as an address.
        let address = unsafe { library.get::<*mut c_void>(c_name.as_bytes_with_nul()) }
            .map(|symbol| SymbolAddress(*symbol as usize))
            .map_err(|e| FfiError::SymbolNotFound {
                symbol: name.to_string(),
                library: self.inner.path.clone(),
                reason: e.to_string(),
            })?;

        log::debug!("resolved '{}' in {} at {:?}", name, self.inner.path, address);
        caches.symbols.insert(name.to_string(), address);
        Ok(address)
    }

    /// Call interface for `symbol`, prepared on first use.
    pub fn interface(
        &self,
        symbol: &str,
        signature: &Signature,
    ) -> Result<Arc<CallInterface>, FfiError> {
        let _library = self.inner.pin()?;
        self.inner
            .caches
            .lock()
            .interfaces
            .get_or_build(symbol, signature)
    }

    /// Number of call interfaces currently cached.
    pub fn cached_interfaces(&self) -> usize {
        self.inner.caches.lock().interfaces.len()
    }

    /// Bind `symbol` with a managed signature whose native shape is the same.
    pub fn import(&self, symbol: &str, managed: &ManagedSignature) -> Result<Callable, FfiError> {
        let native = managed.to_native()?;
        self.bind_complex(symbol, managed, &native)
    }

    /// Bind `symbol` returning `ret` (plus an error slot if `returns_error`).
    pub fn bind(
        &self,
        symbol: &str,
        ret: TypeTag,
        returns_error: bool,
        params: &[TypeTag],
    ) -> Result<Callable, FfiError> {
        let managed = ManagedSignature::with_result(params.to_vec(), ret, returns_error);
        self.import(symbol, &managed)
    }

    /// Bind `symbol` with independent managed and native signatures.
    ///
    /// The native signature decides argument count, argument conversion and
    /// the call interface; the managed signature decides the result shape.
    pub fn bind_complex(
        &self,
        symbol: &str,
        managed: &ManagedSignature,
        native: &Signature,
    ) -> Result<Callable, FfiError> {
        let returns_error = managed.returns_error()?;
        let result = managed.primary_result();
        if !native.ret().converts_to(result) {
            return Err(FfiError::ResultMismatch {
                symbol: symbol.to_string(),
                native: native.ret(),
                managed: result,
            });
        }
        let interface = self.interface(symbol, native)?;
        let address = self.symbol(symbol)?;
        Ok(Callable::new(
            symbol,
            Arc::clone(&self.inner),
            interface,
            address,
            result,
            returns_error,
        ))
    }

    /// Bind a typed function.
    pub fn import_typed<A, R>(&self, symbol: &str) -> Result<Function<A, R>, FfiError>
    where
        A: ArgList,
        R: ReturnType,
    {
        let callable = self.import(symbol, &Function::<A, R>::signature())?;
        Ok(Function::new(callable))
    }

    /// Bind a typed function into `slot`. The slot is left untouched on
    /// failure.
    pub fn bind_into<A, R>(
        &self,
        symbol: &str,
        slot: &mut Option<Function<A, R>>,
    ) -> Result<(), FfiError>
    where
        A: ArgList,
        R: ReturnType,
    {
        *slot = Some(self.import_typed(symbol)?);
        Ok(())
    }

    /// Bind a function described by a signature-file entry.
    pub fn bind_signature(&self, entry: &SignatureEntry) -> Result<Callable, FfiError> {
        self.import(&entry.name, &entry.signature)
    }

    /// Bind every entry of a signature file, stopping at the first failure.
    pub fn bind_file(&self, file: &SignatureFile) -> Result<HashMap<String, Callable>, FfiError> {
        file.iter()
            .map(|entry| Ok((entry.name.clone(), self.bind_signature(entry)?)))
            .collect()
    }

    /// Release cached call interfaces and unload the library.
    ///
    /// Waits for in-flight calls to return. Afterwards every operation on
    /// this handle, its clones and its callables reports `LibraryClosed`;
    /// closing again does too.
    pub fn close(&self) -> Result<(), FfiError> {
        let mut library = self.inner.library.write();
        let Some(open) = library.take() else {
            return Err(self.inner.closed());
        };

        let mut caches = self.inner.caches.lock();
        let released = caches.interfaces.clear();
        caches.symbols.clear();
        drop(caches);

        log::debug!(
            "closing {} ({} call interface(s) released)",
            self.inner.path,
            released
        );
        open.close().map_err(|e| FfiError::CloseError {
            path: self.inner.path.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

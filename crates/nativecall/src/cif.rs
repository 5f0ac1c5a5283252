//! Prepared call interfaces and their per-library cache.

use std::collections::HashMap;
use std::ptr;
use std::sync::Arc;

use libffi::low::{self, ffi_abi_FFI_DEFAULT_ABI, ffi_cif, ffi_type};
use serde::{Deserialize, Serialize};

use crate::error::FfiError;
use crate::types::{AbiType, Signature};

/// A libffi `ffi_cif` prepared for one native signature.
///
/// Owns the argument descriptor array the cif points into; both are freed
/// together when the last reference is dropped.
pub struct CallInterface {
    cif: Box<ffi_cif>,
    // Referenced by `cif.arg_types`; must live as long as `cif`.
    _arg_types: Option<Box<[*mut ffi_type]>>,
    arg_abi: Vec<AbiType>,
    ret_abi: AbiType,
    signature: Signature,
}

// SAFETY: after `prep_cif` the cif and the descriptor array are only read,
// and the descriptors point at libffi's immutable built-in types.
unsafe impl Send for CallInterface {}
unsafe impl Sync for CallInterface {}

impl CallInterface {
    /// Prepare a call interface for `signature` with the default ABI.
    pub fn prepare(symbol: &str, signature: &Signature) -> Result<Self, FfiError> {
        let arg_abi = signature.abi_params()?;
        let ret_abi = signature.abi_return()?;

        let mut arg_types: Option<Box<[*mut ffi_type]>> = if arg_abi.is_empty() {
            None
        } else {
            Some(arg_abi.iter().map(|abi| abi.as_raw()).collect())
        };
        let atypes = arg_types
            .as_mut()
            .map_or(ptr::null_mut(), |types| types.as_mut_ptr());

        // SAFETY: an all-zero ffi_cif is a valid blank for prep_cif to fill.
        let mut cif: Box<ffi_cif> = Box::new(unsafe { std::mem::zeroed() });
        // SAFETY: `atypes` is null or points at `arg_abi.len()` descriptors
        // that outlive the cif, and `ret_abi` is a libffi built-in.
        let status = unsafe {
            low::prep_cif(
                &mut *cif,
                ffi_abi_FFI_DEFAULT_ABI,
                arg_abi.len(),
                ret_abi.as_raw(),
                atypes,
            )
        };
        if let Err(err) = status {
            // `arg_types` drops here, nothing was cached.
            return Err(match err {
                low::Error::Typedef => FfiError::BadTypedef {
                    symbol: symbol.to_string(),
                },
                _ => FfiError::BadAbi {
                    symbol: symbol.to_string(),
                },
            });
        }

        Ok(Self {
            cif,
            _arg_types: arg_types,
            arg_abi,
            ret_abi,
            signature: signature.clone(),
        })
    }

    pub fn as_raw_ptr(&self) -> *mut ffi_cif {
        &*self.cif as *const ffi_cif as *mut ffi_cif
    }

    /// Number of native argument slots.
    pub fn arg_count(&self) -> usize {
        self.arg_abi.len()
    }

    pub fn arg_abi(&self) -> &[AbiType] {
        &self.arg_abi
    }

    pub fn ret_abi(&self) -> AbiType {
        self.ret_abi
    }

    /// The native signature this interface was prepared from.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    fn matches(&self, arg_abi: &[AbiType], ret_abi: AbiType) -> bool {
        self.arg_abi == arg_abi && self.ret_abi == ret_abi
    }
}

impl std::fmt::Debug for CallInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallInterface")
            .field("signature", &self.signature)
            .field("arg_abi", &self.arg_abi)
            .field("ret_abi", &self.ret_abi)
            .finish()
    }
}

/// What identifies a cached call interface within one library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyPolicy {
    /// One interface per symbol and ABI shape.
    #[default]
    SymbolAndSignature,
    /// One interface per symbol. Rebinding a symbol with a different
    /// signature reuses the first interface.
    SymbolOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CifKey {
    symbol: String,
    shape: Option<(Vec<AbiType>, AbiType)>,
}

/// Memoized call interfaces of one library. Callers serialize access.
#[derive(Debug, Default)]
pub struct CifCache {
    policy: CacheKeyPolicy,
    entries: HashMap<CifKey, Arc<CallInterface>>,
}

impl CifCache {
    pub fn new(policy: CacheKeyPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    pub fn policy(&self) -> CacheKeyPolicy {
        self.policy
    }

    /// Return the cached interface for `symbol`, preparing and caching it on
    /// a miss. Failed preparations are not cached.
    pub fn get_or_build(
        &mut self,
        symbol: &str,
        signature: &Signature,
    ) -> Result<Arc<CallInterface>, FfiError> {
        let arg_abi = signature.abi_params()?;
        let ret_abi = signature.abi_return()?;
        let key = CifKey {
            symbol: symbol.to_string(),
            shape: match self.policy {
                CacheKeyPolicy::SymbolAndSignature => Some((arg_abi.clone(), ret_abi)),
                CacheKeyPolicy::SymbolOnly => None,
            },
        };

        if let Some(cif) = self.entries.get(&key) {
            if !cif.matches(&arg_abi, ret_abi) {
                log::warn!(
                    "reusing call interface {} for '{}' requested as {}",
                    cif.signature(),
                    symbol,
                    signature
                );
            }
            return Ok(Arc::clone(cif));
        }

        let cif = Arc::new(CallInterface::prepare(symbol, signature)?);
        log::debug!("prepared call interface for '{symbol}': {signature}");
        self.entries.insert(key, Arc::clone(&cif));
        Ok(cif)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached interface. Interfaces still held by callables stay
    /// alive until those are dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

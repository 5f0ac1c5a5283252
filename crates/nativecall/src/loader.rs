//! Locating and opening shared libraries.

use std::env;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use glob::Pattern;
use libloading::Library;

use crate::config::{BindMode, LoaderConfig};
use crate::error::FfiError;

/// Whether `name` should be used as a path instead of searched for.
pub fn is_path(name: &str) -> bool {
    name.contains('/') || name.contains(MAIN_SEPARATOR)
}

/// Get the platform-specific library filename for a bare name.
///
/// `"m"` and `"libm"` both become `libm.so` on Linux.
pub fn platform_lib_name(name: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        if name.to_lowercase().ends_with(".dll") {
            name.to_string()
        } else {
            format!("{}.dll", name)
        }
    }
    #[cfg(target_os = "macos")]
    {
        if name.ends_with(".dylib") {
            name.to_string()
        } else if name.starts_with("lib") {
            format!("{}.dylib", name)
        } else {
            format!("lib{}.dylib", name)
        }
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if name.ends_with(".so") || name.contains(".so.") {
            name.to_string()
        } else if name.starts_with("lib") {
            format!("{}.so", name)
        } else {
            format!("lib{}.so", name)
        }
    }
}

/// Directories searched for bare library names, in order.
pub fn search_dirs(config: &LoaderConfig) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = config.search_paths.clone();

    let env_var = if cfg!(target_os = "windows") {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    };
    if let Some(paths) = env::var_os(env_var) {
        dirs.extend(env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
    }

    if config.system_paths {
        dirs.extend(system_dirs());
    }

    let mut seen = Vec::with_capacity(dirs.len());
    dirs.retain(|dir| {
        if seen.contains(dir) {
            false
        } else {
            seen.push(dir.clone());
            true
        }
    });
    dirs
}

#[cfg(all(unix, not(target_os = "macos")))]
fn system_dirs() -> Vec<PathBuf> {
    let multiarch = format!("{}-linux-gnu", env::consts::ARCH);
    [
        format!("/lib/{multiarch}"),
        format!("/usr/lib/{multiarch}"),
        "/lib64".to_string(),
        "/usr/lib64".to_string(),
        "/lib".to_string(),
        "/usr/lib".to_string(),
        "/usr/local/lib".to_string(),
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

#[cfg(target_os = "macos")]
fn system_dirs() -> Vec<PathBuf> {
    ["/usr/local/lib", "/opt/homebrew/lib", "/usr/lib"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

#[cfg(not(unix))]
fn system_dirs() -> Vec<PathBuf> {
    Vec::new()
}

/// Candidate files for a bare library name.
///
/// Within each directory the unversioned file comes first, then versioned
/// variants (`libc.so.6`) in lexical order. Files that exist but fail to
/// load, such as linker scripts, are skipped by [`open`].
pub fn resolve_candidates(name: &str, config: &LoaderConfig) -> Vec<PathBuf> {
    if is_path(name) {
        return vec![PathBuf::from(name)];
    }

    let file_name = platform_lib_name(name);
    let mut candidates = Vec::new();
    for dir in search_dirs(config) {
        let exact = dir.join(&file_name);
        if exact.is_file() {
            candidates.push(exact);
        }
        candidates.extend(versioned_in(&dir, &file_name));
    }
    candidates
}

fn versioned_in(dir: &Path, file_name: &str) -> Vec<PathBuf> {
    let pattern = if cfg!(target_os = "macos") {
        let stem = file_name.trim_end_matches(".dylib");
        format!("{}.*.dylib", Pattern::escape(stem))
    } else if cfg!(target_os = "windows") {
        return Vec::new();
    } else {
        format!("{}.*", Pattern::escape(file_name))
    };
    let full = format!("{}/{}", Pattern::escape(&dir.to_string_lossy()), pattern);
    let mut found: Vec<PathBuf> = match glob::glob(&full) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(err) => {
            log::warn!("skipping library search in {}: {}", dir.display(), err);
            Vec::new()
        }
    };
    found.sort();
    found
}

/// Open a library by name or path.
///
/// Paths are opened as given. Bare names try every candidate from
/// [`resolve_candidates`], then fall back to the system loader's own search
/// with the platform file name.
pub fn open(
    name: &str,
    mode: BindMode,
    config: &LoaderConfig,
) -> Result<(Library, String), FfiError> {
    if is_path(name) {
        let library = open_path(Path::new(name), mode)?;
        return Ok((library, name.to_string()));
    }

    let candidates = resolve_candidates(name, config);
    let mut last_error = None;
    for candidate in &candidates {
        match open_path(candidate, mode) {
            Ok(library) => {
                log::debug!("resolved library '{}' to {}", name, candidate.display());
                return Ok((library, candidate.display().to_string()));
            }
            Err(err) => {
                log::warn!("skipping {}: {}", candidate.display(), err);
                last_error = Some(err);
            }
        }
    }

    let file_name = platform_lib_name(name);
    match open_path(Path::new(&file_name), mode) {
        Ok(library) => {
            log::debug!("resolved library '{}' through the system loader", name);
            Ok((library, file_name))
        }
        Err(fallback) => match last_error {
            Some(err) => Err(err),
            None => Err(FfiError::LibraryNotFound {
                name: name.to_string(),
                reason: fallback.to_string(),
            }),
        },
    }
}

fn open_path(path: &Path, mode: BindMode) -> Result<Library, FfiError> {
    let load_error = |e: libloading::Error| FfiError::LoadError {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    #[cfg(unix)]
    {
        // SAFETY: loading runs the library's initializers; callers opt in to
        // that by opening it.
        unsafe { libloading::os::unix::Library::open(Some(path), mode.to_dlopen_flags()) }
            .map(Library::from)
            .map_err(load_error)
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
        // SAFETY: as above.
        unsafe { Library::new(path) }.map_err(load_error)
    }
}

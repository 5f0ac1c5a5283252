//! Shared fixtures: builds `tests/native/nativecall_test.c` into a shared
//! library with the system C compiler (or `$CC`).

#![allow(dead_code)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nativecall::{BindMode, NativeLibrary};
use nativecall_logging::{init_logging, LoggingOptions};
use once_cell::sync::Lazy;

static LOGGING: Lazy<()> = Lazy::new(|| {
    let _ = init_logging(LoggingOptions::default());
});

static TEST_LIBRARY: Lazy<Option<PathBuf>> = Lazy::new(build_test_library);

fn build_test_library() -> Option<PathBuf> {
    if !cfg!(unix) {
        return None;
    }
    let source = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("native")
        .join("nativecall_test.c");
    let out_dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join("native");
    if let Err(e) = fs::create_dir_all(&out_dir) {
        eprintln!("cannot create {}: {}, skipping native tests", out_dir.display(), e);
        return None;
    }
    // Test binaries run in parallel; give each its own copy.
    let extension = if cfg!(target_os = "macos") { "dylib" } else { "so" };
    let output = out_dir.join(format!(
        "libnativecall_test_{}.{}",
        std::process::id(),
        extension
    ));

    let cc = env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let status = Command::new(&cc)
        .args(["-shared", "-fPIC", "-O1", "-o"])
        .arg(&output)
        .arg(&source)
        .arg("-lm")
        .status();
    match status {
        Ok(status) if status.success() => Some(output),
        Ok(status) => {
            eprintln!("{} exited with {}, skipping native tests", cc, status);
            None
        }
        Err(e) => {
            eprintln!("cannot run {}: {}, skipping native tests", cc, e);
            None
        }
    }
}

/// Path of the compiled test library, if a compiler was available.
pub fn test_library_path() -> Option<&'static Path> {
    Lazy::force(&LOGGING);
    TEST_LIBRARY.as_deref()
}

/// Open the test library, or `None` (after a note on stderr) when it could
/// not be built.
pub fn open_test_library() -> Option<NativeLibrary> {
    let Some(path) = test_library_path() else {
        eprintln!("Test library not available, skipping test");
        return None;
    };
    let path = path.to_str()?;
    Some(NativeLibrary::open(path, BindMode::NOW).expect("failed to load test library"))
}

//! Parser for signature files.
//!
//! # File Format
//!
//! ```text
//! # Comment lines start with #
//!
//! # Function signature: name: (arg_types) -> return_type
//! sqrt: (f64) -> f64
//! getpid: () -> int
//! abort: (void) -> void
//!
//! # A trailing `!` declares the error slot
//! strdup: (string) -> string!
//! ```
//!
//! Type names are those accepted by [`TypeTag::parse`]: `void bool i8 i16
//! i32 i64 u8 u16 u32 u64 int uint f32 f64 ptr uintptr unsafe_ptr string`,
//! plus common C spellings such as `double`, `size_t` and `char*`.

use std::collections::HashMap;
use std::path::Path;

use crate::types::{ManagedSignature, TypeTag};

/// One named function signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    pub name: String,
    pub signature: ManagedSignature,
}

/// A collection of parsed function signatures.
#[derive(Debug, Clone, Default)]
pub struct SignatureFile {
    entries: HashMap<String, SignatureEntry>,
}

impl SignatureFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a signature file from a path.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ParseError {
            line: 0,
            message: format!("failed to read {}: {}", path.as_ref().display(), e),
        })?;
        Self::parse(&content)
    }

    /// Parse signature file content. Later entries replace earlier ones of
    /// the same name.
    pub fn parse(content: &str) -> Result<Self, ParseError> {
        let mut entries = HashMap::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let entry = parse_signature_line(line, index + 1)?;
            if entries.contains_key(&entry.name) {
                log::warn!("line {}: redefinition of '{}'", index + 1, entry.name);
            }
            entries.insert(entry.name.clone(), entry);
        }

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&SignatureEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignatureEntry> {
        self.entries.values()
    }
}

/// Error during signature file parsing. `line` is 1-based; 0 means the
/// file could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line > 0 {
            write!(f, "line {}: {}", self.line, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a single signature line: `name: (arg_types) -> return_type`
fn parse_signature_line(line: &str, line_num: usize) -> Result<SignatureEntry, ParseError> {
    let error = |message: String| ParseError {
        line: line_num,
        message,
    };

    let (name, rest) = line
        .split_once(':')
        .ok_or_else(|| error("expected ':' after function name".to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(error("function name cannot be empty".to_string()));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(error(format!("invalid function name '{}'", name)));
    }

    let rest = rest.trim();
    let args = rest
        .strip_prefix('(')
        .ok_or_else(|| error("expected '(' at start of type signature".to_string()))?;
    let (args, rest) = args
        .split_once(')')
        .ok_or_else(|| error("unmatched '(' in type signature".to_string()))?;
    let ret = rest
        .trim()
        .strip_prefix("->")
        .ok_or_else(|| error("expected '->' after argument list".to_string()))?
        .trim();

    let (ret, returns_error) = match ret.strip_suffix('!') {
        Some(ret) => (ret.trim(), true),
        None => (ret, false),
    };
    let ret = parse_type(ret, line_num, "return")?;
    let params = parse_arg_list(args, line_num)?;

    Ok(SignatureEntry {
        name: name.to_string(),
        signature: ManagedSignature::with_result(params, ret, returns_error),
    })
}

fn parse_arg_list(s: &str, line_num: usize) -> Result<Vec<TypeTag>, ParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(vec![]);
    }
    s.split(',')
        .map(|arg| parse_type(arg, line_num, "argument"))
        .collect()
}

fn parse_type(s: &str, line_num: usize, what: &str) -> Result<TypeTag, ParseError> {
    match TypeTag::parse(s) {
        Some(TypeTag::ErrorSentinel) => Err(ParseError {
            line: line_num,
            message: format!("'{}' is not a {} type; mark the error slot with '!'", s.trim(), what),
        }),
        Some(tag) => Ok(tag),
        None => Err(ParseError {
            line: line_num,
            message: format!("unknown {} type: '{}'", what, s.trim()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_signature() {
        let entry = parse_signature_line("add: (f64, f64) -> f64", 1).unwrap();
        assert_eq!(entry.name, "add");
        assert_eq!(entry.signature.params, vec![TypeTag::Float64, TypeTag::Float64]);
        assert_eq!(entry.signature.results, vec![TypeTag::Float64]);
    }

    #[test]
    fn test_parse_nullary() {
        let entry = parse_signature_line("getpid: () -> int", 1).unwrap();
        assert!(entry.signature.params.is_empty());
        assert_eq!(entry.signature.primary_result(), TypeTag::Int);
    }

    #[test]
    fn test_parse_void_marker_and_return() {
        let entry = parse_signature_line("init: (void) -> void", 1).unwrap();
        assert_eq!(entry.signature.params, vec![TypeTag::Void]);
        assert_eq!(entry.signature.primary_result(), TypeTag::Void);
    }

    #[test]
    fn test_parse_error_slot() {
        let entry = parse_signature_line("copy: (const char*, int) -> string!", 1).unwrap();
        assert_eq!(entry.signature.params, vec![TypeTag::String, TypeTag::Int]);
        assert_eq!(
            entry.signature.results,
            vec![TypeTag::String, TypeTag::ErrorSentinel]
        );
        assert_eq!(entry.signature.returns_error(), Ok(true));
    }

    #[test]
    fn test_parse_file_content() {
        let content = r#"
# Math functions
sqrt: (double) -> double
pow: (f64, f64) -> f64

# Process
getpid: () -> int
"#;
        let file = SignatureFile::parse(content).unwrap();
        assert_eq!(file.len(), 3);
        assert!(file.contains("sqrt"));
        assert!(file.contains("pow"));
        assert!(file.contains("getpid"));
        assert!(!file.contains("abs"));
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let err = SignatureFile::parse("ok: () -> int\n\nbad: (matrix) -> int\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("matrix"));
        assert!(err.to_string().starts_with("line 3:"));

        let err = SignatureFile::parse("missing_arrow: (int) int").unwrap_err();
        assert!(err.message.contains("->"));

        let err = SignatureFile::parse("f: (error) -> int").unwrap_err();
        assert!(err.message.contains('!'));
    }

    #[test]
    fn test_parse_file_from_disk() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("libm.sig");
        std::fs::write(&path, "sqrt: (f64) -> f64\n").unwrap();
        let file = SignatureFile::parse_file(&path).unwrap();
        assert_eq!(file.get("sqrt").unwrap().signature.params, vec![TypeTag::Float64]);

        let err = SignatureFile::parse_file(temp_dir.path().join("missing.sig")).unwrap_err();
        assert_eq!(err.line, 0);
    }
}

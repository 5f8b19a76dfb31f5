//! go.mod parsing
//!
//! Only the pieces the dump pipeline needs are interpreted: the `module`
//! directive (which must be present) and every `require` entry, in
//! declaration order. Other directives are syntax-checked and skipped.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "go.mod";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("manifest has no module directive")]
    MissingModule,
}

/// One required module version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    pub path: String,
    pub version: String,
}

impl DependencySpec {
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.version)
    }
}

/// Parsed manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub module: String,
    pub requires: Vec<DependencySpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Require,
    Other,
}

const KNOWN_DIRECTIVES: &[&str] = &[
    "module",
    "go",
    "toolchain",
    "godebug",
    "require",
    "exclude",
    "replace",
    "retract",
    "tool",
    "ignore",
];

impl Manifest {
    /// Read and parse `go.mod` inside `dir`
    pub fn from_dir(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;

        let manifest = Self::parse(&contents)?;
        tracing::debug!(
            path = %path.display(),
            module = %manifest.module,
            requires = manifest.requires.len(),
            "Parsed manifest"
        );
        Ok(manifest)
    }

    pub fn parse(contents: &str) -> Result<Self, ManifestError> {
        let mut module = None;
        let mut requires = Vec::new();
        let mut block: Option<Block> = None;

        for (idx, raw) in contents.lines().enumerate() {
            let line = idx + 1;
            let tokens = tokenize(strip_comment(raw), line)?;
            if tokens.is_empty() {
                continue;
            }

            if let Some(kind) = block {
                if tokens.len() == 1 && tokens[0] == ")" {
                    block = None;
                    continue;
                }
                if kind == Block::Require {
                    requires.push(require_entry(&tokens, line)?);
                }
                continue;
            }

            let directive = tokens[0].as_str();
            if !KNOWN_DIRECTIVES.contains(&directive) {
                return Err(syntax(line, format!("unknown directive: {directive}")));
            }

            let args = &tokens[1..];
            if args.len() == 1 && args[0] == "(" {
                block = Some(if directive == "require" {
                    Block::Require
                } else {
                    Block::Other
                });
                continue;
            }
            if args.len() == 2 && args[0] == "(" && args[1] == ")" {
                continue;
            }

            match directive {
                "module" => {
                    if module.is_some() {
                        return Err(syntax(line, "repeated module directive"));
                    }
                    match args {
                        [path] => module = Some(path.clone()),
                        _ => return Err(syntax(line, "usage: module module/path")),
                    }
                }
                "require" => requires.push(require_entry(args, line)?),
                _ => {}
            }
        }

        if block.is_some() {
            return Err(syntax(
                contents.lines().count(),
                "unterminated block, expected ')'",
            ));
        }

        let module = module.ok_or(ManifestError::MissingModule)?;
        Ok(Self { module, requires })
    }
}

fn syntax(line: usize, message: impl Into<String>) -> ManifestError {
    ManifestError::Syntax {
        line,
        message: message.into(),
    }
}

fn require_entry(args: &[String], line: usize) -> Result<DependencySpec, ManifestError> {
    match args {
        [path, version] if !path.is_empty() && !version.is_empty() => {
            Ok(DependencySpec::new(path.clone(), version.clone()))
        }
        _ => Err(syntax(line, "usage: require module/path v1.2.3")),
    }
}

/// Drop a trailing `//` comment that is not inside a quoted string
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == b'\\' && q == b'"' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'/' && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            None => {}
        }
        i += 1;
    }
    line
}

fn tokenize(line: &str, lineno: usize) -> Result<Vec<String>, ManifestError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '(' || c == ')' {
            tokens.push(c.to_string());
            chars.next();
            continue;
        }

        if c == '"' || c == '`' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, ch)) = chars.next() {
                if ch == c {
                    closed = true;
                    break;
                }
                if ch == '\\' && c == '"' {
                    match chars.next() {
                        Some((_, escaped)) => value.push(escaped),
                        None => break,
                    }
                    continue;
                }
                value.push(ch);
            }
            if !closed {
                return Err(syntax(lineno, "unterminated quoted string"));
            }
            tokens.push(value);
            continue;
        }

        let mut end = line.len();
        while let Some(&(idx, ch)) = chars.peek() {
            if ch.is_whitespace() || ch == '(' || ch == ')' {
                end = idx;
                break;
            }
            chars.next();
        }
        tokens.push(line[start..end].to_string());
    }

    Ok(tokens)
}

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Result type alias for the compile-time half of the pipeline.
pub type CompileResult<T> = Result<T, CompileError>;

/// Result type alias for VM execution.
pub type RunResult<T> = Result<T, RuntimeError>;

/// A position in a source file, 1-based. The zero value marks synthetic
/// nodes with no source position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// The stage that rejected the program.
///
/// Each kind is introduced at exactly one stage of the pipeline: the parser,
/// the semantic analyzer (scoping), the type checker, or the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum CompileErrorKind {
    ParseError,
    SemanticViolation,
    TypeViolation,
    LinkerException,
}

/// A compile-time failure carrying the stage, a message, and (when the
/// failing construct is known) a source position.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub loc: Option<SourceLoc>,
}

impl CompileError {
    pub fn parse(message: impl Into<String>, loc: SourceLoc) -> Self {
        Self {
            kind: CompileErrorKind::ParseError,
            message: message.into(),
            loc: Some(loc),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self {
            kind: CompileErrorKind::SemanticViolation,
            message: message.into(),
            loc: None,
        }
    }

    pub fn type_violation(message: impl Into<String>) -> Self {
        Self {
            kind: CompileErrorKind::TypeViolation,
            message: message.into(),
            loc: None,
        }
    }

    pub fn linker(message: impl Into<String>) -> Self {
        Self {
            kind: CompileErrorKind::LinkerException,
            message: message.into(),
            loc: None,
        }
    }

    #[must_use]
    pub fn with_loc(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{}: {} (at {loc})", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// A fatal error raised while the VM is executing.
///
/// The instruction that trapped is not retried and the execution context
/// must not be reused afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn null_pointer() -> Self {
        Self::new("Null pointer dereferenced")
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VenomRuntimeException: {}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// Any failure observable at the `compile_and_exec` boundary.
#[derive(Debug)]
pub enum VenomError {
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl Display for VenomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(e) => e.fmt(f),
            Self::Runtime(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for VenomError {}

impl From<CompileError> for VenomError {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}

impl From<RuntimeError> for VenomError {
    fn from(e: RuntimeError) -> Self {
        Self::Runtime(e)
    }
}

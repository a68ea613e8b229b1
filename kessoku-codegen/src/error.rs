use std::fmt;
use std::path::{Path, PathBuf};

use proc_macro2::Span;
use thiserror::Error;

/// A `file:line:column` position derived from an Oracle span.
#[derive(Debug, Clone)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: &Path, span: Span) -> Self {
        let start = span.start();
        Self {
            file: file.to_path_buf(),
            line: start.line,
            // Spans are zero-based on columns, editors are one-based.
            column: start.column + 1,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// Everything that can go wrong between reading a source file and writing
/// its generated companion.
///
/// Nothing in the pipeline panics on user input; every stage returns one of
/// these so the caller can aggregate and report. `Extract` errors are scoped
/// to a single directive (the rest of the file keeps being processed for
/// diagnostics), but any recorded error suppresses output for the file.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The Oracle could not parse the input file.
    #[error("{}: {message}", file.display())]
    Parse { file: PathBuf, message: String },

    /// An `inject!` call has an invalid shape or an unsupported provider.
    #[error("{location}: {message}")]
    Extract { location: Location, message: String },

    /// Two providers produce the same canonical type.
    #[error("{location}: multiple providers provide `{ty}`")]
    Conflict { location: Location, ty: String },

    /// Nothing provides a required type and no argument can satisfy it.
    #[error("{location}: no provider provides `{ty}`")]
    Unreachable { location: Location, ty: String },

    /// The dependency graph is cyclic.
    #[error("{location}: dependency cycle involving `{ty}`")]
    Cycle { location: Location, ty: String },

    /// The emitter failed to render the generated source.
    #[error("{}: failed to render generated source: {message}", file.display())]
    Emit { file: PathBuf, message: String },

    /// Reading the input or writing the companion file failed.
    #[error("{}: {source}", file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GenerateError {
    pub fn extract(file: &Path, span: Span, message: impl Into<String>) -> Self {
        Self::Extract {
            location: Location::new(file, span),
            message: message.into(),
        }
    }
}

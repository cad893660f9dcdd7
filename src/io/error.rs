//! Canonical error type for structure reading and writing.
//!
//! Parser, serializer, and filesystem failures are folded into one `Error` enum so the
//! loader and the standardizer can wrap them with uniform wording.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing structure files.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrapper around operating-system level I/O failures.
    #[error(
        "I/O error for {path_desc}: {source}",
        path_desc = PathDisplay(path)
    )]
    Io {
        /// Path to the file involved in the failed operation, if any.
        path: Option<PathBuf>,
        /// Underlying error emitted by the standard library.
        #[source]
        source: std::io::Error,
    },

    /// An input line could not be parsed into the expected record.
    #[error(
        "failed to parse {format} {path_desc}: {details} (line {line_number})",
        path_desc = PathDisplay(path)
    )]
    Parse {
        /// Name of the textual format (`"PDB"` or `"mmCIF"`).
        format: &'static str,
        /// Path to the offending file, if known.
        path: Option<PathBuf>,
        /// One-based line number where parsing failed.
        line_number: usize,
        /// Human-readable description of what went wrong.
        details: String,
    },

    /// Logical inconsistencies such as missing columns or contradictory records.
    #[error(
        "inconsistent data in {format} {path_desc}: {details}",
        path_desc = PathDisplay(path)
    )]
    InconsistentData {
        format: &'static str,
        path: Option<PathBuf>,
        details: String,
    },

    /// Neither the extension nor the content identify a supported format.
    #[error(
        "unsupported structure format for {path_desc}",
        path_desc = PathDisplay(path)
    )]
    UnsupportedFormat { path: Option<PathBuf> },
}

impl Error {
    /// Constructs an [`Error::Io`] variant from a standard I/O error.
    ///
    /// # Arguments
    ///
    /// * `source` - Error returned by the filesystem or stream operation.
    /// * `path` - File being read or written, or `None` for anonymous streams.
    ///
    /// # Returns
    ///
    /// An [`Error::Io`] whose message names the file when one is known.
    pub fn from_io(source: std::io::Error, path: Option<PathBuf>) -> Self {
        Self::Io { path, source }
    }

    /// Builds a [`Error::Parse`] variant with consistent messaging.
    ///
    /// # Arguments
    ///
    /// * `format` - Name of the textual format being parsed.
    /// * `path` - Optional path pointing to the input file.
    /// * `line_number` - Line where the failure occurred (1-indexed).
    /// * `details` - Additional context about the parsing problem.
    pub fn parse(
        format: &'static str,
        path: Option<PathBuf>,
        line_number: usize,
        details: impl Into<String>,
    ) -> Self {
        Self::Parse {
            format,
            path,
            line_number,
            details: details.into(),
        }
    }

    /// Creates an [`Error::InconsistentData`] describing logical mismatches.
    pub fn inconsistent_data(
        format: &'static str,
        path: Option<PathBuf>,
        details: impl Into<String>,
    ) -> Self {
        Self::InconsistentData {
            format,
            path,
            details: details.into(),
        }
    }

    /// Attaches a file path to errors produced while reading from an anonymous stream.
    ///
    /// # Arguments
    ///
    /// * `new_path` - File the stream was opened from; replaces any path already recorded.
    ///
    /// # Returns
    ///
    /// The same variant with `path` set, so messages point at the file rather than a stream.
    pub fn with_path(self, new_path: PathBuf) -> Self {
        match self {
            Self::Io { source, .. } => Self::Io {
                path: Some(new_path),
                source,
            },
            Self::Parse {
                format,
                line_number,
                details,
                ..
            } => Self::Parse {
                format,
                path: Some(new_path),
                line_number,
                details,
            },
            Self::InconsistentData {
                format, details, ..
            } => Self::InconsistentData {
                format,
                path: Some(new_path),
                details,
            },
            Self::UnsupportedFormat { .. } => Self::UnsupportedFormat {
                path: Some(new_path),
            },
        }
    }
}

/// Lightweight formatter for optional paths used in error messages.
struct PathDisplay<'a>(&'a Option<PathBuf>);

impl<'a> fmt::Display for PathDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(p) => write!(f, "file '{}'", p.display()),
            None => write!(f, "stream source"),
        }
    }
}

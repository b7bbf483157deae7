//! Error kinds surfaced by frames, sources and the background worker.
//!
//! Messages for polars and I/O failures are produced by matching on error
//! variants and `io::ErrorKind` rather than by parsing strings.

use polars::prelude::PolarsError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Every failure a frame can report. `Clone` because one failure rejects many cells.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Malformed or partially unreadable file region.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A requested column (sort key or projection) is not in the header.
    #[error("Column not found: {0}")]
    InvalidColumn(String),

    /// The background worker or the underlying byte source failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A reply did not have the shape the requester expected.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Row range {start}..{end} is out of bounds for {num_rows} rows")]
    OutOfBounds {
        start: usize,
        end: usize,
        num_rows: usize,
    },

    /// The request was cancelled before a reply arrived.
    #[error("Request cancelled")]
    Cancelled,
}

impl FrameError {
    pub fn decode(msg: impl fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }

    pub fn transport(msg: impl fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn protocol(msg: impl fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }
}

impl From<PolarsError> for FrameError {
    fn from(err: PolarsError) -> Self {
        use polars::prelude::PolarsError as PE;

        match &err {
            PE::ColumnNotFound(msg) => FrameError::InvalidColumn(msg.to_string()),
            PE::IO { error, msg } => FrameError::Transport(user_message_from_io(
                error.as_ref(),
                msg.as_ref().map(|m| m.as_ref()),
            )),
            _ => FrameError::Decode(user_message_from_polars(&err)),
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        FrameError::Transport(user_message_from_io(&err, None))
    }
}

/// Format a PolarsError as a user-facing message by matching on its variant.
pub fn user_message_from_polars(err: &PolarsError) -> String {
    use polars::prelude::PolarsError as PE;

    match err {
        PE::ColumnNotFound(msg) => format!("Column not found: {}", msg),
        PE::IO { error, msg } => {
            user_message_from_io(error.as_ref(), msg.as_ref().map(|m| m.as_ref()))
        }
        PE::NoData(msg) => format!("No data: {}", msg),
        PE::SchemaMismatch(msg) => format!("Schema mismatch: {}", msg),
        PE::ShapeMismatch(msg) => format!("Row shape mismatch: {}", msg),
        PE::OutOfBounds(msg) => format!("Index or row out of bounds: {}", msg),
        PE::ComputeError(msg) => format!("Could not decode: {}", msg),
        PE::Context { error, msg } => {
            let inner = user_message_from_polars(error);
            format!("{}: {}", msg, inner)
        }
        #[allow(unreachable_patterns)]
        _ => err.to_string(),
    }
}

/// Format an io::Error as a user-facing message by matching on ErrorKind.
pub fn user_message_from_io(err: &io::Error, context: Option<&str>) -> String {
    use std::io::ErrorKind;

    let base: String = match err.kind() {
        ErrorKind::NotFound => "File or directory not found.".to_string(),
        ErrorKind::PermissionDenied => "Permission denied. Check read access.".to_string(),
        ErrorKind::InvalidData | ErrorKind::InvalidInput => {
            "Invalid or corrupted data.".to_string()
        }
        ErrorKind::UnexpectedEof => "Unexpected end of file.".to_string(),
        ErrorKind::Interrupted => "Operation interrupted.".to_string(),
        ErrorKind::OutOfMemory => "Out of memory.".to_string(),
        _ => err.to_string(),
    };

    match context {
        Some(ctx) if !ctx.is_empty() => format!("{} {}", base, ctx),
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_io_not_found_is_transport() {
        let err: FrameError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert_eq!(
            err,
            FrameError::Transport("File or directory not found.".to_string())
        );
    }

    #[test]
    fn test_polars_column_not_found_is_invalid_column() {
        let err: FrameError = PolarsError::ColumnNotFound("k".into()).into();
        assert!(matches!(err, FrameError::InvalidColumn(ref c) if c.contains('k')));
    }

    #[test]
    fn test_polars_compute_error_is_decode() {
        let err: FrameError = PolarsError::ComputeError("bad page".into()).into();
        match err {
            FrameError::Decode(msg) => assert!(msg.contains("bad page")),
            other => panic!("expected Decode, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_bounds_display() {
        let err = FrameError::OutOfBounds {
            start: 5,
            end: 12,
            num_rows: 10,
        };
        assert_eq!(
            err.to_string(),
            "Row range 5..12 is out of bounds for 10 rows"
        );
    }
}

//! Error types for flag queries and auxv probing.
//!
//! Every variant is local and recoverable. A probe that cannot read the
//! auxiliary vector reports [`Error::ResourceUnavailable`] instead of
//! answering "disabled", so callers can tell a missing feature apart from a
//! broken platform.

use std::io;

/// Errors returned by [`CpuFlags`](crate::CpuFlags) and [`probe`](crate::probe::probe).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
  /// The flag identifier is not below the table length.
  #[error("flag id {id} is out of range (table holds {len} flags)")]
  OutOfRangeFlag {
    /// Requested identifier.
    id: u32,
    /// Number of slots in the table that was queried.
    len: usize,
  },

  /// The identifier is valid but its table slot was never populated.
  #[error("flag id {id} is declared but has no feature definition")]
  UnimplementedFlag {
    /// Requested identifier.
    id: u32,
  },

  /// The auxiliary vector could not be opened or read.
  #[error("auxiliary vector unavailable ({source_name})")]
  ResourceUnavailable {
    /// Human-readable name of the source, usually a path.
    source_name: String,
    /// Underlying I/O failure.
    #[source]
    source: io::Error,
  },
}

impl Error {
  /// Returns `true` for errors caused by the environment rather than the caller.
  #[inline]
  #[must_use]
  pub const fn is_resource_error(&self) -> bool {
    matches!(self, Self::ResourceUnavailable { .. })
  }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

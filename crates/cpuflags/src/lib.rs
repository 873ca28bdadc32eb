//! PowerPC64 CPU flag detection.
//!
//! Answers "does this machine support X?" for the flags Linux reports in the
//! `AT_HWCAP` and `AT_HWCAP2` words of the process auxiliary vector, so
//! callers can gate AltiVec/VSX, transactional memory and similar code paths.
//!
//! # Core Types
//!
//! - [`CpuFlag`]: closed set of flag identifiers
//! - [`table::FEATURES`]: compile-time registry, flag → (register, bit, name)
//! - [`CpuFlags`]: query handle over a table and an [`probe::AuxvSource`]
//!
//! # Main Entry Point
//!
//! ```no_run
//! use cpuflags::CpuFlag;
//!
//! match cpuflags::is_enabled(CpuFlag::Altivec) {
//!   Ok(true) => { /* vector path */ }
//!   Ok(false) => { /* scalar path */ }
//!   Err(err) => eprintln!("cannot read CPU flags: {err}"),
//! }
//!
//! assert_eq!(cpuflags::name_of(CpuFlag::Htm), Some("HTM"));
//! ```
//!
//! # Design
//!
//! 1. **Static table**: the registry is a dense array built in `const`
//!    context; bad definitions fail the build.
//! 2. **Fresh by default**: each query re-reads the auxiliary vector. A
//!    [`CacheMode::Once`] handle memoizes the first successful probe.
//! 3. **Errors, not guesses**: an unreadable auxv is
//!    [`Error::ResourceUnavailable`], never a silent "disabled".

pub mod config;
pub mod error;
pub mod probe;
pub mod query;
pub mod table;

use std::sync::OnceLock;

pub use config::{CacheMode, Config};
pub use error::{Error, Result};
pub use query::{CpuFlags, EnabledFlags, FlagId};
pub use table::{CpuFlag, NUM_FLAGS};

use crate::probe::AuxvFile;

/// Process-wide handle, configured from the environment on first use.
fn global() -> &'static CpuFlags<AuxvFile> {
  static GLOBAL: OnceLock<CpuFlags<AuxvFile>> = OnceLock::new();
  GLOBAL.get_or_init(|| {
    let config = Config::from_env();
    log::debug!(
      "cpuflags: auxv={} cache={}",
      config.auxv_path.display(),
      config.cache.as_str()
    );
    CpuFlags::from_config(&config)
  })
}

/// Whether `flag` is enabled on this machine.
///
/// Uses the process-wide handle (see [`Config::from_env`]).
///
/// # Errors
///
/// See [`CpuFlags::is_enabled`].
#[inline]
pub fn is_enabled(flag: impl Into<FlagId>) -> Result<bool> {
  global().is_enabled(flag)
}

/// Declared label of `flag`; `None` if the id is out of range.
#[inline]
#[must_use]
pub fn name_of(flag: impl Into<FlagId>) -> Option<&'static str> {
  let FlagId(id) = flag.into();
  table::FEATURES.get(id).map(|entry| entry.name)
}

/// Every enabled flag, from a single probe of the process-wide handle.
///
/// # Errors
///
/// See [`CpuFlags::enabled_flags`].
#[inline]
pub fn enabled_flags() -> Result<EnabledFlags> {
  global().enabled_flags()
}

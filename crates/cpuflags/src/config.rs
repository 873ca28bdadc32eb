//! Runtime configuration (environment overrides + defaults).
//!
//! Knobs:
//! - `CPUFLAGS_AUXV_PATH`: file to read instead of `/proc/self/auxv`
//! - `CPUFLAGS_CACHE`: `fresh` (probe on every query) or `once` (memoize the
//!   first successful probe for the life of the handle)
//!
//! Empty or unrecognized values fall back to the defaults.

use std::path::PathBuf;

use crate::probe::DEFAULT_AUXV_PATH;

/// Environment variable overriding the auxv path.
pub const ENV_AUXV_PATH: &str = "CPUFLAGS_AUXV_PATH";
/// Environment variable selecting the [`CacheMode`].
pub const ENV_CACHE: &str = "CPUFLAGS_CACHE";

/// How a query handle reuses probe results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheMode {
  /// Read the auxiliary vector on every query.
  #[default]
  Fresh,
  /// Keep the first successful probe. Failed probes are not remembered.
  Once,
}

impl CacheMode {
  /// Lowercase name, as accepted by `CPUFLAGS_CACHE`.
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Fresh => "fresh",
      Self::Once => "once",
    }
  }

  /// Parse a mode name; `None` for anything unrecognized.
  #[must_use]
  pub fn parse(value: &str) -> Option<Self> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("fresh") || value.eq_ignore_ascii_case("always") || value.eq_ignore_ascii_case("off")
    {
      return Some(Self::Fresh);
    }
    if value.eq_ignore_ascii_case("once") || value.eq_ignore_ascii_case("cached") || value.eq_ignore_ascii_case("on") {
      return Some(Self::Once);
    }
    None
  }
}

/// Settings for a [`CpuFlags`](crate::CpuFlags) handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
  /// File holding the auxiliary vector.
  pub auxv_path: PathBuf,
  /// Probe reuse policy.
  pub cache: CacheMode,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      auxv_path: PathBuf::from(DEFAULT_AUXV_PATH),
      cache: CacheMode::Fresh,
    }
  }
}

impl Config {
  /// Defaults with environment overrides applied.
  #[must_use]
  pub fn from_env() -> Self {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Defaults with overrides taken from `lookup` (an env-like getter).
  #[must_use]
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let mut config = Self::default();

    if let Some(path) = lookup(ENV_AUXV_PATH) {
      let path = path.trim();
      if !path.is_empty() {
        config.auxv_path = PathBuf::from(path);
      }
    }

    if let Some(raw) = lookup(ENV_CACHE) {
      match CacheMode::parse(&raw) {
        Some(mode) => config.cache = mode,
        None if raw.trim().is_empty() => {}
        None => log::warn!("ignoring unrecognized {ENV_CACHE}={raw:?}"),
      }
    }

    config
  }

  /// Replace the auxv path.
  #[must_use]
  pub fn with_auxv_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.auxv_path = path.into();
    self
  }

  /// Replace the cache mode.
  #[must_use]
  pub fn with_cache(mut self, cache: CacheMode) -> Self {
    self.cache = cache;
    self
  }
}

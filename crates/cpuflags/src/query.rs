//! Flag queries.
//!
//! [`CpuFlags`] ties a feature table to an [`AuxvSource`] and answers
//! "is this flag enabled?" and "what is this flag called?".
//!
//! # Caching
//!
//! - [`CacheMode::Fresh`]: every [`is_enabled`](CpuFlags::is_enabled) reads the
//!   auxiliary vector again.
//! - [`CacheMode::Once`]: the first successful probe is kept in a `OnceLock`
//!   and reused. The auxv of a running process never changes, so both modes
//!   answer identically.

use core::fmt;
use std::sync::OnceLock;

use crate::{
  config::{CacheMode, Config},
  error::{Error, Result},
  probe::{self, AuxvFile, AuxvSource, CapabilityWords},
  table::{CpuFlag, FEATURES, FeatureEntry, FeatureTable},
};

/// Raw flag identifier: an index into a feature table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlagId(pub u32);

impl From<CpuFlag> for FlagId {
  #[inline]
  fn from(flag: CpuFlag) -> Self {
    Self(flag.id())
  }
}

impl From<u32> for FlagId {
  #[inline]
  fn from(id: u32) -> Self {
    Self(id)
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query handle
// ─────────────────────────────────────────────────────────────────────────────

/// Query handle over a feature table and an auxv source.
///
/// `CpuFlags` is `Sync` whenever its source is, so one handle can serve any
/// number of threads.
///
/// ```
/// use cpuflags::{CpuFlag, CpuFlags, probe::{AT_HWCAP, AuxvBytes, encode_records}};
///
/// let flags = CpuFlags::with_source(AuxvBytes(encode_records(&[(AT_HWCAP, 1 << 28)])));
/// assert!(flags.is_enabled(CpuFlag::Altivec).unwrap());
/// assert!(!flags.is_enabled(CpuFlag::Vsx).unwrap());
/// assert_eq!(flags.name_of(CpuFlag::Altivec), Some("ALTIVEC"));
/// ```
#[derive(Debug)]
pub struct CpuFlags<S> {
  source: S,
  table: &'static [FeatureEntry],
  cache: CacheMode,
  cached: OnceLock<CapabilityWords>,
}

impl CpuFlags<AuxvFile> {
  /// Handle reading `/proc/self/auxv` on every query.
  #[must_use]
  pub fn new() -> Self {
    Self::with_source(AuxvFile::proc_self())
  }

  /// Handle built from `config`.
  #[must_use]
  pub fn from_config(config: &Config) -> Self {
    Self::with_source(AuxvFile::new(config.auxv_path.clone())).with_cache(config.cache)
  }
}

impl Default for CpuFlags<AuxvFile> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: AuxvSource> CpuFlags<S> {
  /// Handle over [`FEATURES`] reading from `source`, in [`CacheMode::Fresh`].
  #[must_use]
  pub fn with_source(source: S) -> Self {
    Self {
      source,
      table: FEATURES.as_slice(),
      cache: CacheMode::Fresh,
      cached: OnceLock::new(),
    }
  }

  /// Swap in a different feature table.
  #[must_use]
  pub fn with_table<const N: usize>(mut self, table: &'static FeatureTable<N>) -> Self {
    self.table = table.as_slice();
    self
  }

  /// Set the cache mode. Any previously cached words are discarded.
  #[must_use]
  pub fn with_cache(mut self, cache: CacheMode) -> Self {
    self.cache = cache;
    self.cached = OnceLock::new();
    self
  }

  /// Active cache mode.
  #[inline]
  #[must_use]
  pub fn cache_mode(&self) -> CacheMode {
    self.cache
  }

  /// Underlying source.
  #[inline]
  #[must_use]
  pub fn source(&self) -> &S {
    &self.source
  }

  /// Number of slots in the feature table.
  #[inline]
  #[must_use]
  pub fn table_len(&self) -> usize {
    self.table.len()
  }

  /// Table entry for `id`, populated or not.
  ///
  /// # Errors
  ///
  /// [`Error::OutOfRangeFlag`] if `id` is past the end of the table.
  pub fn entry(&self, id: impl Into<FlagId>) -> Result<&'static FeatureEntry> {
    let FlagId(id) = id.into();
    let table = self.table;
    usize::try_from(id)
      .ok()
      .and_then(|idx| table.get(idx))
      .ok_or(Error::OutOfRangeFlag { id, len: table.len() })
  }

  /// Capability words, probed or cached according to the cache mode.
  ///
  /// # Errors
  ///
  /// [`Error::ResourceUnavailable`] if the source cannot be read.
  pub fn words(&self) -> Result<CapabilityWords> {
    match self.cache {
      CacheMode::Fresh => probe::probe(&self.source),
      CacheMode::Once => {
        if let Some(words) = self.cached.get() {
          return Ok(*words);
        }
        let words = probe::probe(&self.source)?;
        Ok(*self.cached.get_or_init(|| words))
      }
    }
  }

  /// Whether flag `id` is reported by the platform.
  ///
  /// Checks run in order: range, populated slot, probe.
  ///
  /// # Errors
  ///
  /// - [`Error::OutOfRangeFlag`] if `id` is past the end of the table
  /// - [`Error::UnimplementedFlag`] if the slot has no definition
  /// - [`Error::ResourceUnavailable`] if the auxiliary vector cannot be read
  pub fn is_enabled(&self, id: impl Into<FlagId>) -> Result<bool> {
    let id: FlagId = id.into();
    let entry = self.entry(id)?;
    if !entry.is_populated() {
      return Err(Error::UnimplementedFlag { id: id.0 });
    }

    let words = self.words()?;
    Ok(words.has_bit(entry.register, entry.bit))
  }

  /// Declared label of flag `id`; `None` past the end of the table.
  ///
  /// Never touches the auxiliary vector.
  #[must_use]
  pub fn name_of(&self, id: impl Into<FlagId>) -> Option<&'static str> {
    self.entry(id).ok().map(|entry| entry.name)
  }

  /// Snapshot of every populated flag that is set, from a single probe.
  ///
  /// # Errors
  ///
  /// [`Error::ResourceUnavailable`] if the auxiliary vector cannot be read.
  pub fn enabled_flags(&self) -> Result<EnabledFlags> {
    let words = self.words()?;
    Ok(EnabledFlags::collect(self.table, words))
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Set of enabled flag ids taken from one probe.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EnabledFlags {
  bits: u64,
  table: &'static [FeatureEntry],
}

impl EnabledFlags {
  fn collect(table: &'static [FeatureEntry], words: CapabilityWords) -> Self {
    let bits = table
      .iter()
      .zip(0u32..)
      .filter(|(entry, _)| entry.is_populated() && words.has_bit(entry.register, entry.bit))
      .fold(0u64, |bits, (_, id)| bits | (1u64 << id));
    Self { bits, table }
  }

  /// Raw bitset; bit `n` is flag id `n`.
  #[inline]
  #[must_use]
  pub const fn bits(self) -> u64 {
    self.bits
  }

  /// Whether flag `id` is in the set.
  #[inline]
  #[must_use]
  pub fn contains(self, id: impl Into<FlagId>) -> bool {
    let FlagId(id) = id.into();
    id < u64::BITS && self.bits & (1u64 << id) != 0
  }

  /// Number of enabled flags.
  #[inline]
  #[must_use]
  pub const fn len(self) -> usize {
    self.bits.count_ones() as usize
  }

  /// Whether no flag is enabled.
  #[inline]
  #[must_use]
  pub const fn is_empty(self) -> bool {
    self.bits == 0
  }

  /// Enabled ids in ascending order.
  pub fn ids(self) -> impl Iterator<Item = u32> {
    (0..u64::BITS).filter(move |&id| self.bits & (1u64 << id) != 0)
  }

  /// Labels of the enabled flags, in id order.
  pub fn names(self) -> impl Iterator<Item = &'static str> {
    let table = self.table;
    self
      .ids()
      .filter_map(move |id| usize::try_from(id).ok().and_then(|idx| table.get(idx)))
      .map(|entry| entry.name)
  }
}

impl fmt::Debug for EnabledFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.names()).finish()
  }
}

impl fmt::Display for EnabledFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut iter = self.names().peekable();
    if iter.peek().is_none() {
      return f.write_str("none");
    }

    let mut first = true;
    for name in iter {
      if !first {
        f.write_str(" ")?;
      }
      first = false;
      f.write_str(name)?;
    }
    Ok(())
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────


// ─────────────────────────────────────────────────────────────────────────────
// Property-Based Tests (proptest)
// Note: proptest uses filesystem for failure persistence, which Miri doesn't support.
// ─────────────────────────────────────────────────────────────────────────────

//! Capability probe over the process auxiliary vector.
//!
//! The kernel exposes the auxv of every process as a flat stream of
//! `(u64 key, u64 value)` records, e.g. at `/proc/self/auxv`. The probe reads
//! that stream to its end and keeps the values stored under `AT_HWCAP` and
//! `AT_HWCAP2`:
//!
//! - Keys other than `AT_HWCAP`/`AT_HWCAP2` are skipped.
//! - A repeated key is overwritten; the last record in stream order wins.
//! - A key that never appears leaves its word at 0.
//!
//! Every call opens its own reader through an [`AuxvSource`] and drops it
//! before returning, so probes share no state and may run concurrently.

use std::{
  borrow::Cow,
  fs::File,
  io::{self, Read},
  path::{Path, PathBuf},
};

use log::{debug, trace, warn};

use crate::{
  error::{Error, Result},
  table::Register,
};

// ─────────────────────────────────────────────────────────────────────────────
// ELF auxiliary vector layout
// ─────────────────────────────────────────────────────────────────────────────

/// End-of-vector marker.
pub const AT_NULL: u64 = 0;
/// Primary hardware capability word.
pub const AT_HWCAP: u64 = 16;
/// Extended hardware capability word.
pub const AT_HWCAP2: u64 = 26;

/// Size of one `Elf64_auxv_t` record in bytes.
pub const RECORD_SIZE: usize = 16;

/// Where Linux exposes the auxv of the calling process.
pub const DEFAULT_AUXV_PATH: &str = "/proc/self/auxv";

// ─────────────────────────────────────────────────────────────────────────────
// Capability words
// ─────────────────────────────────────────────────────────────────────────────

/// The two capability registers produced by one probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CapabilityWords {
  /// Value of the last `AT_HWCAP` record, or 0.
  pub primary: u32,
  /// Value of the last `AT_HWCAP2` record, or 0.
  pub extended: u32,
}

impl CapabilityWords {
  /// No capabilities reported.
  pub const NONE: Self = Self::new(0, 0);

  /// Build from raw register values.
  #[inline]
  #[must_use]
  pub const fn new(primary: u32, extended: u32) -> Self {
    Self { primary, extended }
  }

  /// Word for `register`.
  #[inline]
  #[must_use]
  pub const fn get(self, register: Register) -> u32 {
    match register {
      Register::Primary => self.primary,
      Register::Extended => self.extended,
    }
  }

  /// Whether `bit` is set in `register`. Bits past 31 are never set.
  #[inline]
  #[must_use]
  pub const fn has_bit(self, register: Register, bit: u32) -> bool {
    bit < u32::BITS && (self.get(register) >> bit) & 1 == 1
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// Something that can hand out a fresh auxv byte stream.
///
/// `open` is called once per probe; the returned reader is dropped before
/// the probe returns.
pub trait AuxvSource {
  /// Stream type yielded by [`open`](AuxvSource::open).
  type Reader<'a>: Read
  where
    Self: 'a;

  /// Open a new reader positioned at the start of the stream.
  fn open(&self) -> io::Result<Self::Reader<'_>>;

  /// Name used in logs and errors, usually a path.
  fn describe(&self) -> Cow<'_, str>;
}

/// Auxv stream backed by a file, `/proc/self/auxv` by default.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxvFile {
  path: PathBuf,
}

impl AuxvFile {
  /// Source reading `path`.
  #[must_use]
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Source reading the calling process's own auxv.
  #[must_use]
  pub fn proc_self() -> Self {
    Self::new(DEFAULT_AUXV_PATH)
  }

  /// Path this source opens.
  #[inline]
  #[must_use]
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Default for AuxvFile {
  fn default() -> Self {
    Self::proc_self()
  }
}

impl AuxvSource for AuxvFile {
  type Reader<'a>
    = File
  where
    Self: 'a;

  fn open(&self) -> io::Result<Self::Reader<'_>> {
    File::open(&self.path)
  }

  fn describe(&self) -> Cow<'_, str> {
    self.path.to_string_lossy()
  }
}

/// In-memory auxv stream.
///
/// ```
/// use cpuflags::probe::{AuxvBytes, AT_HWCAP, encode_records, probe};
///
/// let source = AuxvBytes(encode_records(&[(AT_HWCAP, 0x1000_0000)]));
/// let words = probe(&source).unwrap();
/// assert_eq!(words.primary, 0x1000_0000);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuxvBytes<T>(pub T);

impl<T: AsRef<[u8]>> AuxvSource for AuxvBytes<T> {
  type Reader<'a>
    = &'a [u8]
  where
    Self: 'a;

  fn open(&self) -> io::Result<Self::Reader<'_>> {
    Ok(self.0.as_ref())
  }

  fn describe(&self) -> Cow<'_, str> {
    Cow::Borrowed("<memory>")
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Decode an auxv stream into capability words.
///
/// Reads whole records until end of stream. Short reads are stitched back
/// together, `Interrupted` is retried, and a partial record left at EOF is
/// discarded. Records after an `AT_NULL` terminator are still consumed.
pub fn read_capabilities<R: Read>(mut reader: R) -> io::Result<CapabilityWords> {
  let mut words = CapabilityWords::NONE;
  let mut record = [0u8; RECORD_SIZE];

  loop {
    let filled = fill_record(&mut reader, &mut record)?;
    if filled < RECORD_SIZE {
      if filled > 0 {
        debug!("ignoring {filled} trailing bytes of a truncated auxv record");
      }
      break;
    }

    let (key, value) = decode_record(&record);
    match key {
      AT_HWCAP => {
        trace!("AT_HWCAP = {value:#x}");
        words.primary = low_word(value);
      }
      AT_HWCAP2 => {
        trace!("AT_HWCAP2 = {value:#x}");
        words.extended = low_word(value);
      }
      _ => {}
    }
  }

  Ok(words)
}

/// Probe `source` once.
///
/// # Errors
///
/// [`Error::ResourceUnavailable`] when the source cannot be opened or a read
/// fails. The reader is released on every path.
pub fn probe<S: AuxvSource>(source: &S) -> Result<CapabilityWords> {
  let reader = source.open().map_err(|err| unavailable(source, err))?;
  let words = read_capabilities(reader).map_err(|err| unavailable(source, err))?;

  debug!(
    "probed {}: hwcap={:#010x} hwcap2={:#010x}",
    source.describe(),
    words.primary,
    words.extended
  );
  Ok(words)
}

/// Encode `(key, value)` pairs as a native-endian auxv stream.
///
/// Handy for feeding synthetic vectors through [`AuxvBytes`].
#[must_use]
pub fn encode_records(records: &[(u64, u64)]) -> Vec<u8> {
  let mut out = Vec::with_capacity(records.len() * RECORD_SIZE);
  for &(key, value) in records {
    out.extend_from_slice(&key.to_ne_bytes());
    out.extend_from_slice(&value.to_ne_bytes());
  }
  out
}

/// Fill `record` from `reader`; returns the number of bytes read (short only at EOF).
fn fill_record<R: Read>(reader: &mut R, record: &mut [u8; RECORD_SIZE]) -> io::Result<usize> {
  let mut filled = 0;
  while filled < RECORD_SIZE {
    match reader.read(&mut record[filled..]) {
      Ok(0) => break,
      Ok(n) => filled += n,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
      Err(err) => return Err(err),
    }
  }
  Ok(filled)
}

#[inline]
fn decode_record(record: &[u8; RECORD_SIZE]) -> (u64, u64) {
  let mut key = [0u8; 8];
  let mut value = [0u8; 8];
  key.copy_from_slice(&record[..8]);
  value.copy_from_slice(&record[8..]);
  (u64::from_ne_bytes(key), u64::from_ne_bytes(value))
}

/// Capability words are 32 bits wide; the table never maps a bit above 31.
#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn low_word(value: u64) -> u32 {
  value as u32
}

#[cold]
fn unavailable<S: AuxvSource>(source: &S, err: io::Error) -> Error {
  let source_name = source.describe().into_owned();
  warn!("auxiliary vector unavailable from {source_name}: {err}");
  Error::ResourceUnavailable {
    source_name,
    source: err,
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;

  /// Reader that hands out at most `chunk` bytes per call.
  struct Chunked<'a> {
    data: &'a [u8],
    chunk: usize,
  }

  impl Read for Chunked<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      let n = self.chunk.min(buf.len()).min(self.data.len());
      buf[..n].copy_from_slice(&self.data[..n]);
      self.data = &self.data[n..];
      Ok(n)
    }
  }

  /// Reader that fails with `Interrupted` before every successful read.
  struct Flaky<'a> {
    data: &'a [u8],
    interrupt: bool,
  }

  impl Read for Flaky<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      self.interrupt = !self.interrupt;
      if self.interrupt {
        return Err(io::Error::from(io::ErrorKind::Interrupted));
      }
      self.data.read(buf)
    }
  }

  /// Reader that yields some bytes and then fails.
  struct Broken<'a> {
    data: &'a [u8],
  }

  impl Read for Broken<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      if self.data.is_empty() {
        return Err(io::Error::other("device went away"));
      }
      self.data.read(buf)
    }
  }

  /// Source whose `open` fails with a fixed error kind.
  struct Refusing(io::ErrorKind);

  impl AuxvSource for Refusing {
    type Reader<'a>
      = &'a [u8]
    where
      Self: 'a;

    fn open(&self) -> io::Result<Self::Reader<'_>> {
      Err(io::Error::from(self.0))
    }

    fn describe(&self) -> Cow<'_, str> {
      Cow::Borrowed("refusing")
    }
  }

  /// Source that counts opened and dropped readers.
  struct Tracked {
    data: Vec<u8>,
    fail_after_data: bool,
    opened: Cell<usize>,
    dropped: Cell<usize>,
  }

  struct TrackedReader<'a> {
    inner: Broken<'a>,
    tail_ok: bool,
    dropped: &'a Cell<usize>,
  }

  impl Read for TrackedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
      if self.tail_ok && self.inner.data.is_empty() {
        return Ok(0);
      }
      self.inner.read(buf)
    }
  }

  impl Drop for TrackedReader<'_> {
    fn drop(&mut self) {
      self.dropped.set(self.dropped.get() + 1);
    }
  }

  impl Tracked {
    fn new(data: Vec<u8>, fail_after_data: bool) -> Self {
      Self {
        data,
        fail_after_data,
        opened: Cell::new(0),
        dropped: Cell::new(0),
      }
    }
  }

  impl AuxvSource for Tracked {
    type Reader<'a>
      = TrackedReader<'a>
    where
      Self: 'a;

    fn open(&self) -> io::Result<Self::Reader<'_>> {
      self.opened.set(self.opened.get() + 1);
      Ok(TrackedReader {
        inner: Broken { data: &self.data },
        tail_ok: !self.fail_after_data,
        dropped: &self.dropped,
      })
    }

    fn describe(&self) -> Cow<'_, str> {
      Cow::Borrowed("tracked")
    }
  }

  fn decode(records: &[(u64, u64)]) -> CapabilityWords {
    let bytes = encode_records(records);
    match read_capabilities(bytes.as_slice()) {
      Ok(words) => words,
      Err(err) => panic!("in-memory decode failed: {err}"),
    }
  }

  #[test]
  fn empty_stream_reports_nothing() {
    assert_eq!(decode(&[]), CapabilityWords::NONE);
  }

  #[test]
  fn picks_up_both_words() {
    let words = decode(&[(6, 4096), (AT_HWCAP, 0xdc00_4141), (AT_HWCAP2, 0xef00_0000), (AT_NULL, 0)]);
    assert_eq!(words, CapabilityWords::new(0xdc00_4141, 0xef00_0000));
  }

  #[test]
  fn missing_keys_default_to_zero() {
    assert_eq!(decode(&[(AT_HWCAP, 1)]), CapabilityWords::new(1, 0));
    assert_eq!(decode(&[(AT_HWCAP2, 2)]), CapabilityWords::new(0, 2));
    assert_eq!(decode(&[(3, 0x1234), (25, 0xffff)]), CapabilityWords::NONE);
  }

  #[test]
  fn last_record_wins() {
    let words = decode(&[(AT_HWCAP, 0xffff_ffff), (AT_HWCAP2, 7), (AT_HWCAP, 0x10), (AT_HWCAP2, 0)]);
    assert_eq!(words, CapabilityWords::new(0x10, 0));
  }

  #[test]
  fn records_after_terminator_are_consumed() {
    let words = decode(&[(AT_HWCAP, 1), (AT_NULL, 0), (AT_HWCAP, 2)]);
    assert_eq!(words.primary, 2);
  }

  #[test]
  fn upper_half_is_dropped() {
    let words = decode(&[(AT_HWCAP, 0xdead_beef_8000_0001)]);
    assert_eq!(words.primary, 0x8000_0001);
  }

  #[test]
  fn trailing_partial_record_is_ignored() {
    let mut bytes = encode_records(&[(AT_HWCAP, 0x40)]);
    bytes.extend_from_slice(&encode_records(&[(AT_HWCAP, 0x80)])[..RECORD_SIZE - 1]);

    let words = read_capabilities(bytes.as_slice()).ok();
    assert_eq!(words, Some(CapabilityWords::new(0x40, 0)));
  }

  #[test]
  fn short_reads_are_reassembled() {
    let bytes = encode_records(&[(AT_HWCAP, 0x1000_0000), (AT_HWCAP2, 0x8000_0000)]);
    for chunk in [1, 3, 7, 15, 16, 17, 64] {
      let words = read_capabilities(Chunked { data: &bytes, chunk }).ok();
      assert_eq!(words, Some(CapabilityWords::new(0x1000_0000, 0x8000_0000)), "chunk={chunk}");
    }
  }

  #[test]
  fn interrupted_reads_are_retried() {
    let bytes = encode_records(&[(AT_HWCAP2, 0x4000_0000)]);
    let words = read_capabilities(Flaky {
      data: &bytes,
      interrupt: false,
    })
    .ok();
    assert_eq!(words, Some(CapabilityWords::new(0, 0x4000_0000)));
  }

  #[test]
  fn read_error_is_propagated() {
    let bytes = encode_records(&[(AT_HWCAP, 1)]);
    let err = read_capabilities(Broken { data: &bytes }).err();
    assert_eq!(err.map(|e| e.kind()), Some(io::ErrorKind::Other));
  }

  #[test]
  fn has_bit_selects_register() {
    let words = CapabilityWords::new(1 << 28, 1 << 30);
    assert!(words.has_bit(Register::Primary, 28));
    assert!(!words.has_bit(Register::Extended, 28));
    assert!(words.has_bit(Register::Extended, 30));
    assert!(!words.has_bit(Register::Primary, 30));
    assert!(!words.has_bit(Register::Primary, 32));
    assert!(!CapabilityWords::new(u32::MAX, u32::MAX).has_bit(Register::Extended, 99));
  }

  #[test]
  fn probe_in_memory() {
    let source = AuxvBytes(encode_records(&[(AT_HWCAP, 0x8000_0000)]));
    assert_eq!(probe(&source).ok(), Some(CapabilityWords::new(0x8000_0000, 0)));
  }

  #[test]
  fn permission_denied_is_resource_unavailable() {
    let err = probe(&Refusing(io::ErrorKind::PermissionDenied)).err();
    match err {
      Some(Error::ResourceUnavailable { source_name, source }) => {
        assert_eq!(source_name, "refusing");
        assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
      }
      other => panic!("expected ResourceUnavailable, got {other:?}"),
    }
  }

  #[test]
  fn missing_file_is_resource_unavailable() {
    let source = AuxvFile::new("/nonexistent/cpuflags/auxv");
    let err = probe(&source).err();
    assert!(
      matches!(&err, Some(Error::ResourceUnavailable { source, .. }) if source.kind() == io::ErrorKind::NotFound),
      "{err:?}"
    );
  }

  #[test]
  fn reader_released_after_success() {
    let source = Tracked::new(encode_records(&[(AT_HWCAP, 3)]), false);
    assert_eq!(probe(&source).ok(), Some(CapabilityWords::new(3, 0)));
    assert_eq!(source.opened.get(), 1);
    assert_eq!(source.dropped.get(), 1);
  }

  #[test]
  fn reader_released_after_read_failure() {
    let source = Tracked::new(encode_records(&[(AT_HWCAP, 3)]), true);
    assert!(probe(&source).is_err_and(|e| e.is_resource_error()));
    assert_eq!(source.opened.get(), 1);
    assert_eq!(source.dropped.get(), 1);
  }

  #[test]
  fn default_file_source() {
    let source = AuxvFile::default();
    assert_eq!(source.path(), Path::new(DEFAULT_AUXV_PATH));
    assert_eq!(source.describe(), DEFAULT_AUXV_PATH);
  }

  #[test]
  #[cfg(all(any(target_os = "linux", target_os = "android"), not(miri)))]
  fn live_proc_self_auxv() {
    let first = probe(&AuxvFile::proc_self());
    assert!(first.is_ok(), "{first:?}");
    let second = probe(&AuxvFile::proc_self());
    assert_eq!(first.ok(), second.ok());
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Property-Based Tests (proptest)
// Note: proptest uses filesystem for failure persistence, which Miri doesn't support.
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(all(test, not(miri)))]
mod proptests {
  use proptest::prelude::*;

  use super::*;

  /// Keys biased towards the interesting ones.
  fn arb_key() -> impl Strategy<Value = u64> {
    prop_oneof![
      3 => Just(AT_HWCAP),
      3 => Just(AT_HWCAP2),
      1 => Just(AT_NULL),
      2 => any::<u64>(),
    ]
  }

  fn arb_records() -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec((arb_key(), any::<u64>()), 0..32)
  }

  /// Last-wins fold over the records, the behavior the decoder must match.
  fn expected(records: &[(u64, u64)]) -> CapabilityWords {
    let mut words = CapabilityWords::NONE;
    for &(key, value) in records {
      if key == AT_HWCAP {
        words.primary = value as u32;
      } else if key == AT_HWCAP2 {
        words.extended = value as u32;
      }
    }
    words
  }

  proptest! {
    #[test]
    fn decoder_is_last_wins(records in arb_records()) {
      let bytes = encode_records(&records);
      prop_assert_eq!(read_capabilities(bytes.as_slice()).ok(), Some(expected(&records)));
    }

    #[test]
    fn trailing_garbage_never_changes_result(records in arb_records(), tail in prop::collection::vec(any::<u8>(), 0..RECORD_SIZE)) {
      let mut bytes = encode_records(&records);
      bytes.extend_from_slice(&tail);
      prop_assert_eq!(read_capabilities(bytes.as_slice()).ok(), Some(expected(&records)));
    }

    #[test]
    fn arbitrary_bytes_never_fail(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
      prop_assert!(read_capabilities(bytes.as_slice()).is_ok());
    }
  }
}

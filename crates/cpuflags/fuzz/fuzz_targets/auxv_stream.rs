//! Fuzz target for the auxv record decoder.
//!
//! Tests that:
//! - No panics on arbitrary bytes
//! - Decoding never fails for an in-memory stream
//! - Result equals a last-wins fold over the whole 16-byte records
//! - Splitting the stream into short reads does not change the result

#![no_main]

use std::io::{self, Read};

use arbitrary::Arbitrary;
use cpuflags::probe::{AT_HWCAP, AT_HWCAP2, CapabilityWords, RECORD_SIZE, read_capabilities};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
  bytes: Vec<u8>,
  chunk: u8,
}

/// Reader that returns at most `chunk` bytes per call.
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

fn reference(bytes: &[u8]) -> CapabilityWords {
  let mut words = CapabilityWords::NONE;
  for record in bytes.chunks_exact(RECORD_SIZE) {
    let mut key = [0u8; 8];
    let mut value = [0u8; 8];
    key.copy_from_slice(&record[..8]);
    value.copy_from_slice(&record[8..]);
    let (key, value) = (u64::from_ne_bytes(key), u64::from_ne_bytes(value));

    if key == AT_HWCAP {
      words.primary = value as u32;
    } else if key == AT_HWCAP2 {
      words.extended = value as u32;
    }
  }
  words
}

fuzz_target!(|input: Input| {
  let expected = reference(&input.bytes);

  // ─── Invariant: whole-buffer decode matches the reference ───
  let whole = read_capabilities(input.bytes.as_slice()).expect("in-memory decode cannot fail");
  assert_eq!(whole, expected, "decoder must be last-wins over whole records");

  // ─── Invariant: short reads are reassembled ───
  let chunk = usize::from(input.chunk.max(1));
  let chunked = read_capabilities(Chunked {
    data: &input.bytes,
    chunk,
  })
  .expect("in-memory decode cannot fail");
  assert_eq!(chunked, expected, "chunk size {chunk} must not change the result");
});

//! Fuzz target for flag queries over arbitrary capability words.
//!
//! Tests that:
//! - `is_enabled` never panics, for any id
//! - In-range ids read exactly their table bit; out-of-range ids are rejected
//! - `name_of` is `Some` exactly for in-range ids
//! - Both cache modes and the snapshot agree

#![no_main]

use arbitrary::Arbitrary;
use cpuflags::{
  CacheMode, CpuFlag, CpuFlags, Error, NUM_FLAGS,
  probe::{AT_HWCAP, AT_HWCAP2, AuxvBytes, encode_records},
};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input {
  hwcap: u64,
  hwcap2: u64,
  ids: Vec<u32>,
}

fuzz_target!(|input: Input| {
  let bytes = encode_records(&[(AT_HWCAP, input.hwcap), (AT_HWCAP2, input.hwcap2)]);
  let fresh = CpuFlags::with_source(AuxvBytes(bytes.clone()));
  let once = CpuFlags::with_source(AuxvBytes(bytes)).with_cache(CacheMode::Once);
  let snapshot = fresh.enabled_flags().expect("in-memory probe cannot fail");

  for id in input.ids {
    let result = fresh.is_enabled(id);

    match CpuFlag::from_id(id) {
      Some(flag) => {
        let entry = flag.entry();
        let word = match entry.register {
          cpuflags::table::Register::Primary => input.hwcap,
          cpuflags::table::Register::Extended => input.hwcap2,
        };
        let expected = (word >> entry.bit) & 1 == 1;

        // ─── Invariant: flag reads its bit ───
        assert_eq!(result.ok(), Some(expected), "{flag}");
        // ─── Invariant: cache modes agree ───
        assert_eq!(once.is_enabled(id).ok(), Some(expected), "{flag}");
        // ─── Invariant: snapshot agrees ───
        assert_eq!(snapshot.contains(flag), expected, "{flag}");
        assert_eq!(fresh.name_of(id), Some(flag.name()));
      }
      None => {
        assert!((id as usize) >= NUM_FLAGS);
        assert!(matches!(result, Err(Error::OutOfRangeFlag { .. })));
        assert_eq!(fresh.name_of(id), None);
      }
    }
  }
});

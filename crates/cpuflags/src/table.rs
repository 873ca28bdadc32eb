//! Compile-time feature registry.
//!
//! Maps every [`CpuFlag`] identifier to the capability word and bit that
//! reports it. The table is a dense array indexed by flag id and is fully
//! evaluated at compile time; nothing here is mutated at runtime.
//!
//! # Layout
//!
//! - `Register::Primary` is the word delivered under `AT_HWCAP`
//! - `Register::Extended` is the word delivered under `AT_HWCAP2`
//!
//! Bit numbers follow the kernel's `PPC_FEATURE_*` / `PPC_FEATURE2_*` masks
//! (`linux/arch/powerpc/include/uapi/asm/cputable.h`).
//!
//! `leaf` and `subleaf` keep the shape of a CPUID-style descriptor. On this
//! platform `leaf` only marks a slot as populated and `subleaf` is always 0.

use core::{fmt, str::FromStr};

/// Maximum length of a flag label in bytes.
pub const FLAG_NAME_MAX_LEN: usize = 64;

/// Largest table [`FeatureTable::from_defs`] accepts.
///
/// Bounded so a snapshot of enabled flags fits in a single `u64`.
pub const MAX_FLAGS: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Entries
// ─────────────────────────────────────────────────────────────────────────────

/// Capability word a feature bit lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
  /// `AT_HWCAP`
  Primary,
  /// `AT_HWCAP2`
  Extended,
}

impl Register {
  /// Both registers, in word order.
  pub const ALL: [Self; 2] = [Self::Primary, Self::Extended];

  /// Short name used in diagnostics.
  #[inline]
  #[must_use]
  pub const fn name(self) -> &'static str {
    match self {
      Self::Primary => "hwcap",
      Self::Extended => "hwcap2",
    }
  }
}

/// One slot of the feature table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeatureEntry {
  /// Non-zero when the slot carries a real definition.
  pub leaf: u32,
  /// Reserved; always 0.
  pub subleaf: u32,
  /// Capability word holding the bit.
  pub register: Register,
  /// Bit index within the word (0-31).
  pub bit: u32,
  /// Printable label.
  pub name: &'static str,
}

impl FeatureEntry {
  /// A declared-but-unimplemented slot.
  pub const UNIMPLEMENTED: Self = Self {
    leaf: 0,
    subleaf: 0,
    register: Register::Primary,
    bit: 0,
    name: "",
  };

  /// Build an entry, rejecting out-of-range bits and oversized labels at compile time.
  #[must_use]
  pub const fn new(leaf: u32, subleaf: u32, register: Register, bit: u32, name: &'static str) -> Self {
    assert!(bit < 32, "feature bit must be in 0..32");
    assert!(name.len() <= FLAG_NAME_MAX_LEN, "feature name exceeds FLAG_NAME_MAX_LEN");
    Self {
      leaf,
      subleaf,
      register,
      bit,
      name,
    }
  }

  /// Whether this slot names a real feature.
  #[inline]
  #[must_use]
  pub const fn is_populated(&self) -> bool {
    self.leaf != 0
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

/// Dense, fixed-length registry indexed by flag id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureTable<const N: usize> {
  entries: [FeatureEntry; N],
}

impl<const N: usize> FeatureTable<N> {
  /// Build a table from `(id, entry)` definitions.
  ///
  /// Ids that are not listed stay [`FeatureEntry::UNIMPLEMENTED`]. Intended for
  /// `const` contexts, where a bad definition (id out of range, id listed twice,
  /// unpopulated entry, table larger than [`MAX_FLAGS`]) fails the build.
  #[must_use]
  pub const fn from_defs(defs: &[(usize, FeatureEntry)]) -> Self {
    assert!(N <= MAX_FLAGS, "feature table larger than MAX_FLAGS");

    let mut entries = [FeatureEntry::UNIMPLEMENTED; N];
    let mut i = 0;
    while i < defs.len() {
      let (id, entry) = defs[i];
      assert!(id < N, "feature id outside the table");
      assert!(entry.is_populated(), "feature definition with leaf 0");
      assert!(!entries[id].is_populated(), "feature id defined twice");
      entries[id] = entry;
      i += 1;
    }

    Self { entries }
  }

  /// Number of slots, populated or not.
  #[inline]
  #[must_use]
  pub const fn len(&self) -> usize {
    N
  }

  /// Whether the table has no slots at all.
  #[inline]
  #[must_use]
  pub const fn is_empty(&self) -> bool {
    N == 0
  }

  /// Entry for `id`, or `None` past the end.
  #[inline]
  #[must_use]
  pub const fn get(&self, id: u32) -> Option<&FeatureEntry> {
    let idx = id as usize;
    if idx < N { Some(&self.entries[idx]) } else { None }
  }

  /// All slots in id order.
  #[inline]
  #[must_use]
  pub const fn as_slice(&self) -> &[FeatureEntry] {
    &self.entries
  }

  /// Iterator over `(id, entry)` for populated slots only.
  pub fn populated(&self) -> impl Iterator<Item = (u32, &FeatureEntry)> {
    self
      .entries
      .iter()
      .zip(0u32..)
      .filter(|(entry, _)| entry.is_populated())
      .map(|(entry, id)| (id, entry))
  }
}

/// Build a [`FeatureTable`] from declarative tuples.
///
/// ```
/// use cpuflags::{feature_table, table::FeatureTable};
///
/// const TABLE: FeatureTable<4> = feature_table![4;
///   0 => (1, 0, Primary, 28, "ALTIVEC"),
///   2 => (1, 0, Extended, 30, "HTM"),
/// ];
///
/// assert!(TABLE.get(0).is_some_and(|e| e.is_populated()));
/// assert!(TABLE.get(1).is_some_and(|e| !e.is_populated()));
/// ```
#[macro_export]
macro_rules! feature_table {
  ($len:expr; $($id:expr => ($leaf:expr, $subleaf:expr, $reg:ident, $bit:expr, $name:expr)),* $(,)?) => {
    $crate::table::FeatureTable::<{ $len }>::from_defs(&[
      $((
        $id as usize,
        $crate::table::FeatureEntry::new($leaf, $subleaf, $crate::table::Register::$reg, $bit, $name),
      ),)*
    ])
  };
}

// ─────────────────────────────────────────────────────────────────────────────
// Flag identifiers
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! declare_flags {
  ($($(#[$meta:meta])* $variant:ident),* $(,)?) => {
    /// Symbolic flag identifier; the discriminant is the table index.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[repr(u32)]
    pub enum CpuFlag {
      $($(#[$meta])* $variant,)*
    }

    impl CpuFlag {
      /// Every identifier in id order.
      pub const ALL: [Self; NUM_FLAGS] = [$(Self::$variant,)*];
    }

    /// Number of flag identifiers.
    pub const NUM_FLAGS: usize = [$(stringify!($variant),)*].len();
  };
}

declare_flags! {
  // ─── AT_HWCAP ───
  /// Little-endian mode supported.
  PpcLe,
  /// True little-endian mode.
  TrueLe,
  /// pSeries perfmon compatibility.
  PseriesPerfmonCompat,
  /// Vector-Scalar Extension (POWER7+).
  Vsx,
  /// ISA 2.06.
  Arch2_06,
  /// POWER6 extended opcodes.
  Power6Ext,
  /// Decimal floating point.
  Dfp,
  /// PA Semi PA6T.
  Pa6t,
  /// ISA 2.05.
  Arch2_05,
  /// Snooping instruction cache.
  IcacheSnoop,
  /// Simultaneous multithreading.
  Smt,
  /// Book E.
  Booke,
  /// Cell Broadband Engine.
  Cellbe,
  /// POWER5+.
  Power5Plus,
  /// POWER5.
  Power5,
  /// POWER4.
  Power4,
  /// No timebase register.
  Notb,
  /// SPE double-precision float.
  EfpDouble,
  /// SPE single-precision float.
  EfpSingle,
  /// Signal Processing Engine.
  Spe,
  /// Unified instruction/data cache.
  UnifiedCache,
  /// PPC 4xx multiply-accumulate.
  Mac4xx,
  /// Memory management unit.
  Mmu,
  /// Floating point unit.
  Fpu,
  /// AltiVec/VMX.
  Altivec,
  /// PowerPC 601.
  Ppc601,
  /// 64-bit CPU.
  Ppc64,
  /// 32-bit CPU.
  Ppc32,
  // ─── AT_HWCAP2 ───
  /// Target address register.
  Tar,
  /// `isel` instruction.
  Lsel,
  /// Event-based branching.
  Ebb,
  /// Data stream control register.
  Dscr,
  /// Hardware transactional memory.
  Htm,
  /// ISA 2.07 (POWER8).
  Arch2_07,
}

/// The PowerPC64 feature registry.
pub static FEATURES: FeatureTable<NUM_FLAGS> = feature_table![NUM_FLAGS;
  CpuFlag::PpcLe => (1, 0, Primary, 0, "PPC_LE"),
  CpuFlag::TrueLe => (1, 0, Primary, 1, "TRUE_LE"),
  CpuFlag::PseriesPerfmonCompat => (1, 0, Primary, 6, "PSERIES_PERFMON_COMPAT"),
  CpuFlag::Vsx => (1, 0, Primary, 7, "VSX"),
  CpuFlag::Arch2_06 => (1, 0, Primary, 8, "ARCH_2_06"),
  CpuFlag::Power6Ext => (1, 0, Primary, 9, "POWER6_EXT"),
  CpuFlag::Dfp => (1, 0, Primary, 10, "DFP"),
  CpuFlag::Pa6t => (1, 0, Primary, 11, "PA6T"),
  CpuFlag::Arch2_05 => (1, 0, Primary, 12, "ARCH_2_05"),
  CpuFlag::IcacheSnoop => (1, 0, Primary, 13, "ICACHE_SNOOP"),
  CpuFlag::Smt => (1, 0, Primary, 14, "SMT"),
  CpuFlag::Booke => (1, 0, Primary, 15, "BOOKE"),
  CpuFlag::Cellbe => (1, 0, Primary, 16, "CELLBE"),
  CpuFlag::Power5Plus => (1, 0, Primary, 17, "POWER5_PLUS"),
  CpuFlag::Power5 => (1, 0, Primary, 18, "POWER5"),
  CpuFlag::Power4 => (1, 0, Primary, 19, "POWER4"),
  CpuFlag::Notb => (1, 0, Primary, 20, "NOTB"),
  CpuFlag::EfpDouble => (1, 0, Primary, 21, "EFP_DOUBLE"),
  CpuFlag::EfpSingle => (1, 0, Primary, 22, "EFP_SINGLE"),
  CpuFlag::Spe => (1, 0, Primary, 23, "SPE"),
  CpuFlag::UnifiedCache => (1, 0, Primary, 24, "UNIFIED_CACHE"),
  CpuFlag::Mac4xx => (1, 0, Primary, 25, "4xxMAC"),
  CpuFlag::Mmu => (1, 0, Primary, 26, "MMU"),
  CpuFlag::Fpu => (1, 0, Primary, 27, "FPU"),
  CpuFlag::Altivec => (1, 0, Primary, 28, "ALTIVEC"),
  CpuFlag::Ppc601 => (1, 0, Primary, 29, "PPC601"),
  CpuFlag::Ppc64 => (1, 0, Primary, 30, "PPC64"),
  CpuFlag::Ppc32 => (1, 0, Primary, 31, "PPC32"),
  CpuFlag::Tar => (1, 0, Extended, 26, "TAR"),
  CpuFlag::Lsel => (1, 0, Extended, 27, "LSEL"),
  CpuFlag::Ebb => (1, 0, Extended, 28, "EBB"),
  CpuFlag::Dscr => (1, 0, Extended, 29, "DSCR"),
  CpuFlag::Htm => (1, 0, Extended, 30, "HTM"),
  CpuFlag::Arch2_07 => (1, 0, Extended, 31, "ARCH_2_07"),
];

impl CpuFlag {
  /// Table index of this flag.
  #[inline]
  #[must_use]
  pub const fn id(self) -> u32 {
    self as u32
  }

  /// Flag for a raw id, if it is in range.
  #[inline]
  #[must_use]
  pub const fn from_id(id: u32) -> Option<Self> {
    let idx = id as usize;
    if idx < NUM_FLAGS { Some(Self::ALL[idx]) } else { None }
  }

  /// Table entry describing this flag.
  #[inline]
  #[must_use]
  pub fn entry(self) -> &'static FeatureEntry {
    &FEATURES.as_slice()[self as usize]
  }

  /// Declared label, e.g. `"ALTIVEC"`.
  #[inline]
  #[must_use]
  pub fn name(self) -> &'static str {
    self.entry().name
  }
}

impl fmt::Display for CpuFlag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Returned when a string matches no flag label.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown CPU flag name: {0:?}")]
pub struct ParseFlagError(String);

impl FromStr for CpuFlag {
  type Err = ParseFlagError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    CpuFlag::ALL
      .into_iter()
      .find(|flag| flag.name().eq_ignore_ascii_case(s))
      .ok_or_else(|| ParseFlagError(s.to_owned()))
  }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

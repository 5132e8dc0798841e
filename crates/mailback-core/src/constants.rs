//! Package-level constants.

/// Current version of mailback (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "mailback";

/// Default reference-code prefix.
pub const DEFAULT_REFERENCE_PREFIX: &str = "MB";

/// Default zero-padded width of the reference sequence number.
pub const DEFAULT_SEQUENCE_WIDTH: usize = 5;

/// Maximum number of clarification rounds issued for one ambiguous reply chain.
pub const MAX_DISAMBIGUATION_ROUNDS: u32 = 4;

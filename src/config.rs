//! Fixed locations and defaults shared by the binaries.

/// Directory the raw archives are downloaded to and read from.
pub const DEFAULT_RAW_DIR: &str = "data/raw";

/// Directory the converted session stores are written to.
pub const DEFAULT_PROCESSED_DIR: &str = "data/processed/neuropixels";

/// Gzip level applied to non-text variables.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 5;

/// Highest accepted gzip level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Output stores are named `<prefix>_<session date>_<mouse>.<extension>`.
pub const OUTPUT_PREFIX: &str = "steinmetz";
pub const OUTPUT_EXTENSION: &str = "zarr";

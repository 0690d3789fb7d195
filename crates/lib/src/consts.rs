/// Application name used in directory names and user-facing messages.
pub const APP_NAME: &str = "kiln";

/// Version of the on-disk cache layout. Bumping it orphans every existing entry.
pub const CACHE_LAYOUT_VERSION: u32 = 1;

/// Length of the fingerprint prefix used in cache directory names.
pub const FINGERPRINT_PREFIX_LEN: usize = 16;

/// Marker file written into a cache entry once it is complete.
pub const COMPLETE_MARKER: &str = ".kiln-complete";

/// Record of the recipes currently merged into a staging root.
pub const STAGING_RECORD: &str = ".kiln-staging.json";

/// Prefix for in-flight temporary files and directories inside the cache.
pub const TMP_PREFIX: &str = ".tmp-";

/// Default manifest file name.
pub const DEFAULT_MANIFEST: &str = "kiln.spec";

/// Reproducible timestamp (1980-01-01, the ZIP epoch) exported to build stages.
pub const SOURCE_DATE_EPOCH: &str = "315532800";

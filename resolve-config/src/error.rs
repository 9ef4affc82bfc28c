//! Configuration errors: always fatal at startup (spec §7 `config-error`).

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{field}: slab count {value} is not a power of two")]
    SlabCountNotPowerOfTwo { field: &'static str, value: usize },

    #[error("cache-min-ttl ({min}s) is greater than cache-max-ttl ({max}s)")]
    TtlBoundsInverted { min: u64, max: u64 },

    #[error("stub/forward zone {name:?} names no upstream hosts")]
    ZoneHasNoUpstreams { name: String },

    #[error("val-sig-skew-min ({min}s) is greater than val-sig-skew-max ({max}s)")]
    SigSkewBoundsInverted { min: u64, max: u64 },
}

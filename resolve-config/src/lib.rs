//! Typed configuration surface for resolve-rs (spec §6).

pub mod config;
pub mod error;
pub mod loader;

pub use config::{
    CacheSizes, CacheSlabConfig, Config, IteratorConfig, NumericCaps, Nsec3IterationLimit,
    Toggles, TrustAnchorConfig, TtlBounds, ValidatorConfig, ZoneConfig,
};
pub use error::ConfigError;
pub use loader::{load_from_path, load_from_str};

//! Typed configuration surface (spec §6). Every recognized option maps to a
//! field here; defaults match the values spec.md names explicitly.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheSlabConfig {
    pub slabs: usize,
    pub size_per_slab: usize,
}

impl CacheSlabConfig {
    pub fn new(slabs: usize, size_per_slab: usize) -> Self {
        Self { slabs, size_per_slab }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if !self.slabs.is_power_of_two() {
            return Err(ConfigError::SlabCountNotPowerOfTwo {
                field,
                value: self.slabs,
            });
        }
        Ok(())
    }
}

impl Default for CacheSlabConfig {
    fn default() -> Self {
        Self {
            slabs: 4,
            size_per_slab: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSizes {
    pub msg: CacheSlabConfig,
    pub rrset: CacheSlabConfig,
    pub key: CacheSlabConfig,
    pub infra: CacheSlabConfig,
    pub neg: CacheSlabConfig,
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self {
            msg: CacheSlabConfig::default(),
            rrset: CacheSlabConfig::default(),
            key: CacheSlabConfig::default(),
            infra: CacheSlabConfig::new(4, 256),
            neg: CacheSlabConfig::new(4, 256),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Toggles {
    pub do_ip4: bool,
    pub do_ip6: bool,
    pub do_udp: bool,
    pub do_tcp: bool,
    pub prefetch: bool,
    pub prefetch_key: bool,
    pub harden_glue: bool,
    pub harden_dnssec_stripped: bool,
    pub harden_referral_path: bool,
    pub harden_below_nxdomain: bool,
    pub use_caps_for_id: bool,
    pub rrset_roundrobin: bool,
    pub minimal_responses: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            do_ip4: true,
            do_ip6: true,
            do_udp: true,
            do_tcp: true,
            prefetch: false,
            prefetch_key: false,
            harden_glue: true,
            harden_dnssec_stripped: true,
            harden_referral_path: false,
            harden_below_nxdomain: true,
            use_caps_for_id: false,
            rrset_roundrobin: false,
            minimal_responses: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TtlBounds {
    pub cache_min_ttl: u64,
    pub cache_max_ttl: u64,
    pub bogus_ttl: u64,
}

impl Default for TtlBounds {
    fn default() -> Self {
        Self {
            cache_min_ttl: 0,
            cache_max_ttl: 86400,
            bogus_ttl: 60,
        }
    }
}

impl TtlBounds {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_min_ttl > self.cache_max_ttl {
            return Err(ConfigError::TtlBoundsInverted {
                min: self.cache_min_ttl,
                max: self.cache_max_ttl,
            });
        }
        Ok(())
    }
}

/// One entry of the NSEC3 iteration-count table: keys at or above
/// `min_keysize` bits are capped at `max_iterations` (spec §4.3
/// "val-nsec3-keysize-iterations").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Nsec3IterationLimit {
    pub min_keysize: u32,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Fixed "current time" for RRSIG inception/expiration checks, used in
    /// tests; `None` means use the real clock.
    pub val_override_date: Option<String>,
    pub val_sig_skew_min: u64,
    pub val_sig_skew_max: u64,
    pub val_permissive_mode: bool,
    pub val_log_level: u8,
    pub ignore_cd_flag: bool,
    pub val_nsec3_keysize_iterations: Vec<Nsec3IterationLimit>,
    pub null_key_ttl: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            val_override_date: None,
            val_sig_skew_min: 3600,
            val_sig_skew_max: 86400,
            val_permissive_mode: false,
            val_log_level: 0,
            ignore_cd_flag: false,
            val_nsec3_keysize_iterations: vec![
                Nsec3IterationLimit {
                    min_keysize: 1024,
                    max_iterations: 150,
                },
                Nsec3IterationLimit {
                    min_keysize: 2048,
                    max_iterations: 500,
                },
                Nsec3IterationLimit {
                    min_keysize: 4096,
                    max_iterations: 2500,
                },
            ],
            null_key_ttl: 900,
        }
    }
}

impl ValidatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.val_sig_skew_min > self.val_sig_skew_max {
            return Err(ConfigError::SigSkewBoundsInverted {
                min: self.val_sig_skew_min,
                max: self.val_sig_skew_max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrustAnchorConfig {
    pub trust_anchor_file: Vec<String>,
    pub trust_anchor: Vec<String>,
    pub auto_trust_anchor_file: Vec<String>,
    pub trusted_keys_file: Vec<String>,
}

/// One stub or forward zone entry (spec §6).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ZoneConfig {
    pub name: String,
    pub upstreams: Vec<String>,
    /// Fall back to recursion when every upstream SERVFAILs (forward zones
    /// only; see SPEC_FULL §9.1 resolution i).
    pub forward_first: bool,
    /// This is a stub zone rather than a forward zone.
    pub is_stub: bool,
    /// Force priming of this zone before it is used; priming failure is
    /// fatal to a query rather than falling back (SPEC_FULL §9.1 i).
    pub stub_prime: bool,
}

impl ZoneConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstreams.is_empty() {
            return Err(ConfigError::ZoneHasNoUpstreams {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NumericCaps {
    pub num_threads: usize,
    pub outgoing_range: u32,
    pub outgoing_num_tcp: u32,
    pub incoming_num_tcp: u32,
    pub num_queries_per_thread: u32,
}

impl Default for NumericCaps {
    fn default() -> Self {
        Self {
            num_threads: 4,
            outgoing_range: 950,
            outgoing_num_tcp: 10,
            incoming_num_tcp: 10,
            num_queries_per_thread: 1024,
        }
    }
}

/// Iterator knobs recovered from `iterator.h` (SPEC_FULL §4.2 supplemental).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IteratorConfig {
    pub max_restart_count: u32,
    pub max_referral_count: u32,
    pub unknown_server_niceness_ms: u64,
    pub outbound_msg_retry: u32,
    pub useful_server_top_timeout_ms: u64,
    pub host_ttl_secs: u64,
    pub target_fetch_policy: Vec<i32>,
    pub max_subquery_depth: u32,
}

impl Default for IteratorConfig {
    fn default() -> Self {
        Self {
            max_restart_count: 8,
            max_referral_count: 30,
            unknown_server_niceness_ms: 376,
            outbound_msg_retry: 4,
            useful_server_top_timeout_ms: 120_000,
            host_ttl_secs: 900,
            // negative = fetch all NS addresses at this depth (spec §4.2).
            target_fetch_policy: vec![3, 2, 1, 0, -1],
            max_subquery_depth: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub numeric_caps: NumericCaps,
    pub cache_sizes: CacheSizes,
    pub toggles: Toggles,
    pub ttl_bounds: TtlBounds,
    pub validator: ValidatorConfig,
    pub trust_anchors: TrustAnchorConfig,
    pub zones: Vec<ZoneConfig>,
    pub iterator: IteratorConfig,
    /// EDNS buffer size advertised to upstreams, capped at `max_udp_size`.
    pub edns_buffer_size: u16,
    pub max_udp_size: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            numeric_caps: NumericCaps::default(),
            cache_sizes: CacheSizes::default(),
            toggles: Toggles::default(),
            ttl_bounds: TtlBounds::default(),
            validator: ValidatorConfig::default(),
            trust_anchors: TrustAnchorConfig::default(),
            zones: Vec::new(),
            iterator: IteratorConfig::default(),
            edns_buffer_size: 4096,
            max_udp_size: 4096,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache_sizes.msg.validate("cache-sizes.msg")?;
        self.cache_sizes.rrset.validate("cache-sizes.rrset")?;
        self.cache_sizes.key.validate("cache-sizes.key")?;
        self.cache_sizes.infra.validate("cache-sizes.infra")?;
        self.cache_sizes.neg.validate("cache-sizes.neg")?;
        self.ttl_bounds.validate()?;
        self.validator.validate()?;
        for zone in &self.zones {
            zone.validate()?;
        }
        Ok(())
    }
}

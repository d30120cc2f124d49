use serde::{Deserialize, Serialize};

use crate::error::{AllocError, Result};
use crate::ip::{network_to_string, parse_network, prefix_space, CidrNetwork};

/// Default number of spare node prefixes reserved per zone during a full
/// deterministic allocation
pub const DEFAULT_ZONE_HEADROOM: usize = 7;

/// Node prefixes longer than this are allowed but unusual
const USUAL_MAX_ALLOC_PREFIX_LEN: u8 = 64;

/// Top-level allocator configuration that mirrors the YAML configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Allocation strategy
    #[serde(default)]
    pub allocator: AllocatorKind,
    /// Seed prefix and node prefix length
    pub prefix_alloc_params: PrefixAllocParams,
    /// (Optional) Spare node prefixes reserved per zone (default: 7)
    #[serde(default = "default_zone_headroom")]
    pub zone_headroom: usize,
}

fn default_zone_headroom() -> usize {
    DEFAULT_ZONE_HEADROOM
}

/// Allocation strategy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorKind {
    /// Flat linear scan over the seed prefix, no zones
    Centralized,
    /// Zones rooted at POP sites, each with summarized prefixes
    #[default]
    Deterministic,
}

/// Raw prefix allocation parameters as written in controller config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixAllocParams {
    /// Network from which all node prefixes are carved, e.g. `face:b00c::/56`
    #[serde(alias = "seedPrefix")]
    pub seed_prefix: String,
    /// Length of every node prefix, e.g. 64
    #[serde(alias = "allocPrefixLen")]
    pub alloc_prefix_len: i32,
}

/// Validated prefix allocation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocParams {
    pub seed_prefix: CidrNetwork,
    pub alloc_prefix_len: u8,
}

impl PrefixAllocParams {
    pub fn new(seed_prefix: &str, alloc_prefix_len: i32) -> Self {
        Self {
            seed_prefix: seed_prefix.to_string(),
            alloc_prefix_len,
        }
    }

    /// Validate and parse the parameters.
    ///
    /// The seed prefix must be an IPv6 network and `alloc_prefix_len` must
    /// lie in `(seed prefix length, 128]`.
    pub fn parse(&self) -> Result<AllocParams> {
        if *self == Self::default() {
            return Err(AllocError::InvalidConfiguration(format!(
                "Prefix allocation parameters not set: Seed prefix: '{}', Allocation Prefix Length: {}",
                self.seed_prefix, self.alloc_prefix_len
            )));
        }

        let seed_prefix = parse_network(&self.seed_prefix).map_err(|e| {
            AllocError::InvalidConfiguration(format!("Invalid seed prefix '{}': {}", self.seed_prefix, e))
        })?;

        let alloc_prefix_len = u8::try_from(self.alloc_prefix_len)
            .ok()
            .filter(|len| *len > seed_prefix.prefix_len() && *len <= 128)
            .ok_or_else(|| {
                AllocError::InvalidConfiguration(format!(
                    "Invalid allocation prefix length {}: it must be greater than the seed prefix length {} and at most 128",
                    self.alloc_prefix_len,
                    seed_prefix.prefix_len()
                ))
            })?;

        if prefix_space(seed_prefix.prefix_len(), alloc_prefix_len).is_none() {
            return Err(AllocError::InvalidConfiguration(format!(
                "Seed prefix {} holds too many /{} prefixes to count",
                network_to_string(&seed_prefix),
                alloc_prefix_len
            )));
        }

        if alloc_prefix_len > USUAL_MAX_ALLOC_PREFIX_LEN {
            log::warn!("allocPrefixLen {} is greater than {}", alloc_prefix_len, USUAL_MAX_ALLOC_PREFIX_LEN);
        }

        Ok(AllocParams {
            seed_prefix,
            alloc_prefix_len,
        })
    }
}

impl AllocParams {
    /// Number of node prefixes in the seed prefix
    pub fn prefix_space(&self) -> u128 {
        // Representability was checked in PrefixAllocParams::parse
        prefix_space(self.seed_prefix.prefix_len(), self.alloc_prefix_len).unwrap_or(u128::MAX)
    }

    /// Number of node prefixes in `network`, if it is no longer than a node
    /// prefix
    pub fn prefix_space_of(&self, network: &CidrNetwork) -> Option<u128> {
        prefix_space(network.prefix_len(), self.alloc_prefix_len)
    }

    pub fn seed_prefix_string(&self) -> String {
        network_to_string(&self.seed_prefix)
    }
}

impl AllocatorConfig {
    pub fn new(allocator: AllocatorKind, prefix_alloc_params: PrefixAllocParams) -> Self {
        Self {
            allocator,
            prefix_alloc_params,
            zone_headroom: DEFAULT_ZONE_HEADROOM,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.prefix_alloc_params.parse().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_params() {
        let params = PrefixAllocParams::new("face:b00c::/56", 64).parse().unwrap();
        assert_eq!(params.seed_prefix_string(), "face:b00c::/56");
        assert_eq!(params.alloc_prefix_len, 64);
        assert_eq!(params.prefix_space(), 256);
    }

    #[test]
    fn test_reject_invalid_params() {
        let cases = [
            PrefixAllocParams::default(),
            PrefixAllocParams::new("blabla", 64),
            PrefixAllocParams::new("face:b00c::/56", 50),
            PrefixAllocParams::new("face:b00c::/56", 56),
            PrefixAllocParams::new("face:b00c::/56", 129),
            PrefixAllocParams::new("face:b00c::/56", -1),
            PrefixAllocParams::new("10.0.0.0/8", 24),
            PrefixAllocParams::new("::/0", 128),
        ];
        for params in cases {
            let err = params.parse().unwrap_err();
            assert!(
                matches!(err, AllocError::InvalidConfiguration(_)),
                "expected configuration error for {:?}, got {:?}",
                params,
                err
            );
        }
    }

    #[test]
    fn test_parse_yaml_defaults() {
        let yaml = r#"
prefix_alloc_params:
  seed_prefix: "face:b00c::/56"
  alloc_prefix_len: 64
"#;
        let config: AllocatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.allocator, AllocatorKind::Deterministic);
        assert_eq!(config.zone_headroom, DEFAULT_ZONE_HEADROOM);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_camel_case_params() {
        let yaml = r#"
allocator: centralized
prefix_alloc_params:
  seedPrefix: "face:b00c::/48"
  allocPrefixLen: 64
zone_headroom: 0
"#;
        let config: AllocatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.allocator, AllocatorKind::Centralized);
        assert_eq!(config.prefix_alloc_params, PrefixAllocParams::new("face:b00c::/48", 64));
        assert_eq!(config.zone_headroom, 0);
    }
}

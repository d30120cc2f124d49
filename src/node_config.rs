//! Node configuration store.
//!
//! Allocators advertise each gateway's summary routes by writing the
//! `bgpParams.specificNetworkPrefixes` automatic override for POP nodes.

use log::debug;
use serde_json::{json, Map, Value};

/// Write access to per-node automatic config overrides
pub trait NodeConfigStore {
    /// Set (or clear, with None) a node's comma-separated list of specific
    /// network prefixes
    fn set_auto_node_specific_network_prefixes(
        &mut self,
        node_name: &str,
        prefixes: Option<&str>,
    ) -> Result<(), String>;
}

/// Automatic node overrides held as a JSON document:
/// `{ "<node>": { "bgpParams": { "specificNetworkPrefixes": "..." } } }`
#[derive(Debug, Clone)]
pub struct InMemoryNodeConfig {
    auto_node_overrides: Value,
}

impl Default for InMemoryNodeConfig {
    fn default() -> Self {
        Self {
            auto_node_overrides: Value::Object(Map::new()),
        }
    }
}

impl InMemoryNodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current specific network prefixes override for a node
    pub fn auto_node_specific_network_prefixes(&self, node_name: &str) -> Option<&str> {
        self.auto_node_overrides
            .get(node_name)?
            .get("bgpParams")?
            .get("specificNetworkPrefixes")?
            .as_str()
    }

    /// The whole override document
    pub fn auto_node_overrides(&self) -> &Value {
        &self.auto_node_overrides
    }
}

impl NodeConfigStore for InMemoryNodeConfig {
    fn set_auto_node_specific_network_prefixes(
        &mut self,
        node_name: &str,
        prefixes: Option<&str>,
    ) -> Result<(), String> {
        if self.auto_node_specific_network_prefixes(node_name) == prefixes {
            return Ok(());
        }

        let overrides = self
            .auto_node_overrides
            .as_object_mut()
            .ok_or_else(|| "auto node overrides are not a JSON object".to_string())?;

        match prefixes {
            Some(prefixes) => {
                debug!(
                    "Setting `specificNetworkPrefixes` automatic node override for node `{}` to `{}`",
                    node_name, prefixes
                );
                let node_overrides = overrides.entry(node_name.to_string()).or_insert_with(|| json!({}));
                let bgp_params = node_overrides
                    .as_object_mut()
                    .ok_or_else(|| format!("overrides for node {} are not a JSON object", node_name))?
                    .entry("bgpParams")
                    .or_insert_with(|| json!({}));
                bgp_params
                    .as_object_mut()
                    .ok_or_else(|| format!("bgpParams for node {} are not a JSON object", node_name))?
                    .insert("specificNetworkPrefixes".to_string(), Value::String(prefixes.to_string()));
            }
            None => {
                debug!(
                    "Clearing `specificNetworkPrefixes` automatic node override for node `{}`",
                    node_name
                );
                if let Some(bgp_params) = overrides
                    .get_mut(node_name)
                    .and_then(|node| node.get_mut("bgpParams"))
                    .and_then(Value::as_object_mut)
                {
                    bgp_params.remove("specificNetworkPrefixes");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear_override() {
        let mut config = InMemoryNodeConfig::new();
        config
            .set_auto_node_specific_network_prefixes("node-1", Some("face:b00c::/56"))
            .unwrap();
        assert_eq!(
            config.auto_node_specific_network_prefixes("node-1"),
            Some("face:b00c::/56")
        );
        assert_eq!(
            config.auto_node_overrides()["node-1"]["bgpParams"]["specificNetworkPrefixes"],
            "face:b00c::/56"
        );

        config.set_auto_node_specific_network_prefixes("node-1", None).unwrap();
        assert_eq!(config.auto_node_specific_network_prefixes("node-1"), None);
    }

    #[test]
    fn test_clearing_unknown_node_is_ok() {
        let mut config = InMemoryNodeConfig::new();
        assert!(config.set_auto_node_specific_network_prefixes("ghost", None).is_ok());
        assert_eq!(config.auto_node_specific_network_prefixes("ghost"), None);
    }
}

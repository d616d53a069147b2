//! Agent configuration

use anyhow::Result;
use serde::Deserialize;
use snmp_lib::SnmpConfig;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name reported in logs and as the `agent_host` tag
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub snmp: SnmpConfig,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl AgentConfig {
    /// Load from the file named by `AGENT_CONFIG`, if any, then `AGENT_*`
    /// environment variables (`AGENT_SNMP__PORT=1161`)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("AGENT_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("AGENT").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_source() {
        let config: AgentConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.snmp.port, 161);
        assert!(!config.snmp.traps.enable);
    }

    #[test]
    fn test_nested_snmp_section() {
        let config: AgentConfig = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
api_port: 9100
snmp:
  specific_devices: ["10.0.0.1"]
  profile: cisco
  traps:
    enable: true
    port: 1162
"#,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.snmp.specific_devices, vec!["10.0.0.1"]);
        assert_eq!(config.snmp.profile, "cisco");
        assert_eq!(config.snmp.traps.port, 1162);
    }
}

use std::{
    fs::read_to_string,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use gptp::config::{ClockIdentity, Profile};
use log::warn;
use serde::{Deserialize, Deserializer};
use timestamped_socket::interface::InterfaceName;

use crate::tracing::LogLevel;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub loglevel: LogLevel,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_domain")]
    pub domain: u8,
    #[serde(default, deserialize_with = "deserialize_clock_identity")]
    pub identity: Option<ClockIdentity>,
    /// Overrides the profile's priority1; 255 makes this a slave-only clock
    #[serde(default)]
    pub priority1: Option<u8>,
    #[serde(default)]
    pub priority2: Option<u8>,
    #[serde(rename = "port", default)]
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loglevel: LogLevel::default(),
            profile: default_profile(),
            domain: default_domain(),
            identity: None,
            priority1: None,
            priority2: None,
            ports: Vec::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PortConfig {
    pub interface: InterfaceName,
    /// PTP hardware clock index backing this interface; software
    /// timestamping is used when absent
    #[serde(default)]
    pub hardware_clock: Option<u32>,
    /// Log2-seconds overrides for the profile's transmit cadences
    #[serde(default)]
    pub sync_interval: Option<i8>,
    #[serde(default)]
    pub announce_interval: Option<i8>,
    #[serde(default)]
    pub pdelay_interval: Option<i8>,
}

impl PortConfig {
    /// The profile driving this port: the instance profile with the port's
    /// interval overrides folded in
    pub fn port_profile(&self, instance_profile: &Profile) -> Profile {
        let mut profile = instance_profile.clone();
        if let Some(log) = self.sync_interval {
            profile.sync_interval_log = log;
        }
        if let Some(log) = self.announce_interval {
            profile.announce_interval_log = log;
        }
        if let Some(log) = self.pdelay_interval {
            profile.pdelay_interval_log = log;
        }
        profile
    }
}

fn deserialize_clock_identity<'de, D>(deserializer: D) -> Result<Option<ClockIdentity>, D::Error>
where
    D: Deserializer<'de>,
{
    use hex::FromHex;
    use serde::de::Error;
    let raw: String = Deserialize::deserialize(deserializer)?;
    Ok(Some(ClockIdentity(<[u8; 8]>::from_hex(raw).map_err(
        |e| D::Error::custom(format!("Invalid clock identifier: {}", e)),
    )?)))
}

impl Config {
    /// Parse config from file
    pub fn from_file(file: &Path) -> Result<Config, ConfigError> {
        let meta = std::fs::metadata(file).map_err(ConfigError::Io)?;
        let perm = meta.permissions();

        if perm.mode() as libc::mode_t & libc::S_IWOTH != 0 {
            warn!("Unrestricted config file permissions: Others can write.");
        }

        let contents = read_to_string(file).map_err(ConfigError::Io)?;
        let config: Config = toml::de::from_str(&contents).map_err(ConfigError::Toml)?;
        config.warn_when_unreasonable();
        Ok(config)
    }

    /// Warns about unreasonable config values
    pub fn warn_when_unreasonable(&self) {
        if self.ports.is_empty() {
            warn!("No ports configured.");
        }

        if self.ports.len() > gptp::MAX_PORTS {
            warn!("Too many ports are configured.");
        }
    }

    /// The named profile this config selects
    pub fn instance_profile(&self) -> Result<Profile, ConfigError> {
        Profile::by_name(&self.profile).ok_or_else(|| ConfigError::UnknownProfile(self.profile.clone()))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    UnknownProfile(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => writeln!(f, "io error while reading config: {e}"),
            ConfigError::Toml(e) => writeln!(f, "config toml parsing error: {e}"),
            ConfigError::UnknownProfile(name) => writeln!(
                f,
                "unknown profile {name:?} (expected standard, milan, avnu_base or automotive)"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_domain() -> u8 {
    0
}

fn default_profile() -> String {
    "standard".to_string()
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub observation_path: Option<PathBuf>,
    #[serde(default = "default_observation_permissions")]
    pub observation_permissions: u32,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            observation_path: Default::default(),
            observation_permissions: default_observation_permissions(),
        }
    }
}

const fn default_observation_permissions() -> u32 {
    0o666
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use gptp::config::ProfileKind;
    use timestamped_socket::interface::InterfaceName;

    use crate::{config::ObservabilityConfig, tracing::LogLevel};

    // Minimal amount of config results in default values
    #[test]
    fn minimal_config() {
        const MINIMAL_CONFIG: &str = r#"
profile = "milan"

[[port]]
interface = "enp0s31f6"
"#;

        let expected_port = crate::config::PortConfig {
            interface: InterfaceName::from_str("enp0s31f6").unwrap(),
            hardware_clock: None,
            sync_interval: None,
            announce_interval: None,
            pdelay_interval: None,
        };

        let expected = crate::config::Config {
            loglevel: LogLevel::Info,
            profile: "milan".to_string(),
            domain: 0,
            identity: None,
            priority1: None,
            priority2: None,
            ports: vec![expected_port],
            observability: ObservabilityConfig::default(),
        };

        let actual: crate::config::Config = toml::from_str(MINIMAL_CONFIG).unwrap();
        assert_eq!(expected, actual);
        assert_eq!(
            actual.instance_profile().unwrap().kind,
            ProfileKind::Milan
        );
    }

    #[test]
    fn interval_overrides_fold_into_profile() {
        const CONFIG: &str = r#"
[[port]]
interface = "eth0"
sync-interval = -3
"#;
        let config: crate::config::Config = toml::from_str(CONFIG).unwrap();
        let profile = config.instance_profile().unwrap();
        let port_profile = config.ports[0].port_profile(&profile);
        assert_eq!(port_profile.sync_interval_log, -3);
        assert_eq!(port_profile.announce_interval_log, 0);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        const CONFIG: &str = r#"
profile = "isdn"
"#;
        let config: crate::config::Config = toml::from_str(CONFIG).unwrap();
        assert!(config.instance_profile().is_err());
    }
}

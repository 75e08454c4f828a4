use std::net::Ipv4Addr;
use std::path::Path;

use ini::{Ini, Properties};
use ipnetwork::Ipv4Network;
use tracing::*;

use crate::{Error, Result, cidr};

pub static DEFAULT_CONFIG_FILE: &str = "/etc/sona/sona-cni.conf";
pub static SECTION: &str = "network";

pub static DEFAULT_TRANSIENT_CIDR: &str = "172.10.0.0/16";
pub static DEFAULT_TRANSIENT_LOCAL_CIDR: &str = "172.11.0.0/16";
pub static DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";

/// Static per-node settings from the `[network]` section of the config file.
///
/// Optional ranges are already resolved to their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub cidr: Option<Ipv4Network>,
    pub global_cidr: Option<Ipv4Network>,
    pub external_interface: Option<String>,
    pub external_gateway_ip: Option<Ipv4Addr>,
    pub transient_cidr: Ipv4Network,
    pub transient_local_cidr: Ipv4Network,
    pub service_cidr: Ipv4Network,
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Reading node config from {}", path.display());
        let ini = Ini::load_from_file(path).map_err(|e| {
            Error::ConfigError(format!("failure read config {}: {e}", path.display()))
        })?;
        Self::from_ini(&ini)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let ini = Ini::load_from_str(contents)
            .map_err(|e| Error::ConfigError(format!("failure parse config: {e}")))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let empty = Properties::new();
        let section = ini.section(Some(SECTION)).unwrap_or(&empty);
        let get = |key: &str| {
            section
                .get(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let cidr_or = |key: &str, default: &str| -> Result<Ipv4Network> {
            let value = get(key).unwrap_or_else(|| default.to_string());
            cidr::parse(&value).map_err(|e| Error::ConfigError(format!("failure get {key}: {e}")))
        };
        let optional_cidr = |key: &str| -> Result<Option<Ipv4Network>> {
            get(key)
                .map(|v| cidr::parse(&v))
                .transpose()
                .map_err(|e| Error::ConfigError(format!("failure get {key}: {e}")))
        };

        let external_gateway_ip = get("external_gateway_ip")
            .map(|v| {
                v.parse::<Ipv4Addr>().map_err(|e| {
                    Error::ConfigError(format!("failure get external gateway IP {v:?}: {e}"))
                })
            })
            .transpose()?;

        Ok(NodeConfig {
            cidr: optional_cidr("cidr")?,
            global_cidr: optional_cidr("global_cidr")?,
            external_interface: get("external_interface"),
            external_gateway_ip,
            transient_cidr: cidr_or("transient_cidr", DEFAULT_TRANSIENT_CIDR)?,
            transient_local_cidr: cidr_or("transient_local_cidr", DEFAULT_TRANSIENT_LOCAL_CIDR)?,
            service_cidr: cidr_or("service_cidr", DEFAULT_SERVICE_CIDR)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_optional_keys_fall_back_to_defaults() {
        let cfg = NodeConfig::parse("[network]\ncidr = 10.244.1.0/24\n").unwrap();
        assert_eq!(cfg.transient_cidr.to_string(), "172.10.0.0/16");
        assert_eq!(cfg.transient_local_cidr.to_string(), "172.11.0.0/16");
        assert_eq!(cfg.service_cidr.to_string(), "10.96.0.0/12");
        assert!(cfg.external_interface.is_none());
        assert!(cfg.external_gateway_ip.is_none());
        assert!(cfg.global_cidr.is_none());
    }

    #[test]
    fn reads_all_keys() {
        let cfg = NodeConfig::parse(
            "[network]\n\
             cidr = 10.244.1.0/24\n\
             global_cidr = 10.244.0.0/16\n\
             external_interface = eth1\n\
             external_gateway_ip = 192.168.0.1\n\
             transient_cidr = 172.20.0.0/16\n\
             transient_local_cidr = 172.21.0.0/16\n\
             service_cidr = 10.100.0.0/16\n",
        )
        .unwrap();
        assert_eq!(cfg.cidr.unwrap().to_string(), "10.244.1.0/24");
        assert_eq!(cfg.external_interface.as_deref(), Some("eth1"));
        assert_eq!(cfg.external_gateway_ip, Some(Ipv4Addr::new(192, 168, 0, 1)));
        assert_eq!(cfg.transient_cidr.to_string(), "172.20.0.0/16");
        assert_eq!(cfg.service_cidr.to_string(), "10.100.0.0/16");
    }

    #[test]
    fn empty_values_count_as_absent() {
        let cfg = NodeConfig::parse("[network]\nexternal_interface =\n").unwrap();
        assert!(cfg.external_interface.is_none());
    }

    #[test]
    fn invalid_cidr_is_a_config_error() {
        let err = NodeConfig::parse("[network]\nservice_cidr = 10.96.0.0/99\n").unwrap_err();
        assert_eq!(err.code(), 102);
    }

    #[test]
    fn invalid_gateway_ip_is_a_config_error() {
        let err = NodeConfig::parse("[network]\nexternal_gateway_ip = gw\n").unwrap_err();
        assert_eq!(err.code(), 102);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[network]\nexternal_interface = eth2").unwrap();
        let cfg = NodeConfig::load(file.path()).unwrap();
        assert_eq!(cfg.external_interface.as_deref(), Some("eth2"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeConfig::load(dir.path().join("absent.conf")).unwrap_err();
        assert_eq!(err.code(), 102);
    }
}

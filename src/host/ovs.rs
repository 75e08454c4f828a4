use std::collections::BTreeMap;
use std::time::Duration;

use tokio::process::Command;
use tracing::*;

use super::{HostError, HostResult};
use crate::{Error, Result};

pub static OVS_VSCTL: &str = "ovs-vsctl";
pub static OVS_OFCTL: &str = "ovs-ofctl";

/// Runs `ovs-vsctl` / `ovs-ofctl` with a fixed timeout and quiet console.
#[derive(Debug, Clone)]
pub struct OvsCtl {
    pub vsctl: String,
    pub ofctl: String,
    pub timeout: Duration,
}

impl Default for OvsCtl {
    fn default() -> Self {
        Self {
            vsctl: OVS_VSCTL.to_string(),
            ofctl: OVS_OFCTL.to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl OvsCtl {
    async fn call(&self, program: &str, args: &[String]) -> HostResult<String> {
        let command = format!("{program} {}", args.join(" "));
        debug!("Running {command}");
        let mut cmd = Command::new(program);
        cmd.arg(format!("--timeout={}", self.timeout.as_secs()))
            .arg("-vconsole:off")
            .args(args)
            .kill_on_drop(true);
        // The tool enforces its own timeout; this only guards against a wedged child
        let output = tokio::time::timeout(self.timeout + Duration::from_secs(1), cmd.output())
            .await
            .map_err(|_| HostError::Timeout(command.clone()))??;
        if !output.status.success() {
            return Err(HostError::CommandError {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn vsctl<S: AsRef<str>>(&self, args: &[S]) -> HostResult<String> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.call(&self.vsctl, &args).await
    }

    pub async fn ofctl<S: AsRef<str>>(&self, args: &[S]) -> HostResult<String> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.call(&self.ofctl, &args).await
    }

    pub async fn list_ifaces(&self, bridge: &str) -> HostResult<Vec<String>> {
        let out = self.vsctl(&["list-ifaces", bridge]).await?;
        Ok(parse_ifaces(&out))
    }

    pub async fn add_port(&self, bridge: &str, port: &str) -> HostResult<()> {
        self.vsctl(&["add-port", bridge, port]).await.map(|_| ())
    }

    pub async fn bridge_hwaddr(&self, bridge: &str) -> HostResult<Option<String>> {
        let out = self
            .vsctl(&["--if-exists", "get", "bridge", bridge, "other-config:hwaddr"])
            .await?;
        Ok(parse_quoted(&out))
    }

    pub async fn set_bridge_hwaddr(&self, bridge: &str, mac: &str) -> HostResult<()> {
        let hwaddr = format!("other-config:hwaddr=\"{mac}\"");
        self.vsctl(&["set", "bridge", bridge, hwaddr.as_str()])
            .await
            .map(|_| ())
    }

    pub async fn set_interface_external_ids(
        &self,
        interface: &str,
        ids: &BTreeMap<String, String>,
    ) -> HostResult<()> {
        let mut args = vec!["set".to_string(), "Interface".to_string(), interface.to_string()];
        args.extend(ids.iter().map(|(k, v)| format!("external-ids:{k}={v}")));
        self.vsctl(args.as_slice()).await.map(|_| ())
    }

    pub async fn port_hwaddr(&self, bridge: &str, port: &str) -> HostResult<Option<String>> {
        let out = self.ofctl(&["dump-ports-desc", bridge]).await?;
        Ok(parse_port_hwaddr(&out, port))
    }

    pub async fn interface_external_ids(&self, interface: &str) -> HostResult<BTreeMap<String, String>> {
        let out = self
            .vsctl(&["--if-exists", "get", "Interface", interface, "external_ids"])
            .await?;
        Ok(parse_map(&out))
    }

    /// OpenFlow datapath id of `bridge`, e.g. `of:0000aabbccddeeff`.
    pub async fn dpid(&self, bridge: &str) -> Result<Option<String>> {
        let out = self
            .ofctl(&["show", bridge])
            .await
            .map_err(|e| Error::IdentificationError(format!("failure get DPID {e}")))?;
        Ok(parse_dpid(&out))
    }
}

pub fn parse_ifaces(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// `{a="1", b=x}` as printed by `ovs-vsctl get` for map columns
pub fn parse_map(out: &str) -> BTreeMap<String, String> {
    out.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(", ")
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((
                key.trim().trim_matches('"').to_string(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect()
}

fn parse_quoted(out: &str) -> Option<String> {
    let value = out.trim().trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
}

pub fn parse_dpid(show: &str) -> Option<String> {
    let first = show.lines().next()?;
    let (_, dpid) = first.split_once("dpid:")?;
    Some(format!("of:{}", dpid.trim()))
}

pub fn parse_port_hwaddr(desc: &str, port: &str) -> Option<String> {
    let keyword = format!("({port}): addr:");
    let (_, rest) = desc.split_once(&keyword)?;
    rest.get(..17).map(str::to_string)
}

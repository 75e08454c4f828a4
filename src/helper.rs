use crate::{Error, Result};

pub static NODE_NAME_ENV: &str = "NODE_NAME";

/// Name of the node this hook runs on: `NODE_NAME`, else the hostname.
pub fn get_my_node_name() -> Result<String> {
    if let Ok(name) = std::env::var(NODE_NAME_ENV) {
        if !name.trim().is_empty() {
            return Ok(name.trim().to_string());
        }
    }
    let raw = std::fs::read_to_string("/etc/hostname").map_err(Error::IoError)?;
    parse_hostname(&raw)
}

fn parse_hostname(raw: &str) -> Result<String> {
    let name = raw.trim_end_matches('\n').trim();
    if name.is_empty() {
        return Err(Error::OtherError("hostname is empty".to_string()));
    }
    Ok(name.to_string())
}

//! In-memory host that behaves like the kernel and OVS for the calls the
//! reconciler makes, and records every mutating call.

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;

use ipnetwork::{Ipv4Network, Ipv6Network};

use crate::host::{HostError, HostNetwork, HostResult, LinkState};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeState {
    pub links: BTreeMap<String, LinkState>,
    /// (destination, device)
    pub routes: Vec<(Ipv4Network, String)>,
    pub hwaddrs: BTreeMap<String, String>,
    pub ports: BTreeMap<String, Vec<String>>,
    pub external_ids: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

pub fn net(s: &str) -> Ipv4Network {
    s.parse().unwrap()
}

fn connected(address: &Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(address.network(), address.prefix()).unwrap()
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(self, name: &str, up: bool, mac: &str, addresses: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let index = state.links.len() as u32 + 2;
            let addresses: Vec<Ipv4Network> = addresses.iter().map(|a| net(a)).collect();
            if up {
                for a in &addresses {
                    state.routes.push((connected(a), name.to_string()));
                }
            }
            state.links.insert(
                name.to_string(),
                LinkState {
                    index,
                    up,
                    mac: Some(mac.to_string()),
                    addresses,
                    ipv6_addresses: Vec::new(),
                },
            );
        }
        self
    }

    pub fn with_route(self, destination: &str, device: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .routes
            .push((net(destination), device.to_string()));
        self
    }

    pub fn with_ipv6(self, name: &str, address: &str) -> Self {
        let address: Ipv6Network = address.parse().unwrap();
        if let Some(link) = self.state.lock().unwrap().links.get_mut(name) {
            link.ipv6_addresses.push(address);
        }
        self
    }

    pub fn with_hwaddr(self, bridge: &str, mac: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .hwaddrs
            .insert(bridge.to_string(), mac.to_string());
        self
    }

    pub fn with_port(self, bridge: &str, port: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .ports
            .entry(bridge.to_string())
            .or_default()
            .push(port.to_string());
        self
    }

    /// Fail every mutating call whose description contains `needle`
    pub fn failing_on(self, needle: &str) -> Self {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
        self
    }

    /// Stop injecting failures, keeping whatever state was reached
    pub fn recover(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn state(&self) -> FakeState {
        self.state.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn routes_via(&self, device: &str) -> Vec<String> {
        self.state()
            .routes
            .iter()
            .filter(|(_, d)| d == device)
            .map(|(n, _)| n.to_string())
            .collect()
    }

    fn record(&self, call: String) -> HostResult<()> {
        if let Some(needle) = self.fail_on.lock().unwrap().as_ref() {
            if call.contains(needle.as_str()) {
                return Err(HostError::IoError(io::Error::other(format!(
                    "injected failure: {call}"
                ))));
            }
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn with_link_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut LinkState, &mut Vec<(Ipv4Network, String)>) -> T,
    ) -> HostResult<T> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let link = state
            .links
            .get_mut(name)
            .ok_or_else(|| HostError::LinkNotFound(name.to_string()))?;
        Ok(f(link, &mut state.routes))
    }
}

impl HostNetwork for FakeHost {
    async fn link(&self, name: &str) -> HostResult<Option<LinkState>> {
        Ok(self.state.lock().unwrap().links.get(name).cloned())
    }

    async fn route_destinations(&self) -> HostResult<Vec<Ipv4Network>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .routes
            .iter()
            .map(|(n, _)| *n)
            .collect())
    }

    async fn bridge_hwaddr(&self, bridge: &str) -> HostResult<Option<String>> {
        Ok(self.state.lock().unwrap().hwaddrs.get(bridge).cloned())
    }

    async fn bridge_ports(&self, bridge: &str) -> HostResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ports
            .get(bridge)
            .cloned()
            .unwrap_or_default())
    }

    async fn port_hwaddr(&self, _bridge: &str, port: &str) -> HostResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .links
            .get(port)
            .and_then(|l| l.mac.clone()))
    }

    async fn interface_external_ids(&self, interface: &str) -> HostResult<BTreeMap<String, String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .external_ids
            .get(interface)
            .cloned()
            .unwrap_or_default())
    }

    async fn flush_addresses(&self, link: &str) -> HostResult<()> {
        self.record(format!("flush {link}"))?;
        self.with_link_mut(link, |l, routes| {
            l.ipv6_addresses.clear();
            let gone: Vec<Ipv4Network> = l.addresses.drain(..).map(|a| connected(&a)).collect();
            routes.retain(|(n, d)| !(d == link && gone.contains(n)));
        })
    }

    async fn add_address(&self, link: &str, address: Ipv4Network) -> HostResult<()> {
        self.record(format!("add address {address} {link}"))?;
        self.with_link_mut(link, |l, routes| {
            l.addresses.push(address);
            if l.up {
                routes.push((connected(&address), link.to_string()));
            }
        })
    }

    async fn set_link_up(&self, link: &str) -> HostResult<()> {
        self.record(format!("up {link}"))?;
        self.with_link_mut(link, |l, routes| {
            if !l.up {
                l.up = true;
                for a in &l.addresses {
                    routes.push((connected(a), link.to_string()));
                }
            }
        })
    }

    async fn add_route(&self, destination: Ipv4Network, link: &str) -> HostResult<()> {
        self.record(format!("add route {destination} {link}"))?;
        let mut state = self.state.lock().unwrap();
        if !state.links.get(link).is_some_and(|l| l.up) {
            return Err(HostError::LinkNotFound(link.to_string()));
        }
        if state.routes.iter().any(|(n, _)| *n == destination) {
            return Err(HostError::IoError(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "File exists",
            )));
        }
        state.routes.push((destination, link.to_string()));
        Ok(())
    }

    async fn set_bridge_hwaddr(&self, bridge: &str, mac: &str) -> HostResult<()> {
        self.record(format!("hwaddr {bridge} {mac}"))?;
        self.state
            .lock()
            .unwrap()
            .hwaddrs
            .insert(bridge.to_string(), mac.to_string());
        Ok(())
    }

    async fn add_port(&self, bridge: &str, port: &str) -> HostResult<()> {
        self.record(format!("add-port {bridge} {port}"))?;
        let mut state = self.state.lock().unwrap();
        let ports = state.ports.entry(bridge.to_string()).or_default();
        if ports.iter().any(|p| p == port) {
            return Err(HostError::IoError(io::Error::other("port already exists")));
        }
        ports.push(port.to_string());
        Ok(())
    }

    async fn set_interface_external_ids(
        &self,
        interface: &str,
        ids: &BTreeMap<String, String>,
    ) -> HostResult<()> {
        self.record(format!("external-ids {interface}"))?;
        self.state
            .lock()
            .unwrap()
            .external_ids
            .entry(interface.to_string())
            .or_default()
            .extend(ids.clone());
        Ok(())
    }
}

// NETANIM: Animation of Emulated Network Traffic from Declarative Topology Definitions
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! VLAN and VXLAN overlay configuration applied after the network starts.
//!
//! Interface fields of the definition that describe overlays cannot be
//! realized before the backend runs, so they are configured as an extra
//! step between start and settle. Every interface created here is recorded
//! and removed again during cleanup, newest first.

use std::collections::HashMap;

use crate::{
    backend::{BackendError, NodeRef, VirtualNetwork},
    definition::{Interface, NetworkDefinition, PortMode, VxlanMode},
    jobs::sanitize,
};

/// Interfaces created on the nodes for the overlay, in creation order.
#[derive(Debug, Default)]
pub struct OverlayState {
    created: Vec<(NodeRef, String)>,
}

impl OverlayState {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    fn contains(&self, node: NodeRef, name: &str) -> bool {
        self.created
            .iter()
            .any(|(n, created)| *n == node && created == name)
    }

    fn record(&mut self, node: NodeRef, name: String) {
        self.created.push((node, name));
    }
}

/// Configure VLAN bridges and VXLAN tunnel endpoints from the interface
/// fields of the definition.
pub async fn configure(
    def: &NetworkDefinition,
    nodes: &HashMap<String, NodeRef>,
    net: &mut dyn VirtualNetwork,
) -> Result<OverlayState, BackendError> {
    let mut state = OverlayState::default();
    for node in &def.nodes {
        let Some(&handle) = nodes.get(&node.id) else {
            continue;
        };
        for iface in &node.interfaces {
            configure_vlans(handle, iface, net, &mut state).await?;
            configure_vxlan(handle, iface, net, &mut state).await?;
        }
    }
    if !state.is_empty() {
        log::debug!("configured {} overlay interfaces", state.created.len());
    }
    Ok(state)
}

async fn configure_vlans(
    node: NodeRef,
    iface: &Interface,
    net: &mut dyn VirtualNetwork,
    state: &mut OverlayState,
) -> Result<(), BackendError> {
    let Some(vlans) = &iface.vlan else {
        return Ok(());
    };
    let mode = iface.type_connection.unwrap_or(PortMode::Access);
    for &vid in vlans.ids() {
        let bridge = format!("brv{vid}");
        if !state.contains(node, &bridge) {
            net.run_on(node, &format!("ip link add name {bridge} type bridge"))
                .await?;
            net.run_on(node, &format!("ip link set {bridge} up")).await?;
            state.record(node, bridge.clone());
        }
        match mode {
            // untagged: the port itself joins the VLAN bridge
            PortMode::Access => {
                net.run_on(node, &format!("ip link set {} master {bridge}", iface.name))
                    .await?;
                return Ok(());
            }
            // tagged: one 802.1q sub-interface per VLAN
            PortMode::Trunk => {
                let sub = format!("{}.{vid}", iface.name);
                net.run_on(
                    node,
                    &format!(
                        "ip link add link {} name {sub} type vlan id {vid}",
                        iface.name
                    ),
                )
                .await?;
                net.run_on(node, &format!("ip link set {sub} master {bridge}"))
                    .await?;
                net.run_on(node, &format!("ip link set {sub} up")).await?;
                state.record(node, sub);
            }
        }
    }
    Ok(())
}

async fn configure_vxlan(
    node: NodeRef,
    iface: &Interface,
    net: &mut dyn VirtualNetwork,
    state: &mut OverlayState,
) -> Result<(), BackendError> {
    let Some(vni) = iface.vxlan_vni else {
        return Ok(());
    };
    let name = format!("vx{vni}");
    let command = match iface.vxlan_connection_type.unwrap_or(VxlanMode::Multicast) {
        VxlanMode::Unicast => {
            let remote = iface
                .vxlan_vni_to_target_ip
                .as_ref()
                .and_then(|map| map.get(&vni))
                .and_then(|raw| sanitize::ipv4(raw));
            let Some(remote) = remote else {
                log::warn!(
                    "vxlan vni {vni} on {} has no valid remote endpoint; skipping",
                    iface.name
                );
                return Ok(());
            };
            format!(
                "ip link add {name} type vxlan id {vni} remote {remote} \
                 dstport 4789 dev {}",
                iface.name
            )
        }
        VxlanMode::Multicast => format!(
            "ip link add {name} type vxlan id {vni} group 239.1.1.1 \
             dstport 4789 dev {}",
            iface.name
        ),
    };
    net.run_on(node, &command).await?;
    net.run_on(node, &format!("ip link set {name} up")).await?;
    state.record(node, name);
    Ok(())
}

/// Delete every overlay interface created by [`configure`], newest first.
/// Failures are logged; cleanup keeps going.
pub async fn teardown(state: &OverlayState, net: &mut dyn VirtualNetwork) {
    for (node, name) in state.created.iter().rev() {
        if let Err(e) = net.run_on(*node, &format!("ip link del {name}")).await {
            log::warn!("failed to remove overlay interface {name}: {e}");
        }
    }
}

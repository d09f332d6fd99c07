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
//! Building the emulated topology from a network definition.
//!
//! Every declared edge is realized as two sub-links joined by a synthetic
//! capture-tap switch, so each direction of each link can be captured
//! independently of the endpoints.

use std::{collections::HashMap, net::Ipv4Addr, time::Duration};

use ipnet::Ipv4Net;

use crate::{
    backend::{BackendError, CaptureSpec, LinkSpec, NodeRef, NodeSpec, VirtualNetwork},
    definition::{Edge, Interface, NetworkDefinition, Node, NodeKind, StpMode},
    jobs::sanitize,
};

/// Propagation delay of each capture-tap sub-link in milliseconds.
///
/// The animation frame window ([`crate::animation::FRAME_WINDOW`]) is tuned
/// against this value; change them together.
pub const TAP_LINK_DELAY_MS: u32 = 10;

/// Queue length of each capture-tap sub-link.
pub const TAP_LINK_QUEUE: u32 = 1000;

/// Settle time before jobs are issued, without convergence protocols.
const SETTLE_DEFAULT: Duration = Duration::from_secs(3);
/// Settle time when at least one switch runs RSTP.
const SETTLE_RSTP: Duration = Duration::from_secs(5);
/// Settle time when at least one switch runs classic STP.
const SETTLE_STP: Duration = Duration::from_secs(33);

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("edge {edge} references unknown node {node}")]
    UnknownNode { edge: String, node: String },
    #[error("no interface of node {node} is wired to edge {edge}")]
    MissingEndpoint { edge: String, node: String },
    #[error("{count} interfaces of node {node} are wired to edge {edge}")]
    AmbiguousEndpoint {
        edge: String,
        node: String,
        count: usize,
    },
    #[error("node {node} carries invalid stp mode {raw}")]
    InvalidStp { node: String, raw: u8 },
    #[error("stp mode {mode} on node {node} is not supported by the emulation")]
    UnsupportedStp { node: String, mode: StpMode },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// One realized edge of the topology, kept around to locate capture files
/// and to label the events classified from them.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyLink {
    /// Interface name of the `source` endpoint.
    pub iface_a: String,
    /// Interface name of the `target` endpoint.
    pub iface_b: String,
    pub edge_id: String,
    pub source: String,
    pub target: String,
    pub loss_percentage: f64,
}

/// Result of topology construction.
#[derive(Debug)]
pub struct BuiltTopology {
    pub nodes: HashMap<String, NodeRef>,
    pub links: Vec<TopologyLink>,
    /// How long to wait after start before issuing jobs, sized for the
    /// slowest convergence protocol in the definition.
    pub settle_time: Duration,
}

/// Translate the definition into backend nodes and tapped links.
///
/// Fails without having started anything on invalid STP modes and on edges
/// whose endpoints do not resolve to exactly one interface each.
pub fn build_topology(
    def: &NetworkDefinition,
    net: &mut dyn VirtualNetwork,
) -> Result<BuiltTopology, TopologyError> {
    let mut nodes = HashMap::new();
    let mut settle_time = SETTLE_DEFAULT;

    for node in &def.nodes {
        let spec = node_spec(node, &mut settle_time)?;
        let handle = net.add_node(&node.id, spec)?;
        nodes.insert(node.id.clone(), handle);
    }
    log::debug!(
        "created {} nodes, settle time {settle_time:?}",
        nodes.len()
    );

    let mut links = Vec::with_capacity(def.edges.len());
    for edge in &def.edges {
        links.push(realize_edge(def, edge, &nodes, net)?);
    }

    for node in &def.nodes {
        for iface in &node.interfaces {
            if let Some(addr) = static_addr(iface) {
                net.set_interface_addr(nodes[&node.id], &iface.name, addr)?;
            }
        }
    }

    Ok(BuiltTopology {
        nodes,
        links,
        settle_time,
    })
}

fn node_spec(node: &Node, settle_time: &mut Duration) -> Result<NodeSpec, TopologyError> {
    Ok(match node.kind {
        NodeKind::L2Switch => {
            let mode = StpMode::from_raw(node.stp).ok_or(TopologyError::InvalidStp {
                node: node.id.clone(),
                raw: node.stp,
            })?;
            match mode {
                StpMode::Off => {}
                StpMode::Stp => *settle_time = (*settle_time).max(SETTLE_STP),
                StpMode::Rstp => *settle_time = (*settle_time).max(SETTLE_RSTP),
                StpMode::Mstp => {
                    return Err(TopologyError::UnsupportedStp {
                        node: node.id.clone(),
                        mode,
                    })
                }
            }
            NodeSpec::Switch {
                stp: mode,
                priority: node.priority,
            }
        }
        NodeKind::L1Hub => NodeSpec::Hub,
        // servers differ from hosts only in the jobs run on them
        NodeKind::Host | NodeKind::Server => NodeSpec::Host {
            gateway: node.default_gw.as_deref().and_then(sanitize::ipv4),
        },
        NodeKind::Router => NodeSpec::Router,
    })
}

/// The single interface of `node_id` wired to `edge`. Zero or more than one
/// match is a wiring error in the definition.
fn endpoint_iface<'a>(
    def: &'a NetworkDefinition,
    edge: &'a Edge,
    node_id: &str,
) -> Result<&'a Interface, TopologyError> {
    let node = def.node(node_id).ok_or_else(|| TopologyError::UnknownNode {
        edge: edge.id.clone(),
        node: node_id.to_string(),
    })?;
    let mut matches = node.interfaces_on(&edge.id);
    match (matches.next(), matches.next()) {
        (Some(iface), None) => Ok(iface),
        (None, _) => Err(TopologyError::MissingEndpoint {
            edge: edge.id.clone(),
            node: node_id.to_string(),
        }),
        (Some(_), Some(_)) => Err(TopologyError::AmbiguousEndpoint {
            edge: edge.id.clone(),
            node: node_id.to_string(),
            count: node.interfaces_on(&edge.id).count(),
        }),
    }
}

/// Realize one edge as `source -- tap -- target`, capturing on both
/// sub-links.
fn realize_edge(
    def: &NetworkDefinition,
    edge: &Edge,
    nodes: &HashMap<String, NodeRef>,
    net: &mut dyn VirtualNetwork,
) -> Result<TopologyLink, TopologyError> {
    let iface_a = endpoint_iface(def, edge, &edge.source)?;
    let iface_b = endpoint_iface(def, edge, &edge.target)?;
    let a = resolve(nodes, edge, &edge.source)?;
    let b = resolve(nodes, edge, &edge.target)?;

    let tap = net.add_node(
        &format!("tap-{}", edge.id),
        NodeSpec::Switch {
            stp: StpMode::Off,
            priority: None,
        },
    )?;
    net.add_link(
        a,
        &iface_a.name,
        tap,
        &format!("tap-{}-a", edge.id),
        tap_link(&iface_a.name),
    )?;
    net.add_link(
        tap,
        &format!("tap-{}-b", edge.id),
        b,
        &iface_b.name,
        tap_link(&iface_b.name),
    )?;
    log::trace!("edge {}: {} -- tap -- {}", edge.id, edge.source, edge.target);

    Ok(TopologyLink {
        iface_a: iface_a.name.clone(),
        iface_b: iface_b.name.clone(),
        edge_id: edge.id.clone(),
        source: edge.source.clone(),
        target: edge.target.clone(),
        loss_percentage: edge.loss_percentage,
    })
}

fn resolve(
    nodes: &HashMap<String, NodeRef>,
    edge: &Edge,
    node_id: &str,
) -> Result<NodeRef, TopologyError> {
    nodes
        .get(node_id)
        .copied()
        .ok_or_else(|| TopologyError::UnknownNode {
            edge: edge.id.clone(),
            node: node_id.to_string(),
        })
}

fn tap_link(capture_key: &str) -> LinkSpec {
    LinkSpec {
        delay_ms: TAP_LINK_DELAY_MS,
        max_queue: TAP_LINK_QUEUE,
        capture: Some(CaptureSpec {
            key: capture_key.to_string(),
            exclude: Some("igmp"),
        }),
    }
}

/// The static address of an interface, if its `ip`/`netmask` fields form a
/// valid IPv4 address with a prefix length in `(0, 32]`.
fn static_addr(iface: &Interface) -> Option<Ipv4Net> {
    let ip: Ipv4Addr = sanitize::ipv4(iface.ip.as_deref()?)?;
    let prefix = sanitize::netmask(iface.netmask.as_deref()?)?;
    if prefix == 0 {
        return None;
    }
    Ipv4Net::new(ip, prefix).ok()
}

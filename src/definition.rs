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
//! Data model of the declarative network definition driving one run.
//!
//! A [`NetworkDefinition`] is supplied whole by the surrounding application
//! and stays immutable for the duration of the run. Loose fields such as
//! interface addresses stay raw strings here; their validity is judged at
//! the point where they are applied, so a malformed address degrades that
//! one feature instead of rejecting the whole definition.

use std::collections::HashMap;

use serde::Deserialize;

/// Root input of one emulation run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkDefinition {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub config: DefinitionConfig,
}

impl NetworkDefinition {
    /// Look up a node by its id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look up an edge by its id.
    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }
}

/// Free-form definition settings, carried through untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefinitionConfig(pub HashMap<String, serde_json::Value>);

/// Kind of an emulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    L2Switch,
    L1Hub,
    Host,
    Server,
    Router,
}

/// One device of the definition.
#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// Raw STP mode value of an l2 switch; interpreted and validated by the
    /// topology builder (see [`StpMode::from_raw`]).
    #[serde(default)]
    pub stp: u8,
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub default_gw: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<Interface>,
}

impl Node {
    /// All interfaces of this node wired to the given edge.
    pub fn interfaces_on<'a>(
        &'a self,
        edge_id: &'a str,
    ) -> impl Iterator<Item = &'a Interface> + 'a {
        self.interfaces
            .iter()
            .filter(move |iface| iface.connect.as_deref() == Some(edge_id))
    }
}

/// Spanning-tree flavor of an emulated l2 switch.
///
/// All four raw values parse so that definitions produced elsewhere in the
/// system remain readable, but the emulation only realizes `Off`, `Stp` and
/// `Rstp`; the topology builder rejects `Mstp` explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum StpMode {
    Off,
    Stp,
    Rstp,
    Mstp,
}

impl StpMode {
    /// Interpret the raw `stp` value of a node.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Off),
            1 => Some(Self::Stp),
            2 => Some(Self::Rstp),
            3 => Some(Self::Mstp),
            _ => None,
        }
    }
}

/// One interface of a node.
#[derive(Debug, Clone, Deserialize)]
pub struct Interface {
    pub id: String,
    pub name: String,
    /// Id of the edge this interface is wired to.
    #[serde(default)]
    pub connect: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
    #[serde(default)]
    pub vlan: Option<VlanMembership>,
    #[serde(default)]
    pub type_connection: Option<PortMode>,
    #[serde(default)]
    pub vxlan_vni: Option<u32>,
    #[serde(default)]
    pub vxlan_connection_type: Option<VxlanMode>,
    /// Remote tunnel endpoint per VNI for unicast VXLAN.
    #[serde(default)]
    pub vxlan_vni_to_target_ip: Option<HashMap<u32, String>>,
}

/// VLAN membership of a switch port: one untagged VLAN or a tagged set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum VlanMembership {
    Single(u16),
    Tagged(Vec<u16>),
}

impl VlanMembership {
    /// The VLAN ids of this membership, in definition order.
    pub fn ids(&self) -> &[u16] {
        match self {
            Self::Single(vid) => std::slice::from_ref(vid),
            Self::Tagged(vids) => vids,
        }
    }
}

/// Switch-port mode of a VLAN member interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    Access,
    Trunk,
}

/// Addressing mode of a VXLAN tunnel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VxlanMode {
    Unicast,
    Multicast,
}

/// One declared connection between two nodes.
///
/// Loss and duplication percentages are carried through as metadata for the
/// animation output; the emulation itself does not enforce them.
#[derive(Debug, Clone, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub loss_percentage: f64,
    #[serde(default)]
    pub duplicate_percentage: f64,
}

/// One typed device command, identified by its numeric `job_id` code.
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_id: u32,
    pub host_id: String,
    /// Advisory ordering hint. The dispatcher executes jobs in list order
    /// within each phase and ignores this value.
    #[serde(default)]
    pub level: i64,
    #[serde(default)]
    pub arg_1: Option<String>,
    #[serde(default)]
    pub arg_2: Option<String>,
    #[serde(default)]
    pub arg_3: Option<String>,
    #[serde(default)]
    pub arg_4: Option<String>,
}

impl Job {
    /// The n-th argument (1-based), or `""` when absent.
    pub fn arg(&self, n: usize) -> &str {
        let arg = match n {
            1 => &self.arg_1,
            2 => &self.arg_2,
            3 => &self.arg_3,
            4 => &self.arg_4,
            _ => &None,
        };
        arg.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_definition() {
        let def: NetworkDefinition = serde_json::from_value(serde_json::json!({
            "nodes": [
                {
                    "id": "sw1",
                    "kind": "l2_switch",
                    "stp": 2,
                    "priority": 4096,
                    "interfaces": [
                        {"id": "i1", "name": "sw1-eth0", "connect": "e1", "vlan": 10,
                         "type_connection": "access"},
                        {"id": "i2", "name": "sw1-eth1", "connect": "e2", "vlan": [10, 20],
                         "type_connection": "trunk"}
                    ]
                },
                {
                    "id": "h1",
                    "kind": "host",
                    "default_gw": "10.0.0.1",
                    "interfaces": [
                        {"id": "i3", "name": "h1-eth0", "connect": "e1",
                         "ip": "10.0.0.2", "netmask": "24"}
                    ]
                }
            ],
            "edges": [
                {"id": "e1", "source": "h1", "target": "sw1", "loss_percentage": 2.5,
                 "duplicate_percentage": 0.0}
            ],
            "jobs": [
                {"id": "j1", "job_id": 1, "host_id": "h1", "level": 0, "arg_1": "10.0.0.1"}
            ]
        }))
        .unwrap();

        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.node("sw1").unwrap().kind, NodeKind::L2Switch);
        assert_eq!(def.edge("e1").unwrap().loss_percentage, 2.5);
        assert_eq!(def.jobs[0].arg(1), "10.0.0.1");
        assert_eq!(def.jobs[0].arg(2), "");

        let sw1 = def.node("sw1").unwrap();
        assert_eq!(StpMode::from_raw(sw1.stp), Some(StpMode::Rstp));
        assert_eq!(sw1.interfaces[0].vlan.as_ref().unwrap().ids(), &[10]);
        assert_eq!(sw1.interfaces[1].vlan.as_ref().unwrap().ids(), &[10, 20]);
        assert_eq!(sw1.interfaces_on("e1").count(), 1);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result: Result<Node, _> = serde_json::from_value(serde_json::json!({
            "id": "x", "kind": "l4_balancer"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn stp_mode_values() {
        assert_eq!(StpMode::from_raw(0), Some(StpMode::Off));
        assert_eq!(StpMode::from_raw(3), Some(StpMode::Mstp));
        assert_eq!(StpMode::from_raw(4), None);
    }
}

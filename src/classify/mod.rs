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
//! Turning raw per-link captures into labeled packet events.
//!
//! Each link contributes two capture streams, one per direction. Every
//! frame that survives decoding and is part of the modeled traffic becomes
//! one [`PacketEvent`] carrying the link's endpoint metadata; the reverse
//! stream uses the swapped source/target. The wire shape of an event is
//! fixed by the front-end player, field for field.

pub mod frame;

use std::sync::atomic::{AtomicU64, Ordering};

use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;

use netanim_utils::{pcap, timestamp};

use crate::topology::TopologyLink;

use self::frame::{
    decode, ArpFrame, BridgePdu, DecodedFrame, Ipv4Frame, Ipv4Payload, PortRole, TunnelKind,
};

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("cannot parse capture of edge {edge}: {source}")]
    Capture {
        edge: String,
        source: pcap::PcapError,
    },
}

/// Fresh event ids, scoped to one run.
#[derive(Debug, Default)]
pub struct EventIds(AtomicU64);

impl EventIds {
    pub fn next(&self) -> String {
        format!("pkt-{:06}", self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Payload of one animation event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventData {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Placement of one animation event on the topology.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// Edge id the event travels along.
    pub path: String,
    pub source: String,
    pub target: String,
    pub loss_percentage: f64,
}

/// One classified, labeled unit of observed traffic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketEvent {
    pub data: EventData,
    pub config: EventConfig,
    /// 16-digit fixed-width capture timestamp.
    pub timestamp: String,
}

impl PacketEvent {
    /// The timestamp as integer microseconds, for windowing.
    pub fn timestamp_value(&self) -> u64 {
        timestamp::decode(&self.timestamp).unwrap_or(0)
    }
}

/// Direction of one capture stream relative to its link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    AToB,
    BToA,
}

/// Classify both directions of one link. The forward blob holds the frames
/// transmitted by the source endpoint, the reverse blob those of the
/// target endpoint.
pub fn classify_link(
    link: &TopologyLink,
    forward: &[u8],
    reverse: &[u8],
    ids: &EventIds,
) -> Result<Vec<PacketEvent>, ClassifyError> {
    let mut events = classify_stream(link, forward, Direction::AToB, ids)?;
    events.extend(classify_stream(link, reverse, Direction::BToA, ids)?);
    Ok(events)
}

/// Classify all links in parallel and return the union of their events.
pub fn classify_all(
    captures: &[(TopologyLink, Vec<u8>, Vec<u8>)],
    ids: &EventIds,
) -> Result<Vec<PacketEvent>, ClassifyError> {
    let per_link = captures
        .par_iter()
        .map(|(link, forward, reverse)| classify_link(link, forward, reverse, ids))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(per_link.into_iter().flatten().collect_vec())
}

fn classify_stream(
    link: &TopologyLink,
    blob: &[u8],
    direction: Direction,
    ids: &EventIds,
) -> Result<Vec<PacketEvent>, ClassifyError> {
    let frames = pcap::read_frames(blob).map_err(|source| ClassifyError::Capture {
        edge: link.edge_id.clone(),
        source,
    })?;
    let (source, target) = match direction {
        Direction::AToB => (&link.source, &link.target),
        Direction::BToA => (&link.target, &link.source),
    };

    let mut events = Vec::new();
    for captured in frames {
        let decoded = match decode(&captured.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::trace!("skipping malformed frame on edge {}: {e}", link.edge_id);
                continue;
            }
        };
        let Some((label, kind)) = describe(&decoded) else {
            continue;
        };
        events.push(PacketEvent {
            data: EventData {
                id: ids.next(),
                label,
                kind: "packet".to_string(),
            },
            config: EventConfig {
                kind,
                path: link.edge_id.clone(),
                source: source.clone(),
                target: target.clone(),
                loss_percentage: link.loss_percentage,
            },
            timestamp: timestamp::encode_duration(captured.timestamp),
        });
    }
    Ok(events)
}

/// The label and type string of a decoded frame, or `None` when the frame
/// is not part of the modeled traffic.
fn describe(decoded: &DecodedFrame) -> Option<(String, String)> {
    let label = label_of(decoded)?;
    let kind = match decoded {
        DecodedFrame::Ipv4(ip) => format!("{label} {} > {}", ip.src, ip.dst),
        _ => label.clone(),
    };
    Some((label, kind))
}

fn label_of(decoded: &DecodedFrame) -> Option<String> {
    match decoded {
        DecodedFrame::Arp(arp) => Some(arp_label(arp)),
        DecodedFrame::Bridge(pdu) => Some(bridge_label(pdu)),
        DecodedFrame::Ipv4(ip) => ipv4_label(ip),
        // not modeled
        DecodedFrame::Ipv6 => None,
        DecodedFrame::Other => None,
    }
}

fn arp_label(arp: &ArpFrame) -> String {
    match arp.operation {
        1 => format!(
            "ARP-request (who has {}? tell {})",
            arp.target_ip, arp.sender_ip
        ),
        2 => format!("ARP-response ({} is at {})", arp.sender_ip, arp.sender_mac),
        _ => "ARP packet".to_string(),
    }
}

fn bridge_label(pdu: &BridgePdu) -> String {
    if pdu.is_rstp() {
        let role = match pdu.port_role() {
            PortRole::Unknown => "Unknown",
            PortRole::AlternateBackup => "Alternate/Backup",
            PortRole::Root => "Root",
            PortRole::Designated => "Designated",
            PortRole::Reserved => "Reserved",
        };
        format!("RSTP ({role} port)")
    } else {
        match pdu.flags {
            0x00 => "STP (Root)".to_string(),
            0x01 => "STP (TC + Root)".to_string(),
            _ => "STP packet".to_string(),
        }
    }
}

fn ipv4_label(ip: &Ipv4Frame) -> Option<String> {
    Some(match &ip.payload {
        Ipv4Payload::Icmp { icmp_type, code } => icmp_label(*icmp_type, *code).to_string(),
        // not modeled
        Ipv4Payload::Igmp => return None,
        Ipv4Payload::Tcp {
            src_port,
            dst_port,
            flags,
        } => {
            let names = flags.names();
            if names.is_empty() {
                format!("TCP {src_port} > {dst_port}")
            } else {
                format!("TCP ({}) {src_port} > {dst_port}", names.join(" + "))
            }
        }
        Ipv4Payload::Udp {
            src_port,
            dst_port,
            vxlan_inner,
        } => {
            if let Some(inner) = vxlan_inner {
                // the skip rules apply to the tunneled frame as well
                if skip_inner(inner) {
                    return None;
                }
            }
            format!("UDP {src_port} > {dst_port}")
        }
        Ipv4Payload::Tunnel(TunnelKind::IpInIp) => "IP-in-IP tunnel packet".to_string(),
        Ipv4Payload::Tunnel(TunnelKind::Gre) => "GRE tunnel packet".to_string(),
        Ipv4Payload::Other => "IP packet".to_string(),
    })
}

fn skip_inner(inner: &DecodedFrame) -> bool {
    match inner {
        DecodedFrame::Ipv6 => true,
        DecodedFrame::Ipv4(ip) => matches!(ip.payload, Ipv4Payload::Igmp),
        _ => false,
    }
}

fn icmp_label(icmp_type: u8, code: u8) -> &'static str {
    match (icmp_type, code) {
        (8, _) => "ICMP echo-request",
        (0, _) => "ICMP echo-reply",
        (5, _) => "ICMP redirect",
        (3, 0) => "destination net unreachable",
        (3, 1) => "destination host unreachable",
        (3, 3) => "destination port unreachable",
        (3, _) => "destination unreachable",
        (11, _) => "time to live exceeded",
        _ => "ICMP message",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use etherparse::PacketBuilder;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::frame::TcpFlags;

    fn test_link() -> TopologyLink {
        TopologyLink {
            iface_a: "h1-eth0".to_string(),
            iface_b: "sw-eth0".to_string(),
            edge_id: "e1".to_string(),
            source: "h1".to_string(),
            target: "sw".to_string(),
            loss_percentage: 1.5,
        }
    }

    fn echo_request() -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .icmpv4_echo_request(1, 1);
        let mut frame = Vec::new();
        builder.write(&mut frame, b"payload").unwrap();
        frame
    }

    fn vxlan_encapsulated(inner: &[u8]) -> Vec<u8> {
        let mut vxlan_payload = vec![0x08, 0, 0, 0, 0, 0, 0x10, 0];
        vxlan_payload.extend_from_slice(inner);
        let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(43211, frame::VXLAN_PORT);
        let mut frame = Vec::new();
        builder.write(&mut frame, &vxlan_payload).unwrap();
        frame
    }

    fn eth_ipv4_raw(proto: u8, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64);
        let mut frame = Vec::new();
        builder
            .write(&mut frame, etherparse::IpNumber(proto), payload)
            .unwrap();
        frame
    }

    #[test]
    fn icmp_table() {
        assert_eq!(icmp_label(3, 1), "destination host unreachable");
        assert_eq!(icmp_label(3, 0), "destination net unreachable");
        assert_eq!(icmp_label(3, 3), "destination port unreachable");
        assert_eq!(icmp_label(3, 9), "destination unreachable");
        assert_eq!(icmp_label(11, 0), "time to live exceeded");
        assert_eq!(icmp_label(11, 1), "time to live exceeded");
        assert_eq!(icmp_label(42, 0), "ICMP message");
    }

    #[test]
    fn tcp_flags_canonical_order() {
        let frame = DecodedFrame::Ipv4(Ipv4Frame {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            payload: Ipv4Payload::Tcp {
                src_port: 43210,
                dst_port: 80,
                flags: TcpFlags {
                    ack: true,
                    syn: true,
                    ..Default::default()
                },
            },
        });
        let (label, kind) = describe(&frame).unwrap();
        assert_eq!(label, "TCP (SYN + ACK) 43210 > 80");
        assert_eq!(kind, "TCP (SYN + ACK) 43210 > 80 10.0.0.1 > 10.0.0.2");
    }

    #[test]
    fn vxlan_igmp_dropped_outer_udp_kept() {
        let inner_igmp = eth_ipv4_raw(2, &[0x16, 0, 0, 0]);
        let dropped = decode(&vxlan_encapsulated(&inner_igmp)).unwrap();
        assert_eq!(describe(&dropped), None);

        let inner_echo = echo_request();
        let kept = decode(&vxlan_encapsulated(&inner_echo)).unwrap();
        let (label, _) = describe(&kept).unwrap();
        assert_eq!(label, format!("UDP 43211 > {}", frame::VXLAN_PORT));
    }

    #[test]
    fn ipv6_and_igmp_skipped() {
        assert_eq!(describe(&DecodedFrame::Ipv6), None);
        let igmp = decode(&eth_ipv4_raw(2, &[0x16, 0, 0, 0])).unwrap();
        assert_eq!(describe(&igmp), None);
    }

    #[test]
    fn tunnel_and_fallback_labels() {
        let gre = decode(&eth_ipv4_raw(47, &[0; 4])).unwrap();
        assert_eq!(describe(&gre).unwrap().0, "GRE tunnel packet");
        let other = decode(&eth_ipv4_raw(132, &[0; 4])).unwrap();
        assert_eq!(describe(&other).unwrap().0, "IP packet");
    }

    #[test]
    fn stream_events_carry_link_metadata() {
        let link = test_link();
        let ids = EventIds::default();
        let blob = pcap::write_frames([(Duration::new(5, 1000), echo_request().as_slice())])
            .unwrap();
        let empty = pcap::write_frames(std::iter::empty()).unwrap();

        let events = classify_link(&link, &blob, &empty, &ids).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.data.label, "ICMP echo-request");
        assert_eq!(event.data.kind, "packet");
        assert_eq!(event.config.kind, "ICMP echo-request 10.0.0.1 > 10.0.0.2");
        assert_eq!(event.config.path, "e1");
        assert_eq!(event.config.source, "h1");
        assert_eq!(event.config.target, "sw");
        assert_eq!(event.config.loss_percentage, 1.5);
        assert_eq!(event.timestamp, "0000000005000001");
    }

    #[test]
    fn reverse_stream_swaps_endpoints() {
        let link = test_link();
        let ids = EventIds::default();
        let empty = pcap::write_frames(std::iter::empty()).unwrap();
        let blob = pcap::write_frames([(Duration::new(5, 0), echo_request().as_slice())])
            .unwrap();

        let events = classify_link(&link, &empty, &blob, &ids).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].config.source, "sw");
        assert_eq!(events[0].config.target, "h1");
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let link = test_link();
        let ids = EventIds::default();
        let blob = pcap::write_frames([
            (Duration::new(1, 0), [0u8; 6].as_slice()),
            (Duration::new(2, 0), echo_request().as_slice()),
        ])
        .unwrap();
        let empty = pcap::write_frames(std::iter::empty()).unwrap();

        let events = classify_link(&link, &blob, &empty, &ids).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.label, "ICMP echo-request");
    }

    #[test]
    fn event_ids_are_unique() {
        let ids = EventIds::default();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, b);
    }

    #[test]
    fn wire_format() {
        let event = PacketEvent {
            data: EventData {
                id: "pkt-000000".to_string(),
                label: "ICMP echo-request".to_string(),
                kind: "packet".to_string(),
            },
            config: EventConfig {
                kind: "ICMP echo-request 10.0.0.1 > 10.0.0.2".to_string(),
                path: "e1".to_string(),
                source: "h1".to_string(),
                target: "sw".to_string(),
                loss_percentage: 0.0,
            },
            timestamp: "0000000005000001".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "data": {"id": "pkt-000000", "label": "ICMP echo-request", "type": "packet"},
                "config": {"type": "ICMP echo-request 10.0.0.1 > 10.0.0.2", "path": "e1",
                           "source": "h1", "target": "sw", "loss_percentage": 0.0},
                "timestamp": "0000000005000001"
            })
        );
    }
}

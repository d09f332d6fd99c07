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
//! One-step decoding of captured Ethernet frames into a tagged union.
//!
//! [`decode`] classifies the whole frame in a single pass; labeling happens
//! afterwards by exhaustively matching on the result. A VXLAN payload is
//! unwrapped exactly one level deep, so the inner frame of a tunneled
//! packet can be inspected without recursing through nested overlays.

use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use etherparse::{Ipv4HeaderSlice, TcpHeaderSlice, UdpHeaderSlice};
use mac_address::MacAddress;

/// UDP destination port of VXLAN encapsulation.
pub const VXLAN_PORT: u16 = 4789;

const VXLAN_HEADER_LEN: usize = 8;
const ETHER_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_IPV6: u16 = 0x86DD;
/// IEEE 802.2 SAP of the spanning tree bridge protocol.
const LLC_SAP_BPDU: u8 = 0x42;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated at {0} bytes")]
    Truncated(usize),
    #[error("malformed header: {0}")]
    Malformed(String),
}

/// A captured frame after the single decode step.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Arp(ArpFrame),
    Bridge(BridgePdu),
    Ipv4(Ipv4Frame),
    Ipv6,
    Other,
}

/// The resolved addresses of an ARP frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ArpFrame {
    pub operation: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
}

/// Spanning-tree BPDU carried in an LLC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgePdu {
    pub version: u8,
    pub flags: u8,
}

impl BridgePdu {
    /// Protocol version 2 marks rapid spanning tree.
    pub fn is_rstp(&self) -> bool {
        self.version == 2
    }

    /// The port role encoded in bits 2..4 of the flags byte.
    pub fn port_role(&self) -> PortRole {
        PortRole::from_bits((self.flags >> 2) & 0x03)
    }
}

/// RSTP port role of a BPDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Unknown,
    AlternateBackup,
    Root,
    Designated,
    Reserved,
}

impl PortRole {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Unknown,
            1 => Self::AlternateBackup,
            2 => Self::Root,
            3 => Self::Designated,
            _ => Self::Reserved,
        }
    }
}

/// An IPv4 frame with its classified payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Ipv4Frame {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub payload: Ipv4Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ipv4Payload {
    Icmp {
        icmp_type: u8,
        code: u8,
    },
    Igmp,
    Tcp {
        src_port: u16,
        dst_port: u16,
        flags: TcpFlags,
    },
    Udp {
        src_port: u16,
        dst_port: u16,
        /// Inner frame of a VXLAN encapsulation, decoded one level deep.
        vxlan_inner: Option<Box<DecodedFrame>>,
    },
    Tunnel(TunnelKind),
    Other,
}

/// Nested tunnel headers are labeled, never decoded further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelKind {
    IpInIp,
    Gre,
}

/// The TCP flags relevant for labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// Active flags in the canonical FIN, SYN, RST, PUSH, ACK, URG order.
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.fin, "FIN"),
            (self.syn, "SYN"),
            (self.rst, "RST"),
            (self.psh, "PUSH"),
            (self.ack, "ACK"),
            (self.urg, "URG"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

/// Decode one link-layer frame.
pub fn decode(frame: &[u8]) -> Result<DecodedFrame, DecodeError> {
    decode_at_depth(frame, 0)
}

fn decode_at_depth(frame: &[u8], depth: u8) -> Result<DecodedFrame, DecodeError> {
    if frame.len() < ETHER_HEADER_LEN {
        return Err(DecodeError::Truncated(frame.len()));
    }
    let ether_type = BigEndian::read_u16(&frame[12..14]);
    let payload = &frame[ETHER_HEADER_LEN..];
    match ether_type {
        ETHERTYPE_ARP => decode_arp(payload),
        ETHERTYPE_IPV4 => decode_ipv4(payload, depth),
        ETHERTYPE_IPV6 => Ok(DecodedFrame::Ipv6),
        // IEEE 802.3: a value below 0x0600 is a length field, LLC follows
        length if length < 0x0600 => Ok(decode_llc(payload)),
        _ => Ok(DecodedFrame::Other),
    }
}

fn decode_arp(payload: &[u8]) -> Result<DecodedFrame, DecodeError> {
    // fixed-size Ethernet/IPv4 ARP body
    if payload.len() < 28 {
        return Err(DecodeError::Truncated(payload.len()));
    }
    let mut sender_mac = [0u8; 6];
    sender_mac.copy_from_slice(&payload[8..14]);
    Ok(DecodedFrame::Arp(ArpFrame {
        operation: BigEndian::read_u16(&payload[6..8]),
        sender_mac: MacAddress::new(sender_mac),
        sender_ip: Ipv4Addr::new(payload[14], payload[15], payload[16], payload[17]),
        target_ip: Ipv4Addr::new(payload[24], payload[25], payload[26], payload[27]),
    }))
}

fn decode_llc(payload: &[u8]) -> DecodedFrame {
    // LLC header (DSAP, SSAP, control), then the BPDU: protocol id (2),
    // version (1), type (1), flags (1). A topology-change notification
    // BPDU ends before the flags byte.
    if payload.len() < 6 || payload[0] != LLC_SAP_BPDU || payload[1] != LLC_SAP_BPDU {
        return DecodedFrame::Other;
    }
    DecodedFrame::Bridge(BridgePdu {
        version: payload[5],
        flags: payload.get(7).copied().unwrap_or(0),
    })
}

fn decode_ipv4(payload: &[u8], depth: u8) -> Result<DecodedFrame, DecodeError> {
    let header =
        Ipv4HeaderSlice::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let header_len = header.slice().len();
    let end = (header.total_len() as usize).clamp(header_len, payload.len());
    let body = &payload[header_len..end];

    let ip_payload = match header.protocol().0 {
        1 => {
            // ICMP
            if body.len() < 2 {
                return Err(DecodeError::Truncated(body.len()));
            }
            Ipv4Payload::Icmp {
                icmp_type: body[0],
                code: body[1],
            }
        }
        2 => Ipv4Payload::Igmp,
        4 => Ipv4Payload::Tunnel(TunnelKind::IpInIp),
        6 => {
            let tcp = TcpHeaderSlice::from_slice(body)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
            Ipv4Payload::Tcp {
                src_port: tcp.source_port(),
                dst_port: tcp.destination_port(),
                flags: TcpFlags {
                    fin: tcp.fin(),
                    syn: tcp.syn(),
                    rst: tcp.rst(),
                    psh: tcp.psh(),
                    ack: tcp.ack(),
                    urg: tcp.urg(),
                },
            }
        }
        17 => {
            let udp = UdpHeaderSlice::from_slice(body)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;
            let dst_port = udp.destination_port();
            let vxlan_inner = (dst_port == VXLAN_PORT && depth == 0)
                .then(|| decode_vxlan_inner(&body[8..]))
                .flatten()
                .map(Box::new);
            Ipv4Payload::Udp {
                src_port: udp.source_port(),
                dst_port,
                vxlan_inner,
            }
        }
        47 => Ipv4Payload::Tunnel(TunnelKind::Gre),
        _ => Ipv4Payload::Other,
    };

    Ok(DecodedFrame::Ipv4(Ipv4Frame {
        src: header.source_addr(),
        dst: header.destination_addr(),
        payload: ip_payload,
    }))
}

/// Decode the Ethernet frame behind a VXLAN header. An undecodable inner
/// frame is treated as absent; the outer conversation stands on its own.
fn decode_vxlan_inner(udp_payload: &[u8]) -> Option<DecodedFrame> {
    if udp_payload.len() < VXLAN_HEADER_LEN {
        return None;
    }
    decode_at_depth(&udp_payload[VXLAN_HEADER_LEN..], 1).ok()
}

#[cfg(test)]
mod test {
    use super::*;
    use etherparse::{IpNumber, PacketBuilder};

    const MAC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];
    const MAC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0x02];

    fn eth_ipv4(payload_proto: IpNumber, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2(MAC_A, MAC_B).ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload_proto, payload).unwrap();
        frame
    }

    fn arp_frame(operation: u16) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&MAC_B);
        frame.extend_from_slice(&MAC_A);
        frame.extend_from_slice(&0x0806u16.to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes()); // hardware: ethernet
        frame.extend_from_slice(&0x0800u16.to_be_bytes()); // protocol: ipv4
        frame.push(6); // hardware size
        frame.push(4); // protocol size
        frame.extend_from_slice(&operation.to_be_bytes());
        frame.extend_from_slice(&MAC_A); // sender mac
        frame.extend_from_slice(&[10, 0, 0, 1]); // sender ip
        frame.extend_from_slice(&[0; 6]); // target mac
        frame.extend_from_slice(&[10, 0, 0, 2]); // target ip
        frame
    }

    fn bpdu_frame(version: u8, flags: u8) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x01, 0x80, 0xc2, 0x00, 0x00, 0x00]);
        frame.extend_from_slice(&MAC_A);
        frame.extend_from_slice(&38u16.to_be_bytes()); // 802.3 length
        frame.extend_from_slice(&[LLC_SAP_BPDU, LLC_SAP_BPDU, 0x03]); // LLC
        frame.extend_from_slice(&0u16.to_be_bytes()); // protocol id
        frame.push(version);
        frame.push(if version == 2 { 2 } else { 0 }); // bpdu type
        frame.push(flags);
        frame.extend_from_slice(&[0; 30]);
        frame
    }

    #[test]
    fn decode_arp_request() {
        let frame = decode(&arp_frame(1)).unwrap();
        let DecodedFrame::Arp(arp) = frame else {
            panic!("expected ARP, got {frame:?}")
        };
        assert_eq!(arp.operation, 1);
        assert_eq!(arp.sender_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(arp.sender_mac, MacAddress::new(MAC_A));
    }

    #[test]
    fn decode_bpdu_versions() {
        let DecodedFrame::Bridge(stp) = decode(&bpdu_frame(0, 0x01)).unwrap() else {
            panic!("expected BPDU")
        };
        assert!(!stp.is_rstp());
        assert_eq!(stp.flags, 0x01);

        // RSTP with designated port role (bits 2..4 = 0b11)
        let DecodedFrame::Bridge(rstp) = decode(&bpdu_frame(2, 0x0c)).unwrap() else {
            panic!("expected BPDU")
        };
        assert!(rstp.is_rstp());
        assert_eq!(rstp.port_role(), PortRole::Designated);
    }

    #[test]
    fn port_roles_from_flags() {
        assert_eq!(BridgePdu { version: 2, flags: 0x00 }.port_role(), PortRole::Unknown);
        assert_eq!(
            BridgePdu { version: 2, flags: 0x04 }.port_role(),
            PortRole::AlternateBackup
        );
        assert_eq!(BridgePdu { version: 2, flags: 0x08 }.port_role(), PortRole::Root);
        assert_eq!(
            BridgePdu { version: 2, flags: 0x0c }.port_role(),
            PortRole::Designated
        );
    }

    #[test]
    fn decode_icmp_echo() {
        let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .icmpv4_echo_request(7, 1);
        let mut frame = Vec::new();
        builder.write(&mut frame, b"abcdefgh").unwrap();

        let DecodedFrame::Ipv4(ip) = decode(&frame).unwrap() else {
            panic!("expected IPv4")
        };
        assert_eq!(ip.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ip.payload, Ipv4Payload::Icmp { icmp_type: 8, code: 0 });
    }

    #[test]
    fn decode_tcp_flags() {
        let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(43210, 80, 1, 1024)
            .syn()
            .ack(1);
        let mut frame = Vec::new();
        builder.write(&mut frame, &[]).unwrap();

        let DecodedFrame::Ipv4(ip) = decode(&frame).unwrap() else {
            panic!("expected IPv4")
        };
        let Ipv4Payload::Tcp { src_port, dst_port, flags } = ip.payload else {
            panic!("expected TCP")
        };
        assert_eq!((src_port, dst_port), (43210, 80));
        assert_eq!(flags.names(), vec!["SYN", "ACK"]);
    }

    #[test]
    fn decode_udp() {
        let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(5000, 53);
        let mut frame = Vec::new();
        builder.write(&mut frame, b"query").unwrap();

        let DecodedFrame::Ipv4(ip) = decode(&frame).unwrap() else {
            panic!("expected IPv4")
        };
        assert_eq!(
            ip.payload,
            Ipv4Payload::Udp { src_port: 5000, dst_port: 53, vxlan_inner: None }
        );
    }

    #[test]
    fn decode_vxlan_unwraps_one_level() {
        let inner_builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
            .ipv4([192, 168, 0, 1], [192, 168, 0, 2], 64)
            .icmpv4_echo_request(1, 1);
        let mut inner = Vec::new();
        inner_builder.write(&mut inner, &[]).unwrap();

        let mut vxlan_payload = vec![0x08, 0, 0, 0, 0, 0, 0x10, 0]; // vxlan header, vni 16
        vxlan_payload.extend_from_slice(&inner);

        let outer_builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(43211, VXLAN_PORT);
        let mut frame = Vec::new();
        outer_builder.write(&mut frame, &vxlan_payload).unwrap();

        let DecodedFrame::Ipv4(ip) = decode(&frame).unwrap() else {
            panic!("expected IPv4")
        };
        let Ipv4Payload::Udp { dst_port, vxlan_inner: Some(inner), .. } = ip.payload else {
            panic!("expected VXLAN UDP")
        };
        assert_eq!(dst_port, VXLAN_PORT);
        let DecodedFrame::Ipv4(inner_ip) = *inner else {
            panic!("expected inner IPv4")
        };
        assert_eq!(inner_ip.src, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(inner_ip.payload, Ipv4Payload::Icmp { icmp_type: 8, code: 0 });
    }

    #[test]
    fn decode_tunnels_and_igmp() {
        let ip_in_ip = eth_ipv4(IpNumber(4), &[0u8; 20]);
        let gre = eth_ipv4(IpNumber(47), &[0u8; 4]);
        let igmp = eth_ipv4(IpNumber(2), &[0x16, 0, 0, 0]);

        assert!(matches!(
            decode(&ip_in_ip).unwrap(),
            DecodedFrame::Ipv4(Ipv4Frame { payload: Ipv4Payload::Tunnel(TunnelKind::IpInIp), .. })
        ));
        assert!(matches!(
            decode(&gre).unwrap(),
            DecodedFrame::Ipv4(Ipv4Frame { payload: Ipv4Payload::Tunnel(TunnelKind::Gre), .. })
        ));
        assert!(matches!(
            decode(&igmp).unwrap(),
            DecodedFrame::Ipv4(Ipv4Frame { payload: Ipv4Payload::Igmp, .. })
        ));
    }

    #[test]
    fn decode_ipv6_and_unknown() {
        let mut ipv6 = Vec::new();
        ipv6.extend_from_slice(&MAC_B);
        ipv6.extend_from_slice(&MAC_A);
        ipv6.extend_from_slice(&0x86DDu16.to_be_bytes());
        ipv6.extend_from_slice(&[0; 40]);
        assert_eq!(decode(&ipv6).unwrap(), DecodedFrame::Ipv6);

        let mut unknown = Vec::new();
        unknown.extend_from_slice(&MAC_B);
        unknown.extend_from_slice(&MAC_A);
        unknown.extend_from_slice(&0x88CCu16.to_be_bytes()); // LLDP
        unknown.extend_from_slice(&[0; 8]);
        assert_eq!(decode(&unknown).unwrap(), DecodedFrame::Other);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        assert!(decode(&[0x02, 0, 0]).is_err());
        assert!(decode(&arp_frame(1)[..30]).is_err());
    }
}

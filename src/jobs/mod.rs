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
//! Two-phase, fault-isolated execution of device jobs.
//!
//! Jobs with a code of [`CONFIGURATION_BASE`] or above configure the
//! network; everything below generates traffic. All configuration jobs run
//! before any traffic job, each phase in list order, regardless of the
//! advisory `level` field. A failing job is logged and skipped; it never
//! aborts the remaining jobs of either phase.

pub mod sanitize;

use std::{collections::HashMap, time::Duration};

use crate::{
    backend::{BackendError, NodeRef, VirtualNetwork},
    definition::Job,
};

/// Numeric code above which a job configures the network instead of
/// generating traffic.
pub const CONFIGURATION_BASE: u32 = 100;

/// Longest accepted duration of a sleep job in seconds.
const SLEEP_LIMIT_SECS: u64 = 300;
/// Payload size of bulk send jobs when the argument is absent or invalid.
const DEFAULT_BULK_SIZE: u32 = 1024;

/// Every job kind known to the dispatcher, with its numeric code.
///
/// Adding a kind is a compile-time-checked change: the execution match
/// below is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[repr(u32)]
pub enum JobKind {
    Ping = 1,
    PingWithOptions = 2,
    BulkUdpSend = 3,
    BulkTcpSend = 4,
    Traceroute = 5,
    Sleep = 6,
    LinkDown = 7,
    AssignIp = 100,
    StaticRoute = 101,
    StaticArp = 102,
    NatMasquerade = 103,
    UdpServer = 104,
    TcpServer = 105,
    BlockPort = 106,
    DhcpServer = 107,
    DhcpClient = 108,
    VlanInterface = 109,
    VxlanTunnel = 110,
    GreTunnel = 111,
    PortForward = 112,
}

impl JobKind {
    /// Resolve a numeric job code.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::Ping,
            2 => Self::PingWithOptions,
            3 => Self::BulkUdpSend,
            4 => Self::BulkTcpSend,
            5 => Self::Traceroute,
            6 => Self::Sleep,
            7 => Self::LinkDown,
            100 => Self::AssignIp,
            101 => Self::StaticRoute,
            102 => Self::StaticArp,
            103 => Self::NatMasquerade,
            104 => Self::UdpServer,
            105 => Self::TcpServer,
            106 => Self::BlockPort,
            107 => Self::DhcpServer,
            108 => Self::DhcpClient,
            109 => Self::VlanInterface,
            110 => Self::VxlanTunnel,
            111 => Self::GreTunnel,
            112 => Self::PortForward,
            _ => return None,
        })
    }

    pub fn code(&self) -> u32 {
        *self as u32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job targets unknown host {0}")]
    UnknownHost(String),
    #[error("no handler registered for job code {0}")]
    UnknownCode(u32),
    #[error("invalid {what}: {raw:?}")]
    InvalidArgument { what: &'static str, raw: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Execution phase of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Phase {
    Configuration,
    Traffic,
}

/// The phase a job belongs to, judged by its numeric code alone.
pub fn phase_of(job: &Job) -> Phase {
    if job.job_id >= CONFIGURATION_BASE {
        Phase::Configuration
    } else {
        Phase::Traffic
    }
}

/// Run all jobs of `phase` in list order.
///
/// Failures are logged and skipped so that one broken job cannot take the
/// rest of the batch down with it.
pub async fn dispatch_phase(
    net: &mut dyn VirtualNetwork,
    nodes: &HashMap<String, NodeRef>,
    jobs: &[Job],
    phase: Phase,
) {
    for job in jobs.iter().filter(|job| phase_of(job) == phase) {
        log::debug!(
            "{phase}: job {} (code {}) on {}",
            job.id,
            job.job_id,
            job.host_id
        );
        if let Err(e) = execute(net, nodes, job).await {
            log::warn!(
                "skipping job {} (code {}) on {}: {e}",
                job.id,
                job.job_id,
                job.host_id
            );
        }
    }
}

async fn execute(
    net: &mut dyn VirtualNetwork,
    nodes: &HashMap<String, NodeRef>,
    job: &Job,
) -> Result<(), JobError> {
    let kind = JobKind::from_code(job.job_id).ok_or(JobError::UnknownCode(job.job_id))?;
    let node = *nodes
        .get(&job.host_id)
        .ok_or_else(|| JobError::UnknownHost(job.host_id.clone()))?;

    match kind {
        JobKind::Ping => {
            let target = require_ipv4(job.arg(1), "ping target")?;
            net.run_on(node, &format!("ping -c 4 {target}")).await?;
        }
        JobKind::PingWithOptions => {
            let target = require_ipv4(job.arg(1), "ping target")?;
            let options = sanitize::free_text(job.arg(2));
            net.run_on(node, &format!("ping {options} {target}")).await?;
        }
        JobKind::BulkUdpSend => {
            let (target, port, size) = bulk_args(job)?;
            net.run_on(
                node,
                &format!("dd if=/dev/zero bs={size} count=1 | nc -u -w 1 {target} {port}"),
            )
            .await?;
        }
        JobKind::BulkTcpSend => {
            let (target, port, size) = bulk_args(job)?;
            net.run_on(
                node,
                &format!("dd if=/dev/zero bs={size} count=1 | nc -w 1 {target} {port}"),
            )
            .await?;
        }
        JobKind::Traceroute => {
            let target = require_ipv4(job.arg(1), "traceroute target")?;
            let options = sanitize::free_text(job.arg(2));
            net.run_on(node, &format!("traceroute -n {options} {target}"))
                .await?;
        }
        JobKind::Sleep => {
            // absent or broken durations fall back to one second
            let seconds = job
                .arg(1)
                .trim()
                .parse::<u64>()
                .unwrap_or(1)
                .min(SLEEP_LIMIT_SECS);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
        JobKind::LinkDown => {
            let device = require_device(job.arg(1), "link device")?;
            net.run_on(node, &format!("ip link set {device} down")).await?;
        }
        JobKind::AssignIp => {
            let ip = require_ipv4(job.arg(1), "interface address")?;
            let prefix = require_netmask(job.arg(2), "interface netmask")?;
            let device = require_device(job.arg(3), "interface device")?;
            net.run_on(node, &format!("ip addr add {ip}/{prefix} dev {device}"))
                .await?;
        }
        JobKind::StaticRoute => {
            let network = require_ipv4(job.arg(1), "route network")?;
            let prefix = require_netmask(job.arg(2), "route netmask")?;
            let gateway = require_ipv4(job.arg(3), "route gateway")?;
            net.run_on(node, &format!("ip route add {network}/{prefix} via {gateway}"))
                .await?;
        }
        JobKind::StaticArp => {
            let ip = require_ipv4(job.arg(1), "arp address")?;
            let mac = require_mac(job.arg(2), "arp hardware address")?;
            net.run_on(node, &format!("arp -s {ip} {mac}")).await?;
        }
        JobKind::NatMasquerade => {
            // one composed command string, like every other handler
            let device = require_device(job.arg(1), "masquerade device")?;
            net.run_on(
                node,
                &format!("iptables -t nat -A POSTROUTING -o {device} -j MASQUERADE"),
            )
            .await?;
        }
        JobKind::UdpServer => {
            let port = require_port(job.arg(1), "listen port")?;
            net.spawn_on(node, &format!("nc -u -l -k -p {port}")).await?;
        }
        JobKind::TcpServer => {
            let port = require_port(job.arg(1), "listen port")?;
            net.spawn_on(node, &format!("nc -l -k -p {port}")).await?;
        }
        JobKind::BlockPort => {
            let protocol = match job.arg(1).trim() {
                "udp" => "udp",
                _ => "tcp",
            };
            let port = require_port(job.arg(2), "blocked port")?;
            net.run_on(
                node,
                &format!("iptables -A INPUT -p {protocol} --dport {port} -j DROP"),
            )
            .await?;
        }
        JobKind::DhcpServer => {
            let device = require_device(job.arg(1), "dhcp device")?;
            let from = require_ipv4(job.arg(2), "dhcp range start")?;
            let to = require_ipv4(job.arg(3), "dhcp range end")?;
            net.spawn_on(
                node,
                &format!("dnsmasq --no-daemon --interface={device} --dhcp-range={from},{to}"),
            )
            .await?;
        }
        JobKind::DhcpClient => {
            let device = require_device(job.arg(1), "dhcp device")?;
            net.run_on(node, &format!("udhcpc -i {device} -n -q")).await?;
        }
        JobKind::VlanInterface => {
            let device = require_device(job.arg(1), "vlan parent device")?;
            let vid = require_port(job.arg(2), "vlan id")?;
            net.run_on(
                node,
                &format!("ip link add link {device} name {device}.{vid} type vlan id {vid}"),
            )
            .await?;
            net.run_on(node, &format!("ip link set {device}.{vid} up"))
                .await?;
        }
        JobKind::VxlanTunnel => {
            let vni = require_vni(job.arg(1))?;
            let remote = require_ipv4(job.arg(2), "vxlan remote")?;
            let device = require_device(job.arg(3), "vxlan device")?;
            net.run_on(
                node,
                &format!(
                    "ip link add vx{vni} type vxlan id {vni} remote {remote} \
                     dstport 4789 dev {device}"
                ),
            )
            .await?;
            net.run_on(node, &format!("ip link set vx{vni} up")).await?;
        }
        JobKind::GreTunnel => {
            let remote = require_ipv4(job.arg(1), "gre remote")?;
            let local = require_ipv4(job.arg(2), "gre local")?;
            net.run_on(
                node,
                &format!("ip tunnel add gre1 mode gre remote {remote} local {local} ttl 255"),
            )
            .await?;
            net.run_on(node, "ip link set gre1 up").await?;
        }
        JobKind::PortForward => {
            let port = require_port(job.arg(1), "forwarded port")?;
            let destination = require_ipv4(job.arg(2), "forward destination")?;
            let destination_port = require_port(job.arg(3), "forward destination port")?;
            net.run_on(
                node,
                &format!(
                    "iptables -t nat -A PREROUTING -p tcp --dport {port} \
                     -j DNAT --to-destination {destination}:{destination_port}"
                ),
            )
            .await?;
        }
    }
    Ok(())
}

fn bulk_args(job: &Job) -> Result<(std::net::Ipv4Addr, u16, u32), JobError> {
    let target = require_ipv4(job.arg(1), "send target")?;
    let port = require_port(job.arg(2), "send port")?;
    // a bad size degrades to the default instead of dropping the job
    let size = sanitize::size(job.arg(3)).unwrap_or(DEFAULT_BULK_SIZE);
    Ok((target, port, size))
}

fn require_ipv4(raw: &str, what: &'static str) -> Result<std::net::Ipv4Addr, JobError> {
    sanitize::ipv4(raw).ok_or_else(|| invalid(what, raw))
}

fn require_port(raw: &str, what: &'static str) -> Result<u16, JobError> {
    sanitize::port(raw).ok_or_else(|| invalid(what, raw))
}

fn require_netmask(raw: &str, what: &'static str) -> Result<u8, JobError> {
    sanitize::netmask(raw).ok_or_else(|| invalid(what, raw))
}

fn require_device<'a>(raw: &'a str, what: &'static str) -> Result<&'a str, JobError> {
    sanitize::device(raw).ok_or_else(|| invalid(what, raw))
}

fn require_mac<'a>(raw: &'a str, what: &'static str) -> Result<&'a str, JobError> {
    sanitize::mac(raw).ok_or_else(|| invalid(what, raw))
}

fn require_vni(raw: &str) -> Result<u32, JobError> {
    let vni: u32 = raw
        .trim()
        .parse()
        .map_err(|_| invalid("vxlan vni", raw))?;
    // VNIs are 24 bit on the wire
    (vni < (1 << 24))
        .then_some(vni)
        .ok_or_else(|| invalid("vxlan vni", raw))
}

fn invalid(what: &'static str, raw: &str) -> JobError {
    JobError::InvalidArgument {
        what,
        raw: raw.to_string(),
    }
}

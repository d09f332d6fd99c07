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
//! Contract of the virtual network backend realizing nodes and links.
//!
//! The core never provisions namespaces, bridges or tunnels itself; it
//! drives an implementation of [`VirtualNetwork`] and only relies on the
//! behavior documented here. Whether an implementation uses netlink or
//! shells out to CLI tools is its own business.

use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use ipnet::Ipv4Net;

use crate::{definition::StpMode, util::PathBufExt};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown node handle {0:?}")]
    UnknownNode(NodeRef),
    #[error("the network is not running")]
    NotStarted,
    #[error("the network is already running")]
    AlreadyStarted,
    #[error("command failed on {node}: {message}")]
    CommandFailed { node: String, message: String },
    #[error("backend IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque handle to a node created by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(usize);

impl NodeRef {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Kind-specific creation parameters of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Switch {
        stp: StpMode,
        priority: Option<u16>,
    },
    Hub,
    Host {
        gateway: Option<Ipv4Addr>,
    },
    Router,
}

/// Parameters of one emulated (sub-)link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSpec {
    pub delay_ms: u32,
    pub max_queue: u32,
    pub capture: Option<CaptureSpec>,
}

/// Per-link traffic capture configuration.
///
/// A captured link produces two pcap files under
/// [`VirtualNetwork::capture_dir`]: `capture_<key>` with the frames the
/// keyed endpoint received and `capture_<key>_out` with the frames it
/// transmitted. Frames matching `exclude` never reach either file.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSpec {
    pub key: String,
    /// BPF-style protocol name excluded from the capture (e.g. `igmp`).
    pub exclude: Option<&'static str>,
}

/// One process spawned by the backend on behalf of the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub command: String,
}

/// Path of the capture file holding frames *received* by the keyed endpoint.
pub fn received_capture(dir: &Path, key: &str) -> PathBuf {
    dir.then(format!("capture_{key}"))
}

/// Path of the capture file holding frames *transmitted* by the keyed
/// endpoint.
pub fn transmitted_capture(dir: &Path, key: &str) -> PathBuf {
    dir.then(format!("capture_{key}_out"))
}

/// An emulated network of nodes and links.
///
/// Topology calls (`add_node`, `add_link`, `set_interface_addr`) are only
/// valid before [`start`](Self::start); command execution is only valid
/// while the network runs. Every call is synchronous from the caller's
/// point of view: when `run_on` returns, the command has finished.
#[async_trait]
pub trait VirtualNetwork: Send {
    fn add_node(&mut self, name: &str, spec: NodeSpec) -> Result<NodeRef, BackendError>;

    fn add_link(
        &mut self,
        a: NodeRef,
        iface_a: &str,
        b: NodeRef,
        iface_b: &str,
        spec: LinkSpec,
    ) -> Result<(), BackendError>;

    /// Statically address an interface of a node.
    fn set_interface_addr(
        &mut self,
        node: NodeRef,
        iface: &str,
        addr: Ipv4Net,
    ) -> Result<(), BackendError>;

    async fn start(&mut self) -> Result<(), BackendError>;

    /// Stop the network. All capture files are complete once this returns.
    async fn stop(&mut self) -> Result<(), BackendError>;

    /// Run a command on a node and wait for it to finish.
    async fn run_on(&mut self, node: NodeRef, command: &str) -> Result<String, BackendError>;

    /// Start a long-running command on a node without waiting. The process
    /// shows up in [`processes`](Self::processes) until it is terminated.
    async fn spawn_on(&mut self, node: NodeRef, command: &str) -> Result<(), BackendError>;

    /// All processes spawned under this run that are still alive.
    fn processes(&self) -> Vec<ProcessInfo>;

    /// Terminate a spawned process, wait for its exit and reap it.
    async fn terminate(&mut self, pid: u32) -> Result<(), BackendError>;

    /// Directory holding the per-interface capture files.
    fn capture_dir(&self) -> &Path;

    /// Best-effort backend-wide teardown, used on the fatal-error path.
    /// Must not fail; anything that cannot be cleaned is logged.
    async fn reset(&mut self);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capture_file_naming() {
        let dir = Path::new("/tmp/run");
        assert_eq!(
            received_capture(dir, "h1-eth0"),
            PathBuf::from("/tmp/run/capture_h1-eth0")
        );
        assert_eq!(
            transmitted_capture(dir, "h1-eth0"),
            PathBuf::from("/tmp/run/capture_h1-eth0_out")
        );
    }
}

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
//! Lifecycle of one emulation run.
//!
//! [`run_emulation`] drives the state machine from `Building` to `Done` or
//! `Failed`: build the topology, start the backend, configure overlays,
//! settle, run both job phases, drain, stop, clean up, classify and batch.
//! Fatal errors on the way up trigger a best-effort backend reset and are
//! re-raised; per-job failures stay inside the dispatcher. Cleanup runs on
//! the success and the failure path alike.

use std::{collections::HashMap, fs, io, path::PathBuf, time::Duration};

use serde::Serialize;

use crate::{
    animation::{batch_events, AnimationFrame},
    backend::{self, BackendError, NodeRef, VirtualNetwork},
    classify::{classify_all, ClassifyError, EventIds},
    definition::NetworkDefinition,
    jobs::{self, Phase},
    overlay::{self, OverlayState},
    topology::{build_topology, BuiltTopology, TopologyError, TopologyLink},
};

/// Grace period for in-flight traffic after the last job.
pub const DRAIN_TIME: Duration = Duration::from_secs(2);

/// Commands allowed to survive the cleanup sweep.
const PROCESS_ALLOW_LIST: &[&str] = &["tcpdump", "sh", "bash"];

/// States of one run, entered strictly left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunState {
    Idle,
    Building,
    Started,
    ConfiguringExtras,
    Settling,
    ConfigPhase,
    TrafficPhase,
    Draining,
    Stopping,
    Cleanup,
    Done,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("missing capture file {0}")]
    MissingCapture(PathBuf),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("capture IO error: {0}")]
    Io(#[from] io::Error),
}

/// One captured pcap blob and the name of the link direction it belongs to.
pub type PcapBlob = (Vec<u8>, String);

/// The sole output of a successful run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmulationResult {
    pub frames: Vec<AnimationFrame>,
    pub pcaps: Vec<PcapBlob>,
}

/// Execute one full emulation run against the given backend.
///
/// A definition without jobs short-circuits to an empty result without
/// touching the backend. Otherwise the run either produces a complete
/// [`EmulationResult`] or an error after best-effort cleanup; there is no
/// partial success.
pub async fn run_emulation(
    def: &NetworkDefinition,
    net: &mut dyn VirtualNetwork,
) -> Result<EmulationResult, RunError> {
    if def.jobs.is_empty() {
        log::info!("definition has no jobs; returning an empty result");
        return Ok(EmulationResult::default());
    }

    let run_id = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let mut ctx = RunContext {
        def,
        net,
        run_id,
        state: RunState::Idle,
        nodes: HashMap::new(),
        links: Vec::new(),
        overlay: OverlayState::default(),
        started: false,
        ids: EventIds::default(),
    };

    match ctx.execute().await {
        Ok(result) => {
            ctx.enter(RunState::Done);
            Ok(result)
        }
        Err(e) => {
            log::error!("run {} failed: {e}", ctx.run_id);
            ctx.abort().await;
            Err(e)
        }
    }
}

/// Everything one run needs, threaded explicitly instead of living in
/// module state; concurrent runs each get their own context.
struct RunContext<'a> {
    def: &'a NetworkDefinition,
    net: &'a mut dyn VirtualNetwork,
    run_id: String,
    state: RunState,
    nodes: HashMap<String, NodeRef>,
    links: Vec<TopologyLink>,
    overlay: OverlayState,
    started: bool,
    ids: EventIds,
}

/// Per-link capture bytes pulled off disk before the files are deleted.
struct CollectedCaptures {
    streams: Vec<(TopologyLink, Vec<u8>, Vec<u8>)>,
    blobs: Vec<PcapBlob>,
}

impl RunContext<'_> {
    fn enter(&mut self, next: RunState) {
        log::debug!("run {}: {} -> {next}", self.run_id, self.state);
        self.state = next;
    }

    async fn execute(&mut self) -> Result<EmulationResult, RunError> {
        self.enter(RunState::Building);
        let BuiltTopology {
            nodes,
            links,
            settle_time,
        } = build_topology(self.def, &mut *self.net)?;
        self.nodes = nodes;
        self.links = links;

        self.enter(RunState::Started);
        self.net.start().await?;
        self.started = true;

        self.enter(RunState::ConfiguringExtras);
        self.overlay = overlay::configure(self.def, &self.nodes, &mut *self.net).await?;

        self.enter(RunState::Settling);
        log::info!("run {}: settling for {settle_time:?}", self.run_id);
        tokio::time::sleep(settle_time).await;

        self.enter(RunState::ConfigPhase);
        jobs::dispatch_phase(
            &mut *self.net,
            &self.nodes,
            &self.def.jobs,
            Phase::Configuration,
        )
        .await;

        self.enter(RunState::TrafficPhase);
        jobs::dispatch_phase(&mut *self.net, &self.nodes, &self.def.jobs, Phase::Traffic).await;

        self.enter(RunState::Draining);
        tokio::time::sleep(DRAIN_TIME).await;

        self.enter(RunState::Stopping);
        self.net.stop().await?;
        self.started = false;

        self.enter(RunState::Cleanup);
        self.sweep_processes().await;
        overlay::teardown(&self.overlay, &mut *self.net).await;
        let captures = self.collect_captures()?;

        let events = classify_all(&captures.streams, &self.ids)?;
        log::info!(
            "run {}: {} events across {} links",
            self.run_id,
            events.len(),
            captures.streams.len()
        );
        Ok(EmulationResult {
            frames: batch_events(events),
            pcaps: captures.blobs,
        })
    }

    /// Best-effort teardown after a fatal error.
    async fn abort(&mut self) {
        self.enter(RunState::Failed);
        self.sweep_processes().await;
        overlay::teardown(&self.overlay, &mut *self.net).await;
        if self.started {
            if let Err(e) = self.net.stop().await {
                log::warn!("run {}: stop during abort failed: {e}", self.run_id);
            }
            self.started = false;
        }
        self.net.reset().await;
        self.remove_capture_files();
    }

    /// Terminate every process spawned under this run except the capture
    /// helper and basic shells, waiting for each to be reaped.
    async fn sweep_processes(&mut self) {
        for process in self.net.processes() {
            if allowed_process(&process.command) {
                continue;
            }
            log::debug!(
                "run {}: terminating stray process {} ({})",
                self.run_id,
                process.pid,
                process.command
            );
            if let Err(e) = self.net.terminate(process.pid).await {
                log::warn!(
                    "run {}: failed to terminate process {}: {e}",
                    self.run_id,
                    process.pid
                );
            }
        }
    }

    /// Read both directions of every link into memory, then delete the
    /// temporary capture files. A missing required file is fatal: the
    /// animation cannot be produced without both directions.
    fn collect_captures(&self) -> Result<CollectedCaptures, RunError> {
        let dir = self.net.capture_dir().to_path_buf();
        let mut streams = Vec::with_capacity(self.links.len());
        let mut blobs = Vec::with_capacity(self.links.len() * 2);

        for link in &self.links {
            let forward_path = backend::transmitted_capture(&dir, &link.iface_a);
            let reverse_path = backend::transmitted_capture(&dir, &link.iface_b);
            let forward = read_capture(&forward_path)?;
            let reverse = read_capture(&reverse_path)?;

            blobs.push((forward.clone(), format!("{}-{}", link.source, link.target)));
            blobs.push((reverse.clone(), format!("{}-{}", link.target, link.source)));
            streams.push((link.clone(), forward, reverse));

            // the bytes are in memory now; the temporary files can go
            for path in [
                forward_path,
                reverse_path,
                backend::received_capture(&dir, &link.iface_a),
                backend::received_capture(&dir, &link.iface_b),
            ] {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => log::warn!("failed to remove capture file {path:?}: {e}"),
                }
            }
        }
        Ok(CollectedCaptures { streams, blobs })
    }

    /// Remove whatever capture files exist, on the failure path.
    fn remove_capture_files(&self) {
        let dir = self.net.capture_dir().to_path_buf();
        for link in &self.links {
            for path in [
                backend::transmitted_capture(&dir, &link.iface_a),
                backend::transmitted_capture(&dir, &link.iface_b),
                backend::received_capture(&dir, &link.iface_a),
                backend::received_capture(&dir, &link.iface_b),
            ] {
                let _ = fs::remove_file(path);
            }
        }
    }
}

fn read_capture(path: &PathBuf) -> Result<Vec<u8>, RunError> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(RunError::MissingCapture(path.clone()))
        }
        Err(e) => Err(RunError::Io(e)),
    }
}

fn allowed_process(command: &str) -> bool {
    let program = command.split_whitespace().next().unwrap_or("");
    let program = program.rsplit('/').next().unwrap_or(program);
    PROCESS_ALLOW_LIST.contains(&program)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn process_allow_list() {
        assert!(allowed_process("tcpdump -i h1-eth0 -w capture_h1-eth0"));
        assert!(allowed_process("/usr/sbin/tcpdump -i any"));
        assert!(allowed_process("bash"));
        assert!(!allowed_process("nc -u -l -k -p 5000"));
        assert!(!allowed_process("dnsmasq --no-daemon"));
        assert!(!allowed_process(""));
    }
}

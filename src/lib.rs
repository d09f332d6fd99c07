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
//! Library for building emulated multi-device networks from declarative
//! definitions and replaying their captured traffic as animation events.
//!
//! One [`runner::run_emulation`] call takes a
//! [`definition::NetworkDefinition`] and a
//! [`backend::VirtualNetwork`] implementation, realizes the node/edge
//! graph with a capture tap on every link, executes the definition's jobs
//! in two phases, classifies the captured frames into labeled
//! [`classify::PacketEvent`]s and batches them into time-windowed
//! [`animation::AnimationFrame`]s for playback.

pub mod animation;
pub mod backend;
pub mod classify;
pub mod definition;
pub mod jobs;
pub mod overlay;
pub mod runner;
pub mod topology;
pub mod util;

#[cfg(test)]
mod test;

pub mod prelude {
    pub use super::{
        animation::{batch_events, AnimationFrame, FRAME_WINDOW},
        backend::{BackendError, NodeRef, NodeSpec, VirtualNetwork},
        classify::PacketEvent,
        definition::NetworkDefinition,
        runner::{run_emulation, EmulationResult, RunError},
        topology::{build_topology, BuiltTopology, TopologyLink},
    };
}

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
//! Batching classified packet events into animation frames.

use crate::classify::PacketEvent;

/// Window in microseconds within which events belong to the same frame.
///
/// Hand-tuned against [`crate::topology::TAP_LINK_DELAY_MS`]: a frame must
/// be wide enough to hold one packet's hops across both sub-links of an
/// edge. Change the two values together.
pub const FRAME_WINDOW: u64 = 30_000;

/// A set of events rendered simultaneously during playback.
pub type AnimationFrame = Vec<PacketEvent>;

/// Sort all events by capture time and batch them greedily: a frame opens
/// with its first event and takes every event within [`FRAME_WINDOW`] of
/// it; the first event beyond the window opens the next frame.
pub fn batch_events(mut events: Vec<PacketEvent>) -> Vec<AnimationFrame> {
    // fixed-width timestamps: lexicographic order is numeric order
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut frames: Vec<AnimationFrame> = Vec::new();
    let mut bound = 0;
    for event in events {
        let ts = event.timestamp_value();
        match frames.last_mut() {
            Some(frame) if ts <= bound => frame.push(event),
            _ => {
                bound = ts + FRAME_WINDOW;
                frames.push(vec![event]);
            }
        }
    }
    frames
}

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
//! Reading and writing pcap blobs held in memory.

use std::{io::Cursor, time::Duration};

use pcap_file::pcap::{PcapPacket, PcapReader, PcapWriter};

#[derive(Debug, thiserror::Error)]
pub enum PcapError {
    #[error("pcap error: {0}")]
    Pcap(#[from] pcap_file::PcapError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One captured frame with its capture timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub timestamp: Duration,
    pub data: Vec<u8>,
}

/// Read all frames of an in-memory pcap blob.
///
/// Malformed packet records are logged and skipped; only a broken file
/// header is an error.
pub fn read_frames(blob: &[u8]) -> Result<Vec<CapturedFrame>, PcapError> {
    let mut reader = PcapReader::new(Cursor::new(blob))?;
    let mut frames = Vec::new();
    while let Some(packet) = reader.next_packet() {
        match packet {
            Ok(packet) => frames.push(CapturedFrame {
                timestamp: packet.timestamp,
                data: packet.data.into_owned(),
            }),
            Err(e) => log::warn!("skipping malformed pcap record: {e}"),
        }
    }
    Ok(frames)
}

/// Write Ethernet frames into a fresh pcap blob.
pub fn write_frames<'a>(
    frames: impl IntoIterator<Item = (Duration, &'a [u8])>,
) -> Result<Vec<u8>, PcapError> {
    let mut writer = PcapWriter::new(Vec::new())?;
    for (timestamp, data) in frames {
        writer.write_packet(&PcapPacket::new(timestamp, data.len() as u32, data))?;
    }
    Ok(writer.into_writer())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let frame_a = vec![0xde, 0xad, 0xbe, 0xef];
        let frame_b = vec![0x00; 64];
        let blob = write_frames([
            (Duration::new(1, 500_000_000), frame_a.as_slice()),
            (Duration::new(2, 0), frame_b.as_slice()),
        ])
        .unwrap();

        let frames = read_frames(&blob).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp, Duration::new(1, 500_000_000));
        assert_eq!(frames[0].data, frame_a);
        assert_eq!(frames[1].data, frame_b);
    }

    #[test]
    fn empty_blob_is_an_error() {
        assert!(read_frames(&[]).is_err());
    }

    #[test]
    fn empty_capture_has_no_frames() {
        let blob = write_frames(std::iter::empty()).unwrap();
        assert!(read_frames(&blob).unwrap().is_empty());
    }
}

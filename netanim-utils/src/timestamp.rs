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
//! Fixed-width capture timestamps.
//!
//! Animation events carry their capture time as a 16-digit decimal string:
//! ten digits of seconds followed by six digits of microseconds. The fixed
//! width makes lexicographic comparison agree with numeric comparison, so
//! downstream stages may sort and window the encoded strings directly.

use std::time::Duration;

/// Number of digits of an encoded timestamp.
pub const TIMESTAMP_DIGITS: usize = 16;

/// Encode seconds and microseconds into the 16-digit fixed-width form.
pub fn encode(seconds: u64, micros: u32) -> String {
    format!("{seconds:010}{micros:06}")
}

/// Encode a [`Duration`] since the epoch (e.g. a pcap capture timestamp).
pub fn encode_duration(ts: Duration) -> String {
    encode(ts.as_secs(), ts.subsec_micros())
}

/// Decode an encoded timestamp into its value in microseconds since the
/// epoch. Returns `None` unless the input is a 16-digit decimal string.
pub fn decode(raw: &str) -> Option<u64> {
    if raw.len() != TIMESTAMP_DIGITS || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let seconds: u64 = raw[..10].parse().ok()?;
    let micros: u64 = raw[10..].parse().ok()?;
    Some(seconds * 1_000_000 + micros)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_width() {
        assert_eq!(encode(0, 0), "0000000000000000");
        assert_eq!(encode(1700000000, 123), "1700000000000123");
        assert_eq!(encode_duration(Duration::new(3, 42_000)).len(), TIMESTAMP_DIGITS);
    }

    #[test]
    fn roundtrip() {
        assert_eq!(decode(&encode(1700000000, 999_999)), Some(1700000000999999));
        assert_eq!(decode("170000000000012"), None);
        assert_eq!(decode("17000000000001234"), None);
        assert_eq!(decode("17000000000001x3"), None);
    }

    #[test]
    fn lexicographic_is_numeric() {
        let early = encode(1, 999_999);
        let late = encode(2, 0);
        assert!(early < late);
        assert!(decode(&early).unwrap() < decode(&late).unwrap());
    }
}

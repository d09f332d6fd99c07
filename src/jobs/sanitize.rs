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
//! Centralized sanitizing of job arguments.
//!
//! Every job handler builds its command line exclusively from values that
//! passed one of these validators, one allow-list per argument kind. Free
//! text is the only kind that is filtered rather than rejected.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DEVICE_NAME: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,14}$").unwrap();
    static ref MAC_ADDR: Regex = Regex::new(r"^[0-9a-fA-F]{2}(:[0-9a-fA-F]{2}){5}$").unwrap();
}

/// Shell metacharacters never allowed inside free-text options.
const BLACKLIST: &[char] = &[
    ';', '&', '|', '$', '`', '>', '<', '(', ')', '{', '}', '!', '\\', '"', '\'', '*', '?', '~',
];

/// Strip non-ASCII bytes, control characters and blacklisted shell
/// metacharacters from a free-text option string (extra ping or traceroute
/// flags and the like).
pub fn free_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && !BLACKLIST.contains(c))
        .collect()
}

/// Parse a port number, accepting the full `[0, 65535]` range.
pub fn port(raw: &str) -> Option<u16> {
    raw.trim().parse().ok()
}

/// Parse a payload size in bytes, accepting `[0, 65535]`.
pub fn size(raw: &str) -> Option<u32> {
    let value: u32 = raw.trim().parse().ok()?;
    (value <= 65_535).then_some(value)
}

/// Parse a netmask, accepting a prefix length in `[0, 32]` or a contiguous
/// dotted-quad mask.
pub fn netmask(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    if let Ok(prefix) = raw.parse::<u8>() {
        return (prefix <= 32).then_some(prefix);
    }
    let mask: Ipv4Addr = raw.parse().ok()?;
    Ipv4Net::with_netmask(Ipv4Addr::UNSPECIFIED, mask)
        .ok()
        .map(|net| net.prefix_len())
}

/// Parse an IPv4 dotted quad.
pub fn ipv4(raw: &str) -> Option<Ipv4Addr> {
    raw.trim().parse().ok()
}

/// Validate a network device name.
pub fn device(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    DEVICE_NAME.is_match(raw).then_some(raw)
}

/// Validate a MAC address in colon notation.
pub fn mac(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    MAC_ADDR.is_match(raw).then_some(raw)
}

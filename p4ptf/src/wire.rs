/*
Copyright (c) 2021 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Conversion between values and P4Runtime bytestrings.
//!
//! P4Runtime carries every match key, action parameter and packet metadata
//! value as a big-endian byte string of `(bit_width + 7) / 8` bytes.  All
//! reasoning about widths and byte order lives here; the entity builders in
//! [`crate::schema`] only pass values and declared widths through.

use byteorder::{BigEndian, ByteOrder};

use std::fmt::{self, Display};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{P4Error, Result};

/// Widest field the encoder and decoder accept.
pub const MAX_BIT_WIDTH: u32 = 128;

/// A value to be placed in a match field, action parameter or packet
/// metadata field.
///
/// `Text` holds the human-readable forms tests like to write
/// (`"00:11:22:33:44:55"`, `"10.0.0.1"`, `"2001:db8::1"`, `"0x800"`,
/// `"42"`).  It is parsed when encoded, so a typo surfaces as an error from
/// the builder that used it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(u128),
    Mac([u8; 6]),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Bytes(Vec<u8>),
    Text(String),
}

impl Value {
    /// Parses `s` as a MAC address, an IPv4 or IPv6 address, a `0x` hex
    /// string or a decimal integer, in that order of preference.
    pub fn parse(s: &str) -> Result<Value> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return parse_hex(hex).map(Value::Bytes);
        }
        if s.contains(':') || s.contains('-') {
            if let Ok(mac) = parse_mac(s) {
                return Ok(Value::Mac(mac));
            }
        }
        if s.contains(':') {
            return s
                .parse::<Ipv6Addr>()
                .map(Value::Ipv6)
                .map_err(|_| P4Error::invalid(format!("{:?}: not a MAC or IPv6 address", s)));
        }
        if s.contains('.') {
            return s
                .parse::<Ipv4Addr>()
                .map(Value::Ipv4)
                .map_err(|_| P4Error::invalid(format!("{:?}: not an IPv4 address", s)));
        }
        s.parse::<u128>()
            .map(Value::Int)
            .map_err(|_| P4Error::invalid(format!("{:?}: not a number or address", s)))
    }

    /// Returns the value's natural big-endian representation, before any
    /// width is applied.
    fn to_be_bytes(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Value::Int(i) => {
                let mut buf = [0u8; 16];
                BigEndian::write_u128(&mut buf, *i);
                buf.to_vec()
            }
            Value::Mac(mac) => mac.to_vec(),
            Value::Ipv4(ip) => ip.octets().to_vec(),
            Value::Ipv6(ip) => ip.octets().to_vec(),
            Value::Bytes(bytes) => bytes.clone(),
            Value::Text(s) => Value::parse(s)?.to_be_bytes()?,
        })
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Mac(mac) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
            ),
            Value::Ipv4(ip) => write!(f, "{}", ip),
            Value::Ipv6(ip) => write!(f, "{}", ip),
            Value::Bytes(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

macro_rules! value_from_uint {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(i: $t) -> Self {
                    Value::Int(i.into())
                }
            }
        )*
    };
}

value_from_uint!(u8, u16, u32, u64, u128);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(b.into())
    }
}

impl From<Ipv4Addr> for Value {
    fn from(ip: Ipv4Addr) -> Self {
        Value::Ipv4(ip)
    }
}

impl From<Ipv6Addr> for Value {
    fn from(ip: Ipv6Addr) -> Self {
        Value::Ipv6(ip)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Parses a MAC address written as six colon- or hyphen-separated hex
/// octets.
pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let bad = || P4Error::invalid(format!("{:?}: not a MAC address", s));
    let octets: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
    if octets.len() != 6 {
        return Err(bad());
    }
    let mut mac = [0u8; 6];
    for (dst, octet) in mac.iter_mut().zip(octets) {
        if octet.is_empty() || octet.len() > 2 {
            return Err(bad());
        }
        *dst = u8::from_str_radix(octet, 16).map_err(|_| bad())?;
    }
    Ok(mac)
}

fn parse_hex(hex: &str) -> Result<Vec<u8>> {
    let bad = || P4Error::invalid(format!("0x{}: not a hex number", hex));
    if hex.is_empty() {
        return Err(bad());
    }
    // An odd number of digits has an implicit leading zero.
    let padded = if hex.len() % 2 == 1 {
        format!("0{}", hex)
    } else {
        hex.to_string()
    };
    (0..padded.len())
        .step_by(2)
        .map(|i| {
            padded
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(bad)
        })
        .collect()
}

/// Number of bytes P4Runtime uses for a `bit_width`-bit value.
pub fn byte_width(bit_width: u32) -> usize {
    ((bit_width as usize) + 7) / 8
}

fn significant_bits(bytes: &[u8]) -> (usize, &[u8]) {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    let bits = match significant.first() {
        Some(b) => (significant.len() - 1) * 8 + (8 - b.leading_zeros() as usize),
        None => 0,
    };
    (bits, significant)
}

/// Encodes `value` as a `bit_width`-bit P4Runtime bytestring: big-endian,
/// zero-padded on the left to exactly [`byte_width`] bytes.
pub fn encode(value: &Value, bit_width: u32) -> Result<Vec<u8>> {
    if bit_width == 0 || bit_width > MAX_BIT_WIDTH {
        return Err(P4Error::invalid(format!(
            "cannot encode a value with bit width {}",
            bit_width
        )));
    }
    let bytes = value.to_be_bytes()?;
    let (bits, significant) = significant_bits(&bytes);
    if bits > bit_width as usize {
        return Err(P4Error::ValueOverflow {
            value: value.to_string(),
            bit_width,
        });
    }

    let mut encoded = vec![0u8; byte_width(bit_width) - significant.len()];
    encoded.extend_from_slice(significant);
    Ok(encoded)
}

/// Decodes a P4Runtime bytestring that holds a `bit_width`-bit value.
///
/// Leading zero bytes are ignored, so both the padded form produced by
/// [`encode`] and the canonical (shortest) form some devices send back are
/// accepted.
pub fn decode(bytes: &[u8], bit_width: u32) -> Result<u128> {
    if bit_width == 0 || bit_width > MAX_BIT_WIDTH {
        return Err(P4Error::invalid(format!(
            "cannot decode a {}-bit value as an integer",
            bit_width
        )));
    }
    let (bits, significant) = significant_bits(bytes);
    if bits > bit_width as usize {
        return Err(P4Error::ValueOverflow {
            value: Value::Bytes(bytes.to_vec()).to_string(),
            bit_width,
        });
    }
    Ok(match significant.len() {
        0 => 0,
        n => BigEndian::read_uint128(significant, n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn padded_big_endian() {
        assert_eq!(encode(&Value::Int(5), 8).unwrap(), vec![5]);
        assert_eq!(encode(&Value::Int(5), 9).unwrap(), vec![0, 5]);
        assert_eq!(encode(&Value::Int(0x1ff), 9).unwrap(), vec![1, 0xff]);
        assert_eq!(encode(&Value::Int(0), 12).unwrap(), vec![0, 0]);
        assert_eq!(encode(&Value::Int(0x0800), 16).unwrap(), vec![8, 0]);
    }

    #[test]
    fn overflow() {
        assert!(matches!(
            encode(&Value::Int(256), 8),
            Err(P4Error::ValueOverflow { bit_width: 8, .. })
        ));
        assert!(matches!(
            encode(&Value::Int(512), 9),
            Err(P4Error::ValueOverflow { bit_width: 9, .. })
        ));
        assert!(matches!(
            encode(&Value::from("10.0.0.1"), 24),
            Err(P4Error::ValueOverflow { .. })
        ));
        assert!(encode(&Value::Int(1), 0).is_err());
    }

    #[test]
    fn addresses() {
        assert_eq!(
            encode(&Value::from("00:11:22:33:44:55"), 48).unwrap(),
            vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55]
        );
        assert_eq!(
            encode(&Value::from("FF-FF-FF-FF-FF-FF"), 48).unwrap(),
            vec![0xff; 6]
        );
        assert_eq!(encode(&Value::from("10.0.0.1"), 32).unwrap(), vec![10, 0, 0, 1]);
        assert_eq!(
            encode(&Value::from("2001:db8::1"), 128).unwrap(),
            "2001:db8::1".parse::<Ipv6Addr>().unwrap().octets().to_vec()
        );
        // A small address in a wide field is padded like any other value.
        assert_eq!(
            encode(&Value::from("0.0.0.7"), 40).unwrap(),
            vec![0, 0, 0, 0, 7]
        );
    }

    #[test]
    fn text_forms() {
        assert_eq!(Value::parse("42").unwrap(), Value::Int(42));
        assert_eq!(Value::parse("0x800").unwrap(), Value::Bytes(vec![0x08, 0x00]));
        assert_eq!(
            Value::parse("33:33:00:00:00:01").unwrap(),
            Value::Mac([0x33, 0x33, 0, 0, 0, 1])
        );
        assert_eq!(
            Value::parse("ff-ff-ff-ff-ff-ff").unwrap(),
            Value::Mac([0xff; 6])
        );
        assert_eq!(Value::parse("::1").unwrap(), Value::Ipv6(Ipv6Addr::LOCALHOST));
        assert!(Value::parse("00-11-22").is_err());
        assert!(Value::parse("eth0").is_err());
        assert!(Value::parse("0xzz").is_err());
        assert!(Value::parse("1.2.3").is_err());
        assert!(matches!(
            encode(&Value::from("not-a-number"), 8),
            Err(P4Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn decode_canonical_form() {
        assert_eq!(decode(&[0x01], 9).unwrap(), 1);
        assert_eq!(decode(&[0, 0, 0x01], 9).unwrap(), 1);
        assert_eq!(decode(&[], 9).unwrap(), 0);
        assert!(matches!(
            decode(&[0x02, 0x00], 9),
            Err(P4Error::ValueOverflow { bit_width: 9, .. })
        ));
        assert!(decode(&[1], 129).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Value::Mac([0, 0x11, 0x22, 0x33, 0x44, 0x55]).to_string(), "00:11:22:33:44:55");
        assert_eq!(Value::Bytes(vec![8, 0]).to_string(), "0x0800");
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(bit_width in 1u32..=128, raw in any::<u128>()) {
            let v = if bit_width == 128 { raw } else { raw & ((1u128 << bit_width) - 1) };
            let bytes = encode(&Value::Int(v), bit_width).unwrap();
            prop_assert_eq!(bytes.len(), byte_width(bit_width));
            prop_assert_eq!(decode(&bytes, bit_width).unwrap(), v);
        }

        #[test]
        fn encode_rejects_too_wide(bit_width in 1u32..128, raw in any::<u128>()) {
            let v = raw | (1u128 << bit_width);
            let is_overflow = matches!(
                encode(&Value::Int(v), bit_width),
                Err(P4Error::ValueOverflow { .. })
            );
            prop_assert!(is_overflow);
        }
    }
}

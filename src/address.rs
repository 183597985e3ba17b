//! Physical and RF-level addresses.
//!
//! A [`MacAddress`] identifies a radio endpoint and travels inside management and
//! control PDUs. An [`AccessAddress`] is what the nRF24L01 matches on air: two radios
//! exchange frames on a pipe only when they agree on both the channel and the access
//! address of that pipe.

use core::fmt;
use core::str::FromStr;

/// 8-byte endpoint address, stored and compared exactly as received.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacAddress(pub [u8; 8]);

impl MacAddress {
    /// Length of an encoded address in bytes.
    pub const LEN: usize = 8;
    /// All-ones address.
    pub const BROADCAST: Self = Self([0xff; 8]);

    /// Creates an address from raw bytes.
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Raw bytes, most significant first.
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub(crate) fn read(buf: &[u8]) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[..Self::LEN]);
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Returned when a string is not eight colon separated hex octets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressParseError;

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected 8 colon separated hex octets")
    }
}

impl FromStr for MacAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 8];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(AddressParseError)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(AddressParseError);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AddressParseError)?;
        }
        if parts.next().is_some() {
            return Err(AddressParseError);
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 8]> for MacAddress {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

/// 5-byte on-air address assigned to a pipe.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccessAddress(pub [u8; 5]);

impl AccessAddress {
    /// Length of an encoded access address in bytes.
    pub const LEN: usize = 5;

    /// Well-known address of pipe 0, the management pipe every radio listens on.
    /// This is the chip's reset value for `RX_ADDR_P0`.
    pub const MANAGEMENT: Self = Self([0xe7; 5]);

    /// Creates an access address from raw bytes, least significant byte first.
    pub const fn new(bytes: [u8; 5]) -> Self {
        Self(bytes)
    }

    /// Raw bytes, least significant byte first (the order the chip expects).
    pub const fn as_bytes(&self) -> &[u8; 5] {
        &self.0
    }

    /// Derives the access address a gateway hands out for one of its data pipes.
    ///
    /// Pipes 2-5 of the nRF24L01 only own their least significant address byte and
    /// share the upper four with pipe 1, so the upper bytes come from the owner's
    /// MAC and the low byte is `seed + pipe`.
    pub fn for_pipe(seed: u8, owner: &MacAddress, pipe: u8) -> Self {
        let m = owner.as_bytes();
        Self([seed.wrapping_add(pipe), m[4], m[5], m[6], m[7]])
    }

    pub(crate) fn read(buf: &[u8]) -> Self {
        let mut bytes = [0u8; 5];
        bytes.copy_from_slice(&buf[..Self::LEN]);
        Self(bytes)
    }
}

impl fmt::Display for AccessAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn formats_lowercase_colon_hex() {
        let mac = MacAddress::new([0xaa, 0xbb, 0x0c, 0x01, 0x00, 0xff, 0x10, 0x9e]);
        assert_eq!(mac.to_string(), "aa:bb:0c:01:00:ff:10:9e");
    }

    #[test]
    fn parse_reproduces_formatted_bytes() {
        for bytes in [
            [0u8; 8],
            [0xff; 8],
            [1, 2, 3, 4, 5, 6, 7, 8],
            [0x80, 0x7f, 0x00, 0xfe, 0x11, 0xa0, 0x0a, 0x5c],
        ] {
            let mac = MacAddress::new(bytes);
            let parsed: MacAddress = mac.to_string().parse().unwrap();
            assert_eq!(parsed, mac);
        }
    }

    #[test]
    fn parse_accepts_uppercase() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF:00:11".parse().unwrap();
        assert_eq!(mac.0, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);
    }

    #[test]
    fn parse_rejects_bad_input() {
        for s in [
            "",
            "aa:bb:cc:dd:ee:ff:00",
            "aa:bb:cc:dd:ee:ff:00:11:22",
            "aa:bb:cc:dd:ee:ff:00:1",
            "aa:bb:cc:dd:ee:ff:00:zz",
            "aabbccddeeff0011",
            "aa-bb-cc-dd-ee-ff-00-11",
        ] {
            assert_eq!(s.parse::<MacAddress>(), Err(AddressParseError), "{}", s);
        }
    }

    #[test]
    fn pipe_addresses_share_upper_bytes() {
        let owner = MacAddress::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let a1 = AccessAddress::for_pipe(0xc0, &owner, 1);
        let a2 = AccessAddress::for_pipe(0xc0, &owner, 2);
        assert_eq!(a1.0[1..], a2.0[1..]);
        assert_eq!(a1.0[1..], [5, 6, 7, 8]);
        assert_ne!(a1.0[0], a2.0[0]);
        assert_ne!(a1, AccessAddress::MANAGEMENT);
    }
}

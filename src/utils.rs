use pnet::datalink::MacAddr;
use rand::Rng;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::SRC_PORT_RANGE;
use crate::error::ScanError;

/// Validate one line of operator input as a tcp port.
pub fn parse_port(input: &str) -> Result<u16, ScanError> {
    let trimmed = input.trim();
    match trimmed.parse::<u16>() {
        Ok(p) => Ok(p),
        Err(_) => Err(ScanError::InvalidPort {
            input: trimmed.to_string(),
        }),
    }
}

pub fn parse_ipv4(input: &str) -> Result<Ipv4Addr, ScanError> {
    let trimmed = input.trim();
    match Ipv4Addr::from_str(trimmed) {
        Ok(a) => Ok(a),
        Err(_) => Err(ScanError::InvalidIpv4 {
            input: trimmed.to_string(),
        }),
    }
}

/// Accepts `aa:bb:cc:dd:ee:ff`, and `aa-bb-cc-dd-ee-ff` as printed by windows.
pub fn parse_mac(input: &str) -> Result<MacAddr, ScanError> {
    let trimmed = input.trim();
    let normalized = trimmed.replace('-', ":");
    match MacAddr::from_str(&normalized) {
        Ok(m) => Ok(m),
        Err(_) => Err(ScanError::InvalidMac {
            input: trimmed.to_string(),
        }),
    }
}

/// Returns a random source port inside the scanner's ephemeral range.
pub fn random_src_port<R: Rng>(rng: &mut R) -> u16 {
    rng.random_range(SRC_PORT_RANGE)
}

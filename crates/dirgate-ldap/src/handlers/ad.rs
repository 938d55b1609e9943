//! Active Directory binary attribute codecs

use std::fmt::Write;

/// Render a 16-byte objectGUID as `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`.
///
/// The first three groups are stored little-endian.
pub fn guid_to_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 16 {
        return None;
    }

    let mut out = String::with_capacity(38);
    out.push('{');
    for i in [3, 2, 1, 0] {
        let _ = write!(out, "{:02X}", bytes[i]);
    }
    out.push('-');
    for i in [5, 4] {
        let _ = write!(out, "{:02X}", bytes[i]);
    }
    out.push('-');
    for i in [7, 6] {
        let _ = write!(out, "{:02X}", bytes[i]);
    }
    out.push('-');
    for b in &bytes[8..10] {
        let _ = write!(out, "{:02X}", b);
    }
    out.push('-');
    for b in &bytes[10..16] {
        let _ = write!(out, "{:02X}", b);
    }
    out.push('}');
    Some(out)
}

/// Render a binary SID as `S-{revision}-{authority}-{sub}-...`
pub fn sid_to_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 8 {
        return None;
    }
    let count = bytes[1] as usize;
    if bytes.len() != 8 + 4 * count {
        return None;
    }

    let authority = bytes[2..8]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

    let mut out = format!("S-{}-{}", bytes[0], authority);
    for chunk in bytes[8..].chunks_exact(4) {
        let sub = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let _ = write!(out, "-{}", sub);
    }
    Some(out)
}

/// SID of the domain that issued `sid` (the SID minus its relative identifier)
pub fn domain_sid(sid: &str) -> Option<&str> {
    let (domain, rid) = sid.rsplit_once('-')?;
    rid.parse::<u32>().ok()?;
    domain.starts_with("S-").then_some(domain)
}

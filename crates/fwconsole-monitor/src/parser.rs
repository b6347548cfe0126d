//! Interface table parsers, one per device family.

use fwconsole_core::DeviceKind;
use thiserror::Error;

use crate::interfaces::{InterfaceRecord, LinkStatus};

/// Output did not have the expected structure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("No output to parse")]
    Empty,
    #[error("No {kind:?} interface rows found in output")]
    Unrecognised { kind: DeviceKind },
}

/// Command that lists interfaces on `kind`, used when a definition names none.
#[must_use]
pub const fn default_command(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::FortiGate => "get system interface physical",
        DeviceKind::CiscoAsa => "show interface ip brief",
        DeviceKind::PaloAlto => "show interface all",
        DeviceKind::Generic => "show interfaces",
    }
}

/// Parse combined command output into interface records.
///
/// # Errors
/// Returns [`ParseError`] if the output is blank or holds no interface rows.
pub fn parse(kind: DeviceKind, output: &str) -> Result<Vec<InterfaceRecord>, ParseError> {
    if output.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let records = match kind {
        DeviceKind::FortiGate => parse_fortigate(output),
        DeviceKind::CiscoAsa => parse_cisco_asa(output),
        DeviceKind::PaloAlto => parse_palo_alto(output),
        DeviceKind::Generic => parse_generic(output),
    };
    if records.is_empty() {
        return Err(ParseError::Unrecognised { kind });
    }
    Ok(records)
}

/// `get system interface physical`: a `==[name]` header followed by
/// `key: value` lines.
fn parse_fortigate(output: &str) -> Vec<InterfaceRecord> {
    let mut records: Vec<InterfaceRecord> = Vec::new();
    for line in output.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix("==[").and_then(|r| r.strip_suffix(']')) {
            records.push(InterfaceRecord::new(name, LinkStatus::Unknown));
            continue;
        }
        let Some(current) = records.last_mut() else {
            continue;
        };
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "status" | "link" => current.status = LinkStatus::from_word(value),
            "speed" => current.speed = (value != "n/a").then(|| value.to_string()),
            "ip" => {
                current.address = value
                    .split_whitespace()
                    .next()
                    .filter(|ip| *ip != "0.0.0.0")
                    .map(str::to_string);
            }
            _ => {}
        }
    }
    records
}

/// `show interface ip brief`: fixed columns, where status may be two words.
fn parse_cisco_asa(output: &str) -> Vec<InterfaceRecord> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 6 || !matches!(tokens[2], "YES" | "NO") {
                return None;
            }
            let protocol = LinkStatus::from_word(tokens[tokens.len() - 1]);
            let status = if line.contains("administratively down") {
                LinkStatus::AdminDown
            } else {
                match (LinkStatus::from_word(tokens[4]), protocol) {
                    (LinkStatus::Up, LinkStatus::Up) => LinkStatus::Up,
                    (LinkStatus::Down, _) | (_, LinkStatus::Down) => LinkStatus::Down,
                    _ => LinkStatus::Unknown,
                }
            };
            let mut record = InterfaceRecord::new(tokens[0], status);
            record.address = (tokens[1] != "unassigned").then(|| tokens[1].to_string());
            Some(record)
        })
        .collect()
}

/// `show interface all`: a hardware table with `speed/duplex/state`, then a
/// logical table whose last column is the address.
fn parse_palo_alto(output: &str) -> Vec<InterfaceRecord> {
    let mut records: Vec<InterfaceRecord> = Vec::new();
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 || !tokens[1].bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let parts: Vec<&str> = tokens[2].split('/').collect();
        if let [speed, duplex, state] = parts.as_slice() {
            let state = state.split('(').next().unwrap_or_default();
            let mut record = InterfaceRecord::new(tokens[0], LinkStatus::from_word(state));
            record.speed = (*speed != "ukn").then(|| format!("{speed}/{duplex}"));
            records.push(record);
        } else if tokens[2].bytes().all(|b| b.is_ascii_digit()) {
            let address = tokens[tokens.len() - 1];
            let looks_like_address =
                address.contains('/') && (address.contains('.') || address.contains(':'));
            if let Some(record) = records.iter_mut().find(|r| r.name == tokens[0]) {
                if looks_like_address {
                    record.address = Some(address.to_string());
                }
            }
        }
    }
    records
}

/// Anything with one interface per line and an up/down word somewhere after
/// the name.
fn parse_generic(output: &str) -> Vec<InterfaceRecord> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let (name, rest) = tokens.split_first()?;
            if name.eq_ignore_ascii_case("interface") {
                return None;
            }
            let mut status = None;
            for (i, word) in rest.iter().enumerate() {
                let lower = word.trim_matches(|c: char| !c.is_ascii_alphabetic()).to_ascii_lowercase();
                match lower.as_str() {
                    "administratively" if rest.get(i + 1).is_some_and(|w| w.eq_ignore_ascii_case("down")) => {
                        status = Some(LinkStatus::AdminDown);
                        break;
                    }
                    "up" | "down" => {
                        status = Some(LinkStatus::from_word(&lower));
                        break;
                    }
                    _ => {}
                }
            }
            status.map(|s| InterfaceRecord::new(name.trim_end_matches(':'), s))
        })
        .collect()
}

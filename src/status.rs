//! Parsing of `getstatus` replies.

use std::collections::HashMap;

use crate::error::{RconError, Result};
use crate::packet::STATUS_RESPONSE_HEADER;

const VARS_SEPARATOR: u8 = b'\\';

/// Server cvars and info keys from the first line of a status reply.
pub type ServerVars = HashMap<Vec<u8>, Vec<u8>>;

/// One player line of a status reply. Names are kept as raw bytes since they
/// carry color codes and arbitrary encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub frags: i32,
    pub ping: i32,
    pub name: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub vars: ServerVars,
    pub players: Vec<Player>,
}

/// Parse `\key\value\key\value`. A key without a value is an error rather
/// than being dropped.
pub fn parse_server_vars(data: &[u8]) -> Result<ServerVars> {
    let rest = match data.split_first() {
        Some((&VARS_SEPARATOR, rest)) => rest,
        _ => {
            return Err(RconError::malformed(
                "server vars must start with a backslash",
            ))
        }
    };

    let tokens: Vec<&[u8]> = rest.split(|&b| b == VARS_SEPARATOR).collect();
    if tokens.len() % 2 != 0 {
        return Err(RconError::malformed(format!(
            "server vars have an unpaired token ({} tokens)",
            tokens.len()
        )));
    }

    Ok(tokens
        .chunks_exact(2)
        .map(|pair| (pair[0].to_vec(), pair[1].to_vec()))
        .collect())
}

fn parse_int(field: &[u8]) -> Option<i32> {
    let digits = field.strip_prefix(b"-").unwrap_or(field);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Parse `<frags> <ping> "<name>"`. The name runs up to the last byte, which
/// must be the closing quote.
pub fn parse_player(line: &[u8]) -> Result<Player> {
    let bad_line = || {
        RconError::malformed(format!(
            "bad player line {:?}",
            String::from_utf8_lossy(line)
        ))
    };

    let mut fields = line.splitn(3, |&b| b == b' ');
    let frags = fields.next().and_then(parse_int).ok_or_else(bad_line)?;
    let ping = fields.next().and_then(parse_int).ok_or_else(bad_line)?;
    let quoted = fields.next().ok_or_else(bad_line)?;

    let name = quoted
        .strip_prefix(b"\"")
        .and_then(|rest| rest.strip_suffix(b"\""))
        .ok_or_else(bad_line)?;

    Ok(Player {
        frags,
        ping,
        name: name.to_vec(),
    })
}

/// Split a status reply into its vars line and player lines, handing each
/// player line to `player_parser` in order.
pub fn parse_status_packet<P, F>(packet: &[u8], player_parser: F) -> Result<(ServerVars, Vec<P>)>
where
    F: Fn(&[u8]) -> Result<P>,
{
    let payload = packet
        .strip_prefix(STATUS_RESPONSE_HEADER)
        .ok_or_else(|| RconError::malformed("missing status response header"))?;

    let mut lines: Vec<&[u8]> = payload.split(|&b| b == b'\n').collect();
    // the final newline leaves an empty element behind
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    let (vars_line, player_lines) = lines
        .split_first()
        .ok_or_else(|| RconError::malformed("status response has no server vars"))?;

    let vars = parse_server_vars(vars_line)?;
    let players = player_lines
        .iter()
        .map(|&line| player_parser(line))
        .collect::<Result<Vec<P>>>()?;

    Ok((vars, players))
}

/// [`parse_status_packet`] with the default player parser.
pub fn parse_status(packet: &[u8]) -> Result<ServerStatus> {
    let (vars, players) = parse_status_packet(packet, parse_player)?;
    Ok(ServerStatus { vars, players })
}

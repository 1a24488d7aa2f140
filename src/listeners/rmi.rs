//! RMI listener
//!
//! Acknowledges the JRMI stream handshake and captures whatever the client
//! sends on the call stream; lookup names and serialized call arguments are
//! where probes embed their flags.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::AppResult;
use crate::models::interaction::InteractionDraft;
use crate::models::rule::Protocol;
use crate::registry::Registry;

const JRMI_MAGIC: [u8; 4] = *b"JRMI";
const PROTOCOL_ACK: u8 = 0x4E;
const MAX_CAPTURE_BYTES: usize = 4096;

pub async fn run(registry: Arc<Registry>) -> AppResult<()> {
    let addr = registry.config().rmi_addr.clone();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "RMI listener started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            handle_session(registry, stream, peer).await;
        });
    }
}

async fn handle_session(registry: Arc<Registry>, stream: TcpStream, peer: SocketAddr) {
    let deadline = Duration::from_secs(registry.config().session_timeout_secs);
    let mut captured = Vec::new();

    let _ = tokio::time::timeout(deadline, run_session(&registry, stream, &mut captured)).await;

    if captured.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(&captured).into_owned();
    let draft = InteractionDraft::new(Protocol::Rmi, peer.to_string())
        .field("raw", text.clone())
        .payload(text);
    if let Err(err) = registry.capture(draft).await {
        tracing::error!(%peer, "RMI capture failed: {}", err);
    }
}

async fn run_session(
    registry: &Registry,
    mut stream: TcpStream,
    captured: &mut Vec<u8>,
) -> AppResult<()> {
    let mut header = [0u8; 7];
    if stream.read_exact(&mut header).await.is_err() {
        return Ok(());
    }
    if header[0..4] != JRMI_MAGIC {
        // not an RMI client; keep whatever it sent
        captured.extend_from_slice(&header);
    } else {
        stream
            .write_all(&protocol_ack(&registry.config().external_ip))
            .await?;
    }

    let mut buf = [0u8; 1024];
    while captured.len() < MAX_CAPTURE_BYTES {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => captured.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }

    Ok(())
}

/// ProtocolAck: endpoint identifier the client should use for callbacks.
fn protocol_ack(external_ip: &str) -> Vec<u8> {
    let host = external_ip.as_bytes();
    let mut ack = Vec::with_capacity(7 + host.len() + 4);
    ack.push(PROTOCOL_ACK);
    ack.extend_from_slice(&(host.len() as u16).to_be_bytes());
    ack.extend_from_slice(host);
    ack.extend_from_slice(&0u32.to_be_bytes()); // port
    ack
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_ack_frames_the_host() {
        let ack = protocol_ack("192.0.2.1");
        assert_eq!(ack[0], PROTOCOL_ACK);
        assert_eq!(u16::from_be_bytes([ack[1], ack[2]]), 9);
        assert_eq!(ack[3..12], *b"192.0.2.1");
    }
}

//! FTP listener
//!
//! Speaks just enough FTP to elicit credentials and passive-mode probes.
//! Every connection is its own task with a session deadline; a timeout
//! finalizes the capture with whatever arrived before it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::AppResult;
use crate::models::interaction::InteractionDraft;
use crate::models::rule::Protocol;
use crate::registry::Registry;
use crate::ruleset::{MatchOutcome, RuleAction};

const MAX_TRANSCRIPT_BYTES: usize = 8192;

pub async fn run(registry: Arc<Registry>) -> AppResult<()> {
    let addr = registry.config().ftp_addr.clone();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "FTP listener started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            handle_session(registry, stream, peer).await;
        });
    }
}

struct Session {
    peer: SocketAddr,
    user: Option<String>,
    password: Option<String>,
    transcript: String,
    matched: Option<MatchOutcome>,
}

impl Session {
    fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            user: None,
            password: None,
            transcript: String::new(),
            matched: None,
        }
    }

    fn record(&mut self, line: &str) {
        if self.transcript.len() < MAX_TRANSCRIPT_BYTES {
            self.transcript.push_str(line);
            self.transcript.push('\n');
        }
    }

    /// Scannable fields in match order: user, password, full transcript.
    fn draft(&self) -> InteractionDraft {
        InteractionDraft::new(Protocol::Ftp, self.peer.to_string())
            .field("user", self.user.clone().unwrap_or_default())
            .field("password", self.password.clone().unwrap_or_default())
            .field("transcript", self.transcript.clone())
            .payload(self.transcript.clone())
    }

    fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }
}

async fn handle_session(registry: Arc<Registry>, stream: TcpStream, peer: SocketAddr) {
    let deadline = Duration::from_secs(registry.config().session_timeout_secs);
    let mut session = Session::new(peer);

    // a timeout is not an error: finalize with whatever was captured
    let _ = tokio::time::timeout(deadline, run_session(&registry, stream, &mut session)).await;

    if session.is_empty() {
        return;
    }
    if let Err(err) = registry.capture(session.draft()).await {
        tracing::error!(%peer, "FTP capture failed: {}", err);
    }
}

async fn run_session(
    registry: &Registry,
    mut stream: TcpStream,
    session: &mut Session,
) -> AppResult<()> {
    let (read_half, mut write_half) = stream.split();
    write_half.write_all(b"220 FTP server ready\r\n").await?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end_matches(['\r', '\n']);
        if command.is_empty() {
            continue;
        }
        session.record(command);

        let (verb, arg) = parse_command(command);
        let reply: String = match verb.as_str() {
            "USER" => {
                session.user = Some(arg.to_string());
                session.matched = registry.match_only(&session.draft());
                "331 Password required\r\n".to_string()
            }
            "PASS" => {
                session.password = Some(arg.to_string());
                session.matched = registry.match_only(&session.draft());
                "230 Login successful\r\n".to_string()
            }
            "SYST" => "215 UNIX Type: L8\r\n".to_string(),
            "TYPE" => "200 Type set\r\n".to_string(),
            "PWD" => "257 \"/\" is the current directory\r\n".to_string(),
            "PASV" => pasv_line(session, registry),
            "RETR" | "LIST" | "STOR" => "425 Can't open data connection\r\n".to_string(),
            "QUIT" => {
                write_half.write_all(b"221 Goodbye\r\n").await?;
                return Ok(());
            }
            _ => "502 Command not implemented\r\n".to_string(),
        };
        write_half.write_all(reply.as_bytes()).await?;
    }
}

/// PASV reply advertising the matched rule's pasv_address, falling back to
/// the configured external IP (the probe still has to open the data
/// connection somewhere for the SSRF pivot to be observable).
fn pasv_line(session: &Session, registry: &Registry) -> String {
    let rule_addr = session.matched.as_ref().and_then(|m| match &m.rule.action {
        RuleAction::Ftp { pasv_address, .. } if !pasv_address.is_empty() => {
            Some(pasv_address.clone())
        }
        _ => None,
    });
    let addr = rule_addr.unwrap_or_else(|| format!("{}:2121", registry.config().external_ip));

    match pasv_reply(&addr) {
        Some(reply) => reply,
        None => "502 PASV not available\r\n".to_string(),
    }
}

fn parse_command(line: &str) -> (String, &str) {
    match line.split_once(' ') {
        Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
        None => (line.to_ascii_uppercase(), ""),
    }
}

/// `1.2.3.4:8021` -> `227 Entering Passive Mode (1,2,3,4,31,85)`
fn pasv_reply(addr: &str) -> Option<String> {
    let (host, port) = addr.rsplit_once(':')?;
    let ip: std::net::Ipv4Addr = host.parse().ok()?;
    let port: u16 = port.parse().ok()?;
    let [a, b, c, d] = ip.octets();
    Some(format!(
        "227 Entering Passive Mode ({},{},{},{},{},{})\r\n",
        a,
        b,
        c,
        d,
        port / 256,
        port % 256
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing() {
        assert_eq!(parse_command("USER alice"), ("USER".to_string(), "alice"));
        assert_eq!(
            parse_command("pass FLAG{abc123}"),
            ("PASS".to_string(), "FLAG{abc123}")
        );
        assert_eq!(parse_command("QUIT"), ("QUIT".to_string(), ""));
    }

    #[test]
    fn pasv_reply_encoding() {
        assert_eq!(
            pasv_reply("10.0.0.1:8021").as_deref(),
            Some("227 Entering Passive Mode (10,0,0,1,31,85)\r\n")
        );
        assert!(pasv_reply("not-an-addr").is_none());
        assert!(pasv_reply("10.0.0.1:notaport").is_none());
    }
}

//! DNS listener
//!
//! Decodes just the question section of inbound queries and answers with the
//! matched rule's record (TTL 0 so resolvers don't cache probe responses).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::AppResult;
use crate::models::interaction::InteractionDraft;
use crate::models::rule::Protocol;
use crate::registry::Registry;
use crate::ruleset::RuleAction;

pub async fn run(registry: Arc<Registry>) -> AppResult<()> {
    let addr = registry.config().dns_addr.clone();
    let socket = Arc::new(UdpSocket::bind(&addr).await?);
    tracing::info!(%addr, "DNS listener started");

    let mut buf = [0u8; 512];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let packet = buf[..len].to_vec();
        let registry = registry.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            handle_query(registry, socket, packet, peer).await;
        });
    }
}

async fn handle_query(
    registry: Arc<Registry>,
    socket: Arc<UdpSocket>,
    packet: Vec<u8>,
    peer: SocketAddr,
) {
    // malformed packets produce no draft and never reach the matching engine
    let Some(query) = decode_query(&packet) else {
        return;
    };

    let in_zone = query.name.ends_with(&registry.config().domain);
    let draft = InteractionDraft::new(Protocol::Dns, peer.to_string())
        .field("query_name", query.name.clone())
        .payload(query.name.clone())
        .meta(serde_json::json!({ "qtype": query.qtype, "in_zone": in_zone }));

    let outcome = registry.match_only(&draft);
    let action = outcome.as_ref().map(|o| o.rule.action.clone());
    let response = build_response(&packet, &query, action.as_ref(), &registry.config().external_ip);
    if let Err(err) = socket.send_to(&response, peer).await {
        tracing::warn!(%peer, "DNS response send failed: {}", err);
    }

    if let Err(err) = registry.capture_with(draft, outcome).await {
        tracing::error!(%peer, "DNS capture failed: {}", err);
    }
}

#[derive(Debug, PartialEq)]
struct Query {
    name: String,
    qtype: u16,
    /// byte offset just past the question section
    question_end: usize,
}

/// Decode the first question of a DNS query. Queries carry uncompressed
/// names, so a plain label walk is enough.
fn decode_query(packet: &[u8]) -> Option<Query> {
    if packet.len() < 12 {
        return None;
    }
    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    if qdcount == 0 {
        return None;
    }

    let mut name = String::new();
    let mut pos = 12;
    loop {
        let len = *packet.get(pos)? as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len > 63 || pos + 1 + len > packet.len() {
            return None;
        }
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(&packet[pos + 1..pos + 1 + len]));
        pos += 1 + len;
    }
    if name.is_empty() || pos + 4 > packet.len() {
        return None;
    }
    let qtype = u16::from_be_bytes([packet[pos], packet[pos + 1]]);

    Some(Query {
        name,
        qtype,
        question_end: pos + 4,
    })
}

const TYPE_A: u16 = 1;
const TYPE_CNAME: u16 = 5;
const TYPE_TXT: u16 = 16;

/// Build a minimal authoritative response echoing the question and carrying
/// at most one answer record.
fn build_response(
    request: &[u8],
    query: &Query,
    action: Option<&RuleAction>,
    external_ip: &str,
) -> Vec<u8> {
    let (rtype, value) = match action {
        Some(RuleAction::Dns { record_type, value }) => (record_type.as_str(), value.as_str()),
        _ => ("A", ""),
    };

    let rdata: Option<(u16, Vec<u8>)> = match rtype {
        "A" => {
            let ip: Option<Ipv4Addr> = if value.is_empty() {
                external_ip.parse().ok()
            } else {
                value.parse().ok()
            };
            ip.map(|ip| (TYPE_A, ip.octets().to_vec()))
        }
        "CNAME" => Some((TYPE_CNAME, encode_name(value))),
        "TXT" => {
            let text = &value.as_bytes()[..value.len().min(255)];
            let mut data = vec![text.len() as u8];
            data.extend_from_slice(text);
            Some((TYPE_TXT, data))
        }
        _ => None,
    };

    let mut response = Vec::with_capacity(query.question_end + 32);
    response.extend_from_slice(&request[0..2]); // transaction id
    response.extend_from_slice(&[0x85, 0x80]); // QR | AA | RD | RA, no error
    response.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    response.extend_from_slice(&[0x00, if rdata.is_some() { 1 } else { 0 }]); // ANCOUNT
    response.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // NSCOUNT, ARCOUNT
    response.extend_from_slice(&request[12..query.question_end]);

    if let Some((rtype, data)) = rdata {
        response.extend_from_slice(&[0xC0, 0x0C]); // pointer to the question name
        response.extend_from_slice(&rtype.to_be_bytes());
        response.extend_from_slice(&[0x00, 0x01]); // class IN
        response.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // TTL 0
        response.extend_from_slice(&(data.len() as u16).to_be_bytes());
        response.extend_from_slice(&data);
    }

    response
}

fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        let label = &label.as_bytes()[..label.len().min(63)];
        out.push(label.len() as u8);
        out.extend_from_slice(label);
    }
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_packet(name: &str, qtype: u16) -> Vec<u8> {
        let mut packet = vec![
            0x12, 0x34, // id
            0x01, 0x00, // RD
            0x00, 0x01, // QDCOUNT
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        packet.extend_from_slice(&encode_name(name));
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x01]);
        packet
    }

    #[test]
    fn decodes_question_name() {
        let packet = query_packet("cb-abc123.callback.test", TYPE_A);
        let query = decode_query(&packet).unwrap();
        assert_eq!(query.name, "cb-abc123.callback.test");
        assert_eq!(query.qtype, TYPE_A);
        assert_eq!(query.question_end, packet.len());
    }

    #[test]
    fn rejects_malformed_packets() {
        assert!(decode_query(&[0u8; 4]).is_none());
        assert!(decode_query(&[0u8; 12]).is_none());

        let mut truncated = query_packet("callback.test", TYPE_A);
        truncated.truncate(16);
        assert!(decode_query(&truncated).is_none());
    }

    #[test]
    fn answers_a_queries_with_rule_value() {
        let packet = query_packet("callback.test", TYPE_A);
        let query = decode_query(&packet).unwrap();
        let action = RuleAction::Dns {
            record_type: "A".to_string(),
            value: "10.9.8.7".to_string(),
        };

        let response = build_response(&packet, &query, Some(&action), "127.0.0.1");
        assert_eq!(response[0..2], packet[0..2]);
        assert_eq!(u16::from_be_bytes([response[6], response[7]]), 1); // ANCOUNT
        assert_eq!(response[response.len() - 4..], [10, 9, 8, 7]);
    }

    #[test]
    fn unmatched_queries_fall_back_to_external_ip() {
        let packet = query_packet("callback.test", TYPE_A);
        let query = decode_query(&packet).unwrap();

        let response = build_response(&packet, &query, None, "192.0.2.1");
        assert_eq!(response[response.len() - 4..], [192, 0, 2, 1]);
    }

    #[test]
    fn name_encoding_round_trips_through_decode() {
        let encoded = encode_name("a.bc.def");
        assert_eq!(encoded[0], 1);
        assert_eq!(encoded[encoded.len() - 1], 0);
    }
}

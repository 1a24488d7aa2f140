//! HTTP capture handler
//!
//! Mounted as the admin router's fallback: every request that is not an
//! admin route is a captured callback. The matched rule shapes the status,
//! headers, and body of the response.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::models::interaction::InteractionDraft;
use crate::models::rule::Protocol;
use crate::ruleset::{MatchOutcome, RuleAction};
use crate::AppState;

const MAX_BODY_BYTES: usize = 65536;

pub async fn capture(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();

    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .unwrap_or_default();
    let body_text = String::from_utf8_lossy(&body_bytes).into_owned();

    let url = parts.uri.to_string();
    let header_text = parts
        .headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())))
        .collect::<Vec<_>>()
        .join("\n");
    let payload = format!("{} {}\n{}\n\n{}", parts.method, url, header_text, body_text);

    // scannable fields in match order: url, headers, body
    let draft = InteractionDraft::new(Protocol::Http, peer.to_string())
        .field("url", url)
        .field("header", header_text)
        .field("body", body_text)
        .payload(payload)
        .meta(serde_json::json!({ "method": parts.method.as_str() }));

    let outcome = state.registry.match_only(&draft);
    let response = shape_response(outcome.as_ref());

    if let Err(err) = state.registry.capture_with(draft, outcome).await {
        tracing::error!(%peer, "HTTP capture failed: {}", err);
    }

    response
}

fn shape_response(outcome: Option<&MatchOutcome>) -> Response {
    let Some(MatchOutcome { rule, .. }) = outcome else {
        return StatusCode::OK.into_response();
    };
    let RuleAction::Http {
        status,
        headers,
        body,
    } = &rule.action
    else {
        return StatusCode::OK.into_response();
    };

    let mut response = Response::builder()
        .status(StatusCode::from_u16(*status).unwrap_or(StatusCode::OK));
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            response = response.header(name, value);
        }
    }
    response
        .body(Body::from(body.clone()))
        .unwrap_or_else(|_| StatusCode::OK.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::FlagFormat;
    use crate::ruleset::CompiledRule;
    use std::sync::Arc;

    fn outcome(action: RuleAction) -> MatchOutcome {
        MatchOutcome {
            rule: Arc::new(CompiledRule {
                id: 1,
                name: "redirect".to_string(),
                base_rank: 0,
                push_to_client: false,
                notice: false,
                flag: Some(FlagFormat::parse("F{{}}").unwrap()),
                action,
            }),
            token: Some("tok1".to_string()),
        }
    }

    #[test]
    fn unmatched_requests_get_a_plain_200() {
        let response = shape_response(None);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn matched_rule_shapes_the_response() {
        let out = outcome(RuleAction::Http {
            status: 302,
            headers: vec![("Location".to_string(), "https://example.com".to_string())],
            body: "moved".to_string(),
        });
        let response = shape_response(Some(&out));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("Location").unwrap(),
            "https://example.com"
        );
    }
}

//! Interaction log and live event stream handlers

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::broadcast;

use crate::handlers::succeed;
use crate::models::interaction::{Interaction, InteractionFilter};
use crate::models::rule::Protocol;
use crate::{AppResult, AppState};

/// Chronological interaction log, newest first.
pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<InteractionFilter>,
) -> AppResult<Json<Value>> {
    if let Some(protocol) = filter.protocol.as_deref() {
        protocol.parse::<Protocol>()?;
    }
    let page = Interaction::list(state.registry.pool(), filter).await?;
    Ok(succeed(json!({ "count": page.count, "data": page.data })))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub protocol: Protocol,
}

/// Live push stream for one protocol. Interactions whose matched rule has
/// `push_to_client` set arrive as SSE events in dispatch order.
pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.registry.live().subscribe(query.protocol);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(interaction) => {
                    let event = match Event::default().event("interaction").json_data(&interaction)
                    {
                        Ok(event) => event,
                        Err(_) => continue,
                    };
                    return Some((Ok::<_, Infallible>(event), rx));
                }
                // a lagged subscriber only loses its own backlog
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

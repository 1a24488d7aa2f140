//! Admin API handlers
//!
//! Thin translations between the HTTP surface and the rule store /
//! interaction log contracts; no matching or dispatch logic lives here.

pub mod health;
pub mod interactions;
pub mod rules;

use axum::Json;
use serde_json::json;

pub(crate) fn succeed(result: serde_json::Value) -> Json<serde_json::Value> {
    Json(json!({
        "status": "succeed",
        "error": null,
        "result": result
    }))
}

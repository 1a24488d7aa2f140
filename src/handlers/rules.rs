//! Rule CRUD handlers, one trio per protocol family
//!
//! Every successful write returns only after the protocol's rule cache has
//! been rebuilt, so a caller that sees success can rely on the next
//! interaction matching against the new rule set.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::handlers::succeed;
use crate::models::{DnsRule, FtpRule, HttpRule, MysqlRule, RmiRule, RuleFilter};
use crate::{AppResult, AppState};

// --- FTP ---

pub async fn ftp_list(
    State(state): State<AppState>,
    Query(filter): Query<RuleFilter>,
) -> AppResult<Json<Value>> {
    let page = FtpRule::list(state.registry.pool(), filter).await?;
    Ok(succeed(json!({ "count": page.count, "data": page.data })))
}

pub async fn ftp_upsert(
    State(state): State<AppState>,
    Json(rule): Json<FtpRule>,
) -> AppResult<Json<Value>> {
    let id = FtpRule::create_or_update(&state.registry, rule).await?;
    Ok(succeed(json!({ "id": id })))
}

pub async fn ftp_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    FtpRule::delete(&state.registry, id).await?;
    Ok(succeed(Value::Null))
}

// --- HTTP ---

pub async fn http_list(
    State(state): State<AppState>,
    Query(filter): Query<RuleFilter>,
) -> AppResult<Json<Value>> {
    let page = HttpRule::list(state.registry.pool(), filter).await?;
    Ok(succeed(json!({ "count": page.count, "data": page.data })))
}

pub async fn http_upsert(
    State(state): State<AppState>,
    Json(rule): Json<HttpRule>,
) -> AppResult<Json<Value>> {
    let id = HttpRule::create_or_update(&state.registry, rule).await?;
    Ok(succeed(json!({ "id": id })))
}

pub async fn http_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    HttpRule::delete(&state.registry, id).await?;
    Ok(succeed(Value::Null))
}

// --- DNS ---

pub async fn dns_list(
    State(state): State<AppState>,
    Query(filter): Query<RuleFilter>,
) -> AppResult<Json<Value>> {
    let page = DnsRule::list(state.registry.pool(), filter).await?;
    Ok(succeed(json!({ "count": page.count, "data": page.data })))
}

pub async fn dns_upsert(
    State(state): State<AppState>,
    Json(rule): Json<DnsRule>,
) -> AppResult<Json<Value>> {
    let id = DnsRule::create_or_update(&state.registry, rule).await?;
    Ok(succeed(json!({ "id": id })))
}

pub async fn dns_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    DnsRule::delete(&state.registry, id).await?;
    Ok(succeed(Value::Null))
}

// --- MySQL ---

pub async fn mysql_list(
    State(state): State<AppState>,
    Query(filter): Query<RuleFilter>,
) -> AppResult<Json<Value>> {
    let page = MysqlRule::list(state.registry.pool(), filter).await?;
    Ok(succeed(json!({ "count": page.count, "data": page.data })))
}

pub async fn mysql_upsert(
    State(state): State<AppState>,
    Json(rule): Json<MysqlRule>,
) -> AppResult<Json<Value>> {
    let id = MysqlRule::create_or_update(&state.registry, rule).await?;
    Ok(succeed(json!({ "id": id })))
}

pub async fn mysql_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    MysqlRule::delete(&state.registry, id).await?;
    Ok(succeed(Value::Null))
}

// --- RMI ---

pub async fn rmi_list(
    State(state): State<AppState>,
    Query(filter): Query<RuleFilter>,
) -> AppResult<Json<Value>> {
    let page = RmiRule::list(state.registry.pool(), filter).await?;
    Ok(succeed(json!({ "count": page.count, "data": page.data })))
}

pub async fn rmi_upsert(
    State(state): State<AppState>,
    Json(rule): Json<RmiRule>,
) -> AppResult<Json<Value>> {
    let id = RmiRule::create_or_update(&state.registry, rule).await?;
    Ok(succeed(json!({ "id": id })))
}

pub async fn rmi_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    RmiRule::delete(&state.registry, id).await?;
    Ok(succeed(Value::Null))
}

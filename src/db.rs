//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create tables if not exist
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- FTP rules
CREATE TABLE IF NOT EXISTS ftp_rules (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    flag_format VARCHAR(255) NOT NULL DEFAULT '',
    base_rank INT NOT NULL DEFAULT 0,
    push_to_client BOOLEAN NOT NULL DEFAULT false,
    notice BOOLEAN NOT NULL DEFAULT false,
    pasv_address VARCHAR(255) NOT NULL DEFAULT '',
    data BYTEA,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- HTTP rules
CREATE TABLE IF NOT EXISTS http_rules (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    flag_format VARCHAR(255) NOT NULL DEFAULT '',
    base_rank INT NOT NULL DEFAULT 0,
    push_to_client BOOLEAN NOT NULL DEFAULT false,
    notice BOOLEAN NOT NULL DEFAULT false,
    response_status INT NOT NULL DEFAULT 200,
    response_headers JSONB,
    response_body TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- DNS rules
CREATE TABLE IF NOT EXISTS dns_rules (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    flag_format VARCHAR(255) NOT NULL DEFAULT '',
    base_rank INT NOT NULL DEFAULT 0,
    push_to_client BOOLEAN NOT NULL DEFAULT false,
    notice BOOLEAN NOT NULL DEFAULT false,
    record_type VARCHAR(8) NOT NULL DEFAULT 'A',
    value VARCHAR(255) NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- MySQL rules
CREATE TABLE IF NOT EXISTS mysql_rules (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    flag_format VARCHAR(255) NOT NULL DEFAULT '',
    base_rank INT NOT NULL DEFAULT 0,
    push_to_client BOOLEAN NOT NULL DEFAULT false,
    notice BOOLEAN NOT NULL DEFAULT false,
    read_files TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- RMI rules
CREATE TABLE IF NOT EXISTS rmi_rules (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    flag_format VARCHAR(255) NOT NULL DEFAULT '',
    base_rank INT NOT NULL DEFAULT 0,
    push_to_client BOOLEAN NOT NULL DEFAULT false,
    notice BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);

-- Captured interactions (append-only)
CREATE TABLE IF NOT EXISTS interactions (
    id BIGSERIAL PRIMARY KEY,
    protocol VARCHAR(16) NOT NULL,
    rule_id BIGINT,
    rule_name VARCHAR(255),
    flag VARCHAR(255),
    remote_addr VARCHAR(64) NOT NULL,
    payload TEXT NOT NULL DEFAULT '',
    meta JSONB,
    captured_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_ftp_rules_rank ON ftp_rules(base_rank DESC, id);
CREATE INDEX IF NOT EXISTS idx_http_rules_rank ON http_rules(base_rank DESC, id);
CREATE INDEX IF NOT EXISTS idx_dns_rules_rank ON dns_rules(base_rank DESC, id);
CREATE INDEX IF NOT EXISTS idx_mysql_rules_rank ON mysql_rules(base_rank DESC, id);
CREATE INDEX IF NOT EXISTS idx_rmi_rules_rank ON rmi_rules(base_rank DESC, id);
CREATE INDEX IF NOT EXISTS idx_interactions_captured ON interactions(captured_at);
CREATE INDEX IF NOT EXISTS idx_interactions_protocol ON interactions(protocol, captured_at);
CREATE INDEX IF NOT EXISTS idx_interactions_flag ON interactions(flag);
"#;

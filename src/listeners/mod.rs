//! Protocol listeners
//!
//! Each listener decodes one protocol far enough to elicit a callback and
//! hands the core a draft; decode failures stay inside the listener. The
//! HTTP listener rides on the admin server as its fallback route.

pub mod dns;
pub mod ftp;
pub mod http;
pub mod mysql;
pub mod rmi;

use std::sync::Arc;

use crate::registry::Registry;

/// Spawn every listener with a configured bind address. A listener that
/// dies takes only itself down; the admin server and the other protocols
/// keep running.
pub fn spawn_all(registry: Arc<Registry>) {
    let config = registry.config();

    if !config.dns_addr.is_empty() {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = dns::run(registry).await {
                tracing::error!("DNS listener exited: {}", err);
            }
        });
    }

    if !config.ftp_addr.is_empty() {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = ftp::run(registry).await {
                tracing::error!("FTP listener exited: {}", err);
            }
        });
    }

    if !config.mysql_addr.is_empty() {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = mysql::run(registry).await {
                tracing::error!("MySQL listener exited: {}", err);
            }
        });
    }

    if !config.rmi_addr.is_empty() {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = rmi::run(registry).await {
                tracing::error!("RMI listener exited: {}", err);
            }
        });
    }
}

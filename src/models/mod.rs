//! Data models

pub mod dns;
pub mod ftp;
pub mod http;
pub mod interaction;
pub mod mysql;
pub mod rmi;
pub mod rule;

pub use dns::*;
pub use ftp::*;
pub use http::*;
pub use interaction::*;
pub use mysql::*;
pub use rmi::*;
pub use rule::*;

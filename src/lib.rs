//! Live-query data-synchronization client.
//!
//! A [`rest::RestTransporter`] exposes a remote resource, either a collection
//! or a single document, as a continuously updated stream of change events. Each
//! query combines an on-demand HTTP baseline read with events from a shared
//! WebSocket push channel; the push channel reconnects on its own and every
//! completed reconnect triggers a fresh baseline pull, so consumers only
//! ever observe one merged stream.
//!
//! ```no_run
//! use livequery_rest_transporter::config::RestTransporterConfig;
//! use livequery_rest_transporter::rest::RestTransporter;
//! use livequery_rest_transporter::types::QueryOptions;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RestTransporterConfig::new("https://api.example.com")
//!     .websocket_url("wss://api.example.com/live");
//! let transporter = RestTransporter::new(config);
//!
//! let mut stream = transporter.query(1, "posts", QueryOptions::default())?;
//! while let Some(item) = stream.next().await {
//!     if let Some(data) = item.data {
//!         for change in data.changes {
//!             println!("{:?} {}", change.change_type, change.reference);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logger;
pub mod platform;
pub mod realtime;
pub mod rest;
pub mod types;

#[cfg(test)]
pub mod test_support;

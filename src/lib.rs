//! Arrow Flight CRUD client for A2DB servers.
//!
//! Inserts go through `DoPut`, selects through `DoGet`, and updates and
//! deletes through the `update`/`delete` actions, whose body is a one-row
//! Arrow IPC envelope `{table_name, data}`. On connect the client probes the
//! server anonymously and authenticates only when the server asks for it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use a2flight_client::{ClientConfig, Connection};
//!
//! let mut conn = Connection::connect_new(ClientConfig::load()?).await?;
//! let result = conn.insert(&batch, "users").await?;
//! println!("Rows: {}", result.rows_written());
//! conn.close().await;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! The module-level functions in [`global`] share one lazily connected
//! session per process:
//!
//! ```rust,ignore
//! let users = a2flight_client::global::select("SELECT * FROM users").await?;
//! ```

pub mod action;
pub mod arrow;
pub mod auth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod global;
pub mod logging;
pub mod result;
pub mod transport;

pub use action::ActionKind;
pub use config::ClientConfig;
pub use connection::{BatchStream, Connection};
pub use error::{AuthFailureKind, ClientError, OperationKind};
pub use global::GlobalClient;
pub use result::{ConnectionStats, OperationResult};

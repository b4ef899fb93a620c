//! # Steward - DHCPv4 Server Transactions
//!
//! Steward runs the server side of a DHCPv4 lease negotiation. Every client
//! exchange is a [`Transaction`] that walks through `Initial`, `Offered` and
//! `Bound`, enforcing DHCP's ordering, timeout and identity rules, while a
//! pluggable [`Handler`] decides which addresses and lease terms to hand out.
//!
//! ## Features
//!
//! - One independent state machine per client transaction id
//! - Allocation policy behind a small trait, with an in-memory pool included
//! - RFC 2131 reply addressing (broadcast vs. unicast)
//! - Asynchronous operation using Tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::{net::Ipv4Addr, sync::Arc, time::Duration};
//! use steward::{config::PoolConfig, network, PoolHandler, Server, TransactionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = Arc::new(PoolHandler::new(PoolConfig {
//!         server_ip: Ipv4Addr::new(192, 168, 1, 1),
//!         pool_start: Ipv4Addr::new(192, 168, 1, 100),
//!         pool_end: Ipv4Addr::new(192, 168, 1, 200),
//!         subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
//!         router: Some(Ipv4Addr::new(192, 168, 1, 1)),
//!         lease_time: 3600,
//!     }, Duration::from_secs(30)));
//!     let socket = network::bind_server_socket("eth0", 67)?;
//!     let mut server = Server::new(socket, handler, TransactionConfig::default());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod network;
pub mod server;
pub mod transaction;
pub mod v4;

pub use config::{Args, ServerConfig, TransactionConfig};
pub use error::{HandlerError, StewardError};
pub use handler::{GatewayInfo, Grant, Handler, Outcome, PoolHandler, Reply, Verdict};
pub use network::Transport;
pub use server::Server;
pub use transaction::{Event, Transaction, Transition};
pub use v4::ServerState;

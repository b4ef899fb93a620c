//! DHCPv4 protocol implementation
//!
//! This module contains the DHCPv4-specific implementation including:
//! - Reply construction, validation and addressing
//! - The per-transaction server state machine

pub mod fsm;
pub mod message;


pub use fsm::ServerState;
pub use message::{reply_destination, valid_reply};

//! Allocation policy seam
//!
//! A transaction never decides which address a client gets. It builds a reply
//! template and asks a [`Handler`] what to do with it; the handler answers with
//! an [`Outcome`] and the transaction carries on from there.

pub mod pool;

pub use pool::PoolHandler;

use crate::error::HandlerError;
use dhcproto::v4;
use std::net::Ipv4Addr;

/// Pluggable allocation policy shared by every transaction.
///
/// Implementations are called concurrently from many transactions and must
/// serialize access to any shared data themselves. `State` is the per-transaction
/// slice of policy state; each call receives the current value and returns its
/// replacement.
pub trait Handler: Send + Sync + 'static {
    type State: Send + 'static;

    /// Called once when a transaction is created. Returns the initial state and
    /// the server identifier stamped into every reply.
    fn init(&self) -> (Self::State, Ipv4Addr);

    /// Offer-phase allocation decision.
    fn discover(
        &self,
        template: v4::Message,
        packet: &v4::Message,
        state: &Self::State,
    ) -> Result<Outcome<Self::State>, HandlerError>;

    /// Confirmation or renewal decision.
    fn request(
        &self,
        template: v4::Message,
        packet: &v4::Message,
        state: &Self::State,
    ) -> Result<Outcome<Self::State>, HandlerError>;

    /// Voluntary lease release.
    fn release(&self, packet: &v4::Message, state: &Self::State)
        -> Result<Self::State, HandlerError>;
}

/// Successful answer from a [`Handler`] call.
#[derive(Debug)]
pub enum Outcome<S> {
    /// State changed, nothing to send.
    Updated(S),
    /// State changed and a reply should go out.
    Reply(S, Reply),
}

/// How the handler describes the reply it wants sent.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A complete packet, sent as is.
    Packet(v4::Message),
    /// Stamp an ACK or NAK onto `base`.
    Verdict { verdict: Verdict, base: v4::Message },
    /// Offer or acknowledge `ip` with `mask`.
    Address {
        grant: Grant,
        ip: Ipv4Addr,
        mask: Ipv4Addr,
        base: v4::Message,
    },
    /// As [`Reply::Address`], plus a router option.
    Gateway {
        grant: Grant,
        ip: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: GatewayInfo,
        base: v4::Message,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ack,
    Nak,
}

impl From<Verdict> for v4::MessageType {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Ack => v4::MessageType::Ack,
            Verdict::Nak => v4::MessageType::Nak,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Offer,
    Ack,
}

impl From<Grant> for v4::MessageType {
    fn from(grant: Grant) -> Self {
        match grant {
            Grant::Offer => v4::MessageType::Offer,
            Grant::Ack => v4::MessageType::Ack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayInfo {
    Single(Ipv4Addr),
    List(Vec<Ipv4Addr>),
}

impl GatewayInfo {
    pub fn into_routers(self) -> Vec<Ipv4Addr> {
        match self {
            GatewayInfo::Single(addr) => vec![addr],
            GatewayInfo::List(addrs) => addrs,
        }
    }
}

impl Reply {
    /// Turns the descriptor into the packet that will be validated and sent.
    pub fn into_message(self) -> v4::Message {
        match self {
            Reply::Packet(msg) => msg,
            Reply::Verdict { verdict, mut base } => {
                base.opts_mut()
                    .insert(v4::DhcpOption::MessageType(verdict.into()));
                base
            }
            Reply::Address {
                grant,
                ip,
                mask,
                base,
            } => grant_address(base, grant, ip, mask),
            Reply::Gateway {
                grant,
                ip,
                mask,
                gateway,
                base,
            } => {
                let mut msg = grant_address(base, grant, ip, mask);
                msg.opts_mut()
                    .insert(v4::DhcpOption::Router(gateway.into_routers()));
                msg
            }
        }
    }
}

fn grant_address(mut base: v4::Message, grant: Grant, ip: Ipv4Addr, mask: Ipv4Addr) -> v4::Message {
    base.set_yiaddr(ip);
    base.opts_mut().insert(v4::DhcpOption::SubnetMask(mask));
    base.opts_mut()
        .insert(v4::DhcpOption::MessageType(grant.into()));
    base
}

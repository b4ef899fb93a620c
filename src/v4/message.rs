//! Packet helpers the state machine relies on: typed option lookups,
//! reply templates, reply validation and reply addressing.

use crate::error::StewardError;
use dhcproto::{v4, Encodable as _, Encoder};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub const DHCP_CLIENT_PORT: u16 = 68;

/// Lease time used when neither the reply nor the request carries one.
pub const DEFAULT_LEASE_TIME: u32 = 3000;

pub fn message_type(msg: &v4::Message) -> Option<v4::MessageType> {
    msg.opts().msg_type()
}

pub fn server_identifier(msg: &v4::Message) -> Option<Ipv4Addr> {
    match msg.opts().get(v4::OptionCode::ServerIdentifier) {
        Some(v4::DhcpOption::ServerIdentifier(ip)) => Some(*ip),
        _ => None,
    }
}

pub fn requested_ip(msg: &v4::Message) -> Option<Ipv4Addr> {
    match msg.opts().get(v4::OptionCode::RequestedIpAddress) {
        Some(v4::DhcpOption::RequestedIpAddress(ip)) => Some(*ip),
        _ => None,
    }
}

pub fn address_lease_time(msg: &v4::Message) -> Option<u32> {
    match msg.opts().get(v4::OptionCode::AddressLeaseTime) {
        Some(v4::DhcpOption::AddressLeaseTime(secs)) => Some(*secs),
        _ => None,
    }
}

/// Lease duration granted by `reply`, falling back to what the client asked
/// for in `request`, then to [`DEFAULT_LEASE_TIME`].
pub fn lease_time(reply: &v4::Message, request: &v4::Message) -> u32 {
    address_lease_time(reply)
        .or_else(|| address_lease_time(request))
        .unwrap_or(DEFAULT_LEASE_TIME)
}

/// Starting point handed to the allocation handler: a copy of the client's
/// packet carrying our server identifier and any extra options, flipped to a reply.
pub fn reply_template(
    packet: &v4::Message,
    server_id: Ipv4Addr,
    extra: &[v4::DhcpOption],
) -> v4::Message {
    let mut template = packet.clone();
    template
        .opts_mut()
        .insert(v4::DhcpOption::ServerIdentifier(server_id));
    for opt in extra {
        template.opts_mut().insert(opt.clone());
    }
    template.set_opcode(v4::Opcode::BootReply);
    template
}

/// Checks that `msg` is something a server may put on the wire.
pub fn validate_reply(msg: &v4::Message) -> Result<(), StewardError> {
    if msg.opcode() != v4::Opcode::BootReply {
        return Err(StewardError::InvalidReply(format!(
            "opcode is {:?}",
            msg.opcode()
        )));
    }
    let kind = match message_type(msg) {
        Some(kind @ (v4::MessageType::Offer | v4::MessageType::Ack | v4::MessageType::Nak)) => kind,
        other => {
            return Err(StewardError::InvalidReply(format!(
                "message type {other:?} is not a server reply"
            )))
        }
    };
    if server_identifier(msg).is_none() {
        return Err(StewardError::InvalidReply(
            "missing server identifier".to_string(),
        ));
    }
    if kind != v4::MessageType::Nak && msg.yiaddr().is_unspecified() {
        return Err(StewardError::InvalidReply(format!(
            "{kind:?} without an address"
        )));
    }
    Ok(())
}

pub fn valid_reply(msg: &v4::Message) -> bool {
    validate_reply(msg).is_ok()
}

/// Where a reply must be sent, first match wins: broadcast flag, OFFER,
/// NAK, client without an address, otherwise unicast to `ciaddr`.
pub fn reply_destination(msg: &v4::Message) -> Ipv4Addr {
    if msg.flags().broadcast() {
        return Ipv4Addr::BROADCAST;
    }
    match message_type(msg) {
        Some(v4::MessageType::Offer) | Some(v4::MessageType::Nak) => Ipv4Addr::BROADCAST,
        _ if msg.ciaddr().is_unspecified() => Ipv4Addr::BROADCAST,
        _ => msg.ciaddr(),
    }
}

pub fn reply_socket_addr(msg: &v4::Message) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(reply_destination(msg), DHCP_CLIENT_PORT))
}

pub fn encode(msg: &v4::Message) -> Result<Vec<u8>, StewardError> {
    let mut buffer = Vec::new();
    let mut encoder = Encoder::new(&mut buffer);
    msg.encode(&mut encoder)?;
    Ok(buffer)
}

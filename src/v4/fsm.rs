//! DHCPv4 server negotiation state machine
//!
//! Implements the server side of DORA for a single client: `Initial` waits
//! for a DISCOVER (or a bare REQUEST), `Offered` waits for the REQUEST that
//! accepts the offer, and `Bound` serves renewals until the client releases
//! the lease or the timer runs out.

use super::message;
use crate::{
    error::StewardError,
    handler::{Handler, Outcome},
    transaction::{Event, Transaction, Transition},
};
use bytes::Bytes;
use dhcproto::v4;
use std::{net::Ipv4Addr, time::Duration};
use tokio::time::Instant;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ServerState {
    Initial,
    Offered,
    Bound,
}

impl ServerState {
    pub fn name(&self) -> &'static str {
        match self {
            ServerState::Initial => "Initial",
            ServerState::Offered => "Offered",
            ServerState::Bound => "Bound",
        }
    }
}

/// Which handler capability a delegation invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Discover,
    Request,
}

/// Successful result of handing a packet to the handler.
#[derive(Debug)]
pub(crate) enum Delegation {
    /// The handler produced a reply and it was sent.
    Sent(v4::Message),
    /// The handler updated its state without replying.
    Updated,
}

/// How a REQUEST's (server identifier, requested address) pair compares to ours.
#[derive(Debug, PartialEq, Eq)]
enum Identity {
    Match,
    WrongAddress(Option<Ipv4Addr>),
    ForeignServer,
}

impl<H: Handler> Transaction<H> {
    /// Handles one event and reports how the driver should continue.
    pub fn handle_event(&mut self, event: Event) -> Transition {
        tracing::debug!(
            "Handling {} in state {}",
            match &event {
                Event::Packet(_) => "packet",
                Event::Timeout => "timeout",
            },
            self.state_name()
        );
        match self.state {
            ServerState::Initial => self.handle_initial(event),
            ServerState::Offered => self.handle_offered(event),
            ServerState::Bound => self.handle_bound(event),
        }
    }

    fn handle_initial(&mut self, event: Event) -> Transition {
        let packet = match event {
            Event::Packet(packet) => packet,
            Event::Timeout => {
                tracing::warn!("Timeout in Initial state, no DISCOVER or REQUEST arrived");
                return Transition::Terminate;
            }
        };

        match message::message_type(&packet) {
            Some(v4::MessageType::Discover) => {
                let extra = [v4::DhcpOption::AddressLeaseTime(message::DEFAULT_LEASE_TIME)];
                match self.delegate(Phase::Discover, &packet, &extra) {
                    Ok(Delegation::Sent(reply)) => {
                        self.adopt(&packet, &reply);
                        self.state = ServerState::Offered;
                        tracing::info!(
                            "Offered {} to XID={:x}, transitioning to Offered state",
                            reply.yiaddr(),
                            packet.xid()
                        );
                        Transition::Continue(self.config.offer_timeout)
                    }
                    Ok(Delegation::Updated) => Transition::Continue(self.config.initial_timeout),
                    Err(e) => {
                        self.report_failure(Phase::Discover, &e);
                        Transition::Continue(self.config.initial_timeout)
                    }
                }
            }
            Some(v4::MessageType::Request) => match self.delegate(Phase::Request, &packet, &[]) {
                Ok(Delegation::Sent(reply)) => {
                    self.adopt(&packet, &reply);
                    self.state = ServerState::Bound;
                    tracing::info!(
                        "Answered REQUEST from XID={:x}, transitioning to Bound state",
                        packet.xid()
                    );
                    Transition::Continue(lease_duration(&reply, &packet))
                }
                Ok(Delegation::Updated) => Transition::Continue(self.config.initial_timeout),
                Err(e) => {
                    self.report_failure(Phase::Request, &e);
                    Transition::Continue(self.config.initial_timeout)
                }
            },
            other => {
                tracing::debug!("Ignoring {:?} in Initial state", other);
                Transition::Continue(self.config.initial_timeout)
            }
        }
    }

    fn handle_offered(&mut self, event: Event) -> Transition {
        let packet = match event {
            Event::Packet(packet) => packet,
            Event::Timeout => {
                tracing::warn!("Timeout in Offered state, client never accepted the offer");
                return Transition::Terminate;
            }
        };

        if !self.owns(&packet) {
            tracing::debug!("XID mismatch, ignoring packet");
            return Transition::Continue(self.config.offer_timeout);
        }

        match message::message_type(&packet) {
            Some(v4::MessageType::Request) => match self.identity(&packet) {
                Identity::Match => match self.delegate(Phase::Request, &packet, &[]) {
                    Ok(Delegation::Sent(reply)) => {
                        self.record_address(&reply);
                        self.state = ServerState::Bound;
                        tracing::info!("Client accepted offer, transitioning to Bound state");
                        Transition::Continue(lease_duration(&reply, &packet))
                    }
                    Ok(Delegation::Updated) => Transition::Continue(self.config.offer_timeout),
                    Err(e) => self.request_failed(&e),
                },
                Identity::WrongAddress(requested) => {
                    tracing::error!(
                        "Invalid IP requested: {:?}, offered {:?}",
                        requested,
                        self.offered
                    );
                    Transition::Terminate
                }
                Identity::ForeignServer => {
                    tracing::debug!("Client selected another server");
                    Transition::Terminate
                }
            },
            Some(v4::MessageType::Decline) => {
                tracing::info!("Client declined {:?}", self.offered);
                Transition::Terminate
            }
            other => {
                tracing::debug!("Ignoring {:?} in Offered state", other);
                Transition::Continue(self.config.offer_timeout)
            }
        }
    }

    fn handle_bound(&mut self, event: Event) -> Transition {
        let packet = match event {
            Event::Packet(packet) => packet,
            Event::Timeout => {
                tracing::warn!("Timeout in Bound state, lease of {:?} ran out", self.offered);
                return Transition::Terminate;
            }
        };

        if !self.owns(&packet) {
            tracing::debug!("XID mismatch, ignoring packet");
            return Transition::Stay;
        }

        match message::message_type(&packet) {
            Some(v4::MessageType::Release) => {
                match self.handler.release(&packet, &self.handler_state) {
                    Ok(state) => {
                        self.handler_state = state;
                        self.released = true;
                        tracing::info!("Client released {:?}", self.offered);
                    }
                    Err(e) => tracing::warn!("Handler release failed: {}", e),
                }
                Transition::Terminate
            }
            Some(v4::MessageType::Request) => match self.identity(&packet) {
                Identity::Match => match self.delegate(Phase::Request, &packet, &[]) {
                    Ok(Delegation::Sent(reply)) => {
                        self.record_address(&reply);
                        tracing::info!("Renewed lease of {}", reply.yiaddr());
                        Transition::Continue(lease_duration(&reply, &packet))
                    }
                    Ok(Delegation::Updated) => {
                        tracing::debug!("Handler declined to answer renewal");
                        Transition::Terminate
                    }
                    Err(e) => self.request_failed(&e),
                },
                Identity::WrongAddress(requested) => {
                    tracing::error!(
                        "Invalid IP requested: {:?}, bound {:?}",
                        requested,
                        self.offered
                    );
                    Transition::Terminate
                }
                Identity::ForeignServer => Transition::Terminate,
            },
            other => {
                tracing::debug!("Ignoring {:?} in Bound state", other);
                Transition::Stay
            }
        }
    }

    /// Asks the handler for a reply to `packet` and sends it if one is produced.
    ///
    /// Handler state and `last_activity` are only replaced once the outcome is
    /// usable; a reply that fails validation leaves both untouched.
    pub(crate) fn delegate(
        &mut self,
        phase: Phase,
        packet: &v4::Message,
        extra: &[v4::DhcpOption],
    ) -> Result<Delegation, StewardError> {
        let template = message::reply_template(packet, self.server_id, extra);
        let outcome = match phase {
            Phase::Discover => self.handler.discover(template, packet, &self.handler_state),
            Phase::Request => self.handler.request(template, packet, &self.handler_state),
        }
        .map_err(StewardError::Handler)?;

        match outcome {
            Outcome::Updated(state) => {
                self.handler_state = state;
                self.last_activity = Instant::now();
                Ok(Delegation::Updated)
            }
            Outcome::Reply(state, reply) => {
                let reply = reply.into_message();
                message::validate_reply(&reply)?;
                let payload = Bytes::from(message::encode(&reply)?);
                let dest = message::reply_socket_addr(&reply);

                self.handler_state = state;
                self.last_activity = Instant::now();

                tracing::debug!(
                    "Sending {:?} for XID={:x} to {}",
                    message::message_type(&reply),
                    reply.xid(),
                    dest
                );
                if let Err(e) = self.transport.send(payload, dest) {
                    tracing::warn!("Failed to send reply to {}: {}", dest, e);
                }
                Ok(Delegation::Sent(reply))
            }
        }
    }

    /// True once `packet` belongs to this negotiation.
    fn owns(&self, packet: &v4::Message) -> bool {
        self.xid == Some(packet.xid())
    }

    fn identity(&self, packet: &v4::Message) -> Identity {
        if message::server_identifier(packet) != Some(self.server_id) {
            return Identity::ForeignServer;
        }
        match (message::requested_ip(packet), self.offered) {
            (Some(requested), Some(offered)) if requested == offered => Identity::Match,
            (requested, _) => Identity::WrongAddress(requested),
        }
    }

    /// Captures the xid of the first answered packet and the address the reply carries.
    fn adopt(&mut self, packet: &v4::Message, reply: &v4::Message) {
        self.xid.get_or_insert(packet.xid());
        self.record_address(reply);
    }

    fn record_address(&mut self, reply: &v4::Message) {
        let yiaddr = reply.yiaddr();
        if !yiaddr.is_unspecified() {
            self.offered = Some(yiaddr);
        }
    }

    /// Fixed timer for the current state, used when an unusable reply parks the transaction.
    fn park_duration(&self) -> Duration {
        match self.state {
            ServerState::Initial => self.config.initial_timeout,
            ServerState::Offered => self.config.offer_timeout,
            ServerState::Bound => self.config.request_timeout,
        }
    }

    fn report_failure(&self, phase: Phase, error: &StewardError) {
        match error {
            StewardError::Handler(e) => {
                tracing::warn!("Handler {:?} call failed: {}", phase, e);
            }
            other => {
                tracing::error!("Could not build {:?} reply: {}", phase, other);
            }
        }
    }

    /// Failure path for REQUEST handling in `Offered` and `Bound`: handler
    /// failures end the negotiation, unusable replies park it.
    fn request_failed(&self, error: &StewardError) -> Transition {
        self.report_failure(Phase::Request, error);
        match error {
            StewardError::Handler(_) => Transition::Terminate,
            _ => Transition::Continue(self.park_duration()),
        }
    }
}

fn lease_duration(reply: &v4::Message, request: &v4::Message) -> Duration {
    Duration::from_secs(u64::from(message::lease_time(reply, request)))
}

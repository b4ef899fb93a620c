//! Transaction lifecycle
//!
//! One [`Transaction`] exists per client negotiation. It is created when the
//! dispatcher sees a new xid, fed packets through an inbox, and dropped as soon
//! as its state machine reports [`Transition::Terminate`] or its timer fires
//! without progress.

use crate::{
    config::TransactionConfig,
    handler::Handler,
    network::Transport,
    v4::fsm::ServerState,
};
use dhcproto::v4;
use std::{net::Ipv4Addr, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};

/// Input to the state machine.
#[derive(Debug)]
pub enum Event {
    Packet(v4::Message),
    Timeout,
}

/// What the driver should do after an event has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Keep running and re-arm the timer to fire this long from now.
    Continue(Duration),
    /// Keep running with the current deadline.
    Stay,
    /// The negotiation is over.
    Terminate,
}

pub struct Transaction<H: Handler> {
    pub(crate) state: ServerState,
    pub(crate) xid: Option<u32>,
    pub(crate) last_activity: Instant,
    pub(crate) handler: Arc<H>,
    pub(crate) handler_state: H::State,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) server_id: Ipv4Addr,
    pub(crate) offered: Option<Ipv4Addr>,
    pub(crate) config: TransactionConfig,
    pub(crate) released: bool,
}

impl<H: Handler> Transaction<H> {
    pub fn new(handler: Arc<H>, transport: Arc<dyn Transport>, config: TransactionConfig) -> Self {
        let (handler_state, server_id) = handler.init();
        Self {
            state: ServerState::Initial,
            xid: None,
            last_activity: Instant::now(),
            handler,
            handler_state,
            transport,
            server_id,
            offered: None,
            config,
            released: false,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    pub fn xid(&self) -> Option<u32> {
        self.xid
    }

    pub fn server_identifier(&self) -> Ipv4Addr {
        self.server_id
    }

    pub fn offered_address(&self) -> Option<Ipv4Addr> {
        self.offered
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn handler_state(&self) -> &H::State {
        &self.handler_state
    }

    /// Drives the transaction until it terminates or `inbox` is closed.
    ///
    /// Returns the handler state when the client released its lease, so the
    /// caller can persist it. Every other ending discards it.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<v4::Message>) -> Option<H::State> {
        let mut deadline = Instant::now() + self.config.initial_timeout;

        loop {
            let event = match time::timeout_at(deadline, inbox.recv()).await {
                Ok(Some(packet)) => Event::Packet(packet),
                Ok(None) => {
                    tracing::debug!("Inbox closed in {} state", self.state_name());
                    return None;
                }
                Err(_) => Event::Timeout,
            };

            match self.handle_event(event) {
                Transition::Continue(duration) => {
                    tracing::debug!(
                        "State: {}, next timeout in {:?}",
                        self.state_name(),
                        duration
                    );
                    deadline = Instant::now() + duration;
                }
                Transition::Stay => {}
                Transition::Terminate => {
                    tracing::debug!(
                        "Transaction {:x?} terminated in {} state",
                        self.xid,
                        self.state_name()
                    );
                    return self.released.then_some(self.handler_state);
                }
            }
        }
    }
}

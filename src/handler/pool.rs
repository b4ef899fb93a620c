//! In-memory address pool policy used by the `steward` binary.

use super::{GatewayInfo, Grant, Handler, Outcome, Reply, Verdict};
use crate::{config::PoolConfig, error::HandlerError, v4::message};
use bytes::Bytes;
use dhcproto::v4;
use std::{collections::HashMap, net::Ipv4Addr, sync::Mutex, time::Duration};
use tokio::time::Instant;

/// Per-transaction view of the pool: which client and which address it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolState {
    pub client: Option<Bytes>,
    pub address: Option<Ipv4Addr>,
}

/// An address held for a client until `expires`.
#[derive(Debug, Clone, Copy)]
struct Binding {
    address: Ipv4Addr,
    expires: Instant,
}

pub struct PoolHandler {
    config: PoolConfig,
    offer_timeout: Duration,
    bindings: Mutex<HashMap<Bytes, Binding>>,
}

impl PoolHandler {
    /// `offer_timeout` is how long an unanswered offer keeps its address reserved.
    pub fn new(config: PoolConfig, offer_timeout: Duration) -> Self {
        Self {
            config,
            offer_timeout,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    fn contains(&self, addr: Ipv4Addr) -> bool {
        let value = u32::from(addr);
        value >= u32::from(self.config.pool_start) && value <= u32::from(self.config.pool_end)
    }

    fn lease_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.config.lease_time))
    }

    fn grant(&self, grant: Grant, ip: Ipv4Addr, mut base: v4::Message) -> Reply {
        base.opts_mut()
            .insert(v4::DhcpOption::AddressLeaseTime(self.config.lease_time));
        match self.config.router {
            Some(router) => Reply::Gateway {
                grant,
                ip,
                mask: self.config.subnet_mask,
                gateway: GatewayInfo::Single(router),
                base,
            },
            None => Reply::Address {
                grant,
                ip,
                mask: self.config.subnet_mask,
                base,
            },
        }
    }
}

fn prune(bindings: &mut HashMap<Bytes, Binding>, now: Instant) {
    bindings.retain(|_, binding| binding.expires > now);
}

impl Handler for PoolHandler {
    type State = PoolState;

    fn init(&self) -> (PoolState, Ipv4Addr) {
        (PoolState::default(), self.config.server_ip)
    }

    fn discover(
        &self,
        template: v4::Message,
        packet: &v4::Message,
        _state: &PoolState,
    ) -> Result<Outcome<PoolState>, HandlerError> {
        let client = Bytes::copy_from_slice(packet.chaddr());
        let now = Instant::now();
        let mut bindings = self.bindings.lock().map_err(|_| "pool lock poisoned")?;
        prune(&mut bindings, now);

        let address = match bindings.get(&client) {
            Some(binding) => binding.address,
            None => {
                let taken: Vec<Ipv4Addr> = bindings.values().map(|b| b.address).collect();
                let requested = message::requested_ip(packet)
                    .filter(|ip| self.contains(*ip) && !taken.contains(ip));
                let first_free = (u32::from(self.config.pool_start)
                    ..=u32::from(self.config.pool_end))
                    .map(Ipv4Addr::from)
                    .find(|ip| !taken.contains(ip));
                requested.or(first_free).ok_or("address pool exhausted")?
            }
        };
        let expires = match bindings.get(&client) {
            // Never shorten a lease the client already holds.
            Some(binding) => binding.expires.max(now + self.offer_timeout),
            None => now + self.offer_timeout,
        };
        bindings.insert(client.clone(), Binding { address, expires });
        tracing::debug!("Offering {} to {:02x?}", address, client.as_ref());

        let state = PoolState {
            client: Some(client),
            address: Some(address),
        };
        Ok(Outcome::Reply(state, self.grant(Grant::Offer, address, template)))
    }

    fn request(
        &self,
        template: v4::Message,
        packet: &v4::Message,
        state: &PoolState,
    ) -> Result<Outcome<PoolState>, HandlerError> {
        let selected = message::server_identifier(packet);
        if selected.is_some_and(|id| id != self.config.server_ip) {
            tracing::debug!("REQUEST addressed to server {:?}, staying silent", selected);
            return Ok(Outcome::Updated(state.clone()));
        }

        let client = Bytes::copy_from_slice(packet.chaddr());
        let requested = message::requested_ip(packet).unwrap_or_else(|| packet.ciaddr());
        let now = Instant::now();
        let mut bindings = self.bindings.lock().map_err(|_| "pool lock poisoned")?;
        prune(&mut bindings, now);

        match bindings.get_mut(&client) {
            Some(binding) if binding.address == requested => {
                binding.expires = now + self.lease_duration();
                let state = PoolState {
                    client: Some(client),
                    address: Some(requested),
                };
                Ok(Outcome::Reply(state, self.grant(Grant::Ack, requested, template)))
            }
            // A client we hold no record for that did not select us (INIT-REBOOT)
            // may be known to another server.
            None if selected.is_none() => {
                tracing::debug!("No binding for {:02x?}, staying silent", client.as_ref());
                Ok(Outcome::Updated(state.clone()))
            }
            _ => {
                tracing::info!("Refusing {} to {:02x?}", requested, client.as_ref());
                let state = PoolState {
                    client: Some(client),
                    address: None,
                };
                Ok(Outcome::Reply(
                    state,
                    Reply::Verdict {
                        verdict: Verdict::Nak,
                        base: template,
                    },
                ))
            }
        }
    }

    fn release(&self, packet: &v4::Message, _state: &PoolState) -> Result<PoolState, HandlerError> {
        let client = Bytes::copy_from_slice(packet.chaddr());
        let mut bindings = self.bindings.lock().map_err(|_| "pool lock poisoned")?;

        match bindings.get(&client) {
            Some(binding) if binding.address == packet.ciaddr() => {
                bindings.remove(&client);
                Ok(PoolState {
                    client: Some(client),
                    address: None,
                })
            }
            _ => Err(format!("{} is not leased to this client", packet.ciaddr()).into()),
        }
    }
}

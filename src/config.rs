use crate::error::StewardError;
use clap::Parser;
use std::{net::Ipv4Addr, time::Duration};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// The network interface to serve on (e.g., 'eth0', 'lo')
    #[arg(short, long)]
    pub interface: String,

    /// Address this server identifies itself with
    #[arg(long)]
    pub server_ip: Ipv4Addr,

    /// First address of the lease pool
    #[arg(long)]
    pub pool_start: Ipv4Addr,

    /// Last address of the lease pool
    #[arg(long)]
    pub pool_end: Ipv4Addr,

    #[arg(long, default_value = "255.255.255.0")]
    pub subnet_mask: Ipv4Addr,

    /// Default gateway handed out to clients
    #[arg(long)]
    pub router: Option<Ipv4Addr>,

    /// Lease duration in seconds
    #[arg(long, default_value_t = 3000)]
    pub lease_time: u32,

    /// Seconds a fresh transaction waits for its first DISCOVER or REQUEST
    #[arg(long, default_value_t = 10)]
    pub initial_timeout: u64,

    /// Seconds an offer stays open waiting for the client's REQUEST
    #[arg(long, default_value_t = 30)]
    pub offer_timeout: u64,

    /// Seconds a bound transaction stays parked after an unusable reply
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,
}

/// Timer durations applied to every transaction at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionConfig {
    pub initial_timeout: Duration,
    pub offer_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(10),
            offer_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl TransactionConfig {
    pub fn validate(&self) -> Result<(), StewardError> {
        let timers = [
            ("initial_timeout", self.initial_timeout),
            ("offer_timeout", self.offer_timeout),
            ("request_timeout", self.request_timeout),
        ];
        for (name, value) in timers {
            if value.is_zero() {
                return Err(StewardError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Address pool handed to the bundled allocation policy.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub server_ip: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub router: Option<Ipv4Addr>,
    pub lease_time: u32,
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), StewardError> {
        if u32::from(self.pool_start) > u32::from(self.pool_end) {
            return Err(StewardError::Config(format!(
                "pool_start {} is after pool_end {}",
                self.pool_start, self.pool_end
            )));
        }
        if self.lease_time == 0 {
            return Err(StewardError::Config("lease_time must be positive".to_string()));
        }
        Ok(())
    }
}

pub struct ServerConfig {
    pub interface: String,
    pub server_port: u16,
    pub transaction: TransactionConfig,
    pub pool: PoolConfig,
}

impl ServerConfig {
    pub fn from_args(args: Args) -> Result<Self, StewardError> {
        let transaction = TransactionConfig {
            initial_timeout: Duration::from_secs(args.initial_timeout),
            offer_timeout: Duration::from_secs(args.offer_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
        };
        transaction.validate()?;

        let pool = PoolConfig {
            server_ip: args.server_ip,
            pool_start: args.pool_start,
            pool_end: args.pool_end,
            subnet_mask: args.subnet_mask,
            router: args.router,
            lease_time: args.lease_time,
        };
        pool.validate()?;

        Ok(Self {
            interface: args.interface,
            server_port: 67,
            transaction,
            pool,
        })
    }
}

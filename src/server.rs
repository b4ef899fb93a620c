//! Packet dispatcher
//!
//! Receives datagrams on the server socket and routes each one to the
//! transaction that owns its xid, creating a transaction for DISCOVERs and
//! REQUESTs nobody owns yet.

use crate::{
    config::TransactionConfig,
    error::StewardError,
    handler::Handler,
    network::Transport,
    transaction::Transaction,
    v4::message,
};
use dhcproto::{v4, Decodable};
use std::{collections::HashMap, io, net::SocketAddr, sync::Arc};
use tokio::{net::UdpSocket, sync::mpsc};

const RECV_BUFFER_SIZE: usize = 1500;
const INBOX_CAPACITY: usize = 16;

pub struct Server<H: Handler> {
    socket: Arc<UdpSocket>,
    transport: Arc<dyn Transport>,
    handler: Arc<H>,
    config: TransactionConfig,
    transactions: HashMap<u32, Inbox>,
    generation: u64,
}

/// Sending half of a live transaction's inbox. `generation` tells a finished
/// transaction apart from a newer one that reused its xid.
struct Inbox {
    generation: u64,
    sender: mpsc::Sender<v4::Message>,
}

type Done = mpsc::UnboundedSender<(u32, u64)>;

impl<H: Handler> Server<H> {
    pub fn new(socket: UdpSocket, handler: Arc<H>, config: TransactionConfig) -> Self {
        let socket = Arc::new(socket);
        Self {
            transport: socket.clone(),
            socket,
            handler,
            config,
            transactions: HashMap::new(),
            generation: 0,
        }
    }

    /// Sends replies through `transport` instead of the receiving socket.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn run(&mut self) -> Result<(), StewardError> {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        tracing::info!("DHCP server ready and listening");

        loop {
            tokio::select! {
                Some((xid, generation)) = done_rx.recv() => self.finish(xid, generation),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, source)) => self.dispatch(&buf[..len], source, &done_tx).await,
                    Err(e) => tracing::warn!("Socket receive error: {}", e),
                },
            }
        }
    }

    /// Forgets a finished transaction unless a newer one already took over its xid.
    fn finish(&mut self, xid: u32, generation: u64) {
        if self
            .transactions
            .get(&xid)
            .is_some_and(|inbox| inbox.generation == generation)
        {
            self.transactions.remove(&xid);
        }
        tracing::debug!("Transaction {:x} finished, {} live", xid, self.transactions.len());
    }

    async fn dispatch(
        &mut self,
        data: &[u8],
        source: SocketAddr,
        done_tx: &Done,
    ) {
        let msg = match v4::Message::decode(&mut v4::Decoder::new(data)) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Dropping undecodable packet from {}: {}", source, e);
                return;
            }
        };

        if msg.opcode() != v4::Opcode::BootRequest {
            tracing::debug!("Dropping non-request packet from {}", source);
            return;
        }

        let msg = match self.transactions.get(&msg.xid()) {
            Some(inbox) => match inbox.sender.send(msg).await {
                Ok(()) => return,
                // Ended before its completion notice was processed.
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        self.start(msg, done_tx).await;
    }

    async fn start(&mut self, msg: v4::Message, done_tx: &Done) {
        match message::message_type(&msg) {
            Some(v4::MessageType::Discover) | Some(v4::MessageType::Request) => {}
            other => {
                tracing::debug!("No transaction for XID={:x}, dropping {:?}", msg.xid(), other);
                return;
            }
        }

        let xid = msg.xid();
        self.generation += 1;
        let generation = self.generation;
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let transaction = Transaction::new(self.handler.clone(), self.transport.clone(), self.config);
        let done = done_tx.clone();

        tokio::spawn(async move {
            if transaction.run(inbox_rx).await.is_some() {
                tracing::info!("Transaction {:x} released its lease", xid);
            }
            let _ = done.send((xid, generation));
        });

        if inbox_tx.send(msg).await.is_ok() {
            self.transactions.insert(
                xid,
                Inbox {
                    generation,
                    sender: inbox_tx,
                },
            );
            tracing::debug!("Started transaction {:x}", xid);
        }
    }
}

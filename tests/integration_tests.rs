use bytes::Bytes;
use clap::Parser;
use dhcproto::{v4, Decodable, Decoder};
use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};
use steward::{
    config::PoolConfig, handler::pool::PoolState, Args, Event, PoolHandler, ServerConfig,
    ServerState, Transaction, TransactionConfig, Transition, Transport,
};
use tokio::{sync::mpsc, time::Instant};
use tokio_test::{assert_err, assert_ok};

const SERVER_ID: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const FIRST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);
const MAC: [u8; 6] = [0x00, 0x0c, 0x29, 0xa8, 0x92, 0xf4];

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(Bytes, SocketAddr)>>,
}

impl RecordingTransport {
    fn messages(&self) -> Vec<(v4::Message, SocketAddr)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(bytes, addr)| (v4::Message::decode(&mut Decoder::new(bytes)).unwrap(), *addr))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, payload: Bytes, dest: SocketAddr) -> io::Result<()> {
        self.sent.lock().unwrap().push((payload, dest));
        Ok(())
    }
}

fn pool_config() -> PoolConfig {
    PoolConfig {
        server_ip: SERVER_ID,
        pool_start: FIRST,
        pool_end: Ipv4Addr::new(192, 168, 1, 110),
        subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
        router: Some(SERVER_ID),
        lease_time: 600,
    }
}

fn pool_handler(config: PoolConfig) -> Arc<PoolHandler> {
    Arc::new(PoolHandler::new(config, TransactionConfig::default().offer_timeout))
}

fn single_address_pool() -> Arc<PoolHandler> {
    pool_handler(PoolConfig {
        pool_end: FIRST,
        ..pool_config()
    })
}

fn transaction_on(
    handler: &Arc<PoolHandler>,
) -> (Transaction<PoolHandler>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let txn = Transaction::new(
        handler.clone(),
        transport.clone(),
        TransactionConfig::default(),
    );
    (txn, transport)
}

fn transaction() -> (Transaction<PoolHandler>, Arc<RecordingTransport>) {
    transaction_on(&pool_handler(pool_config()))
}

fn client_packet(xid: u32, kind: v4::MessageType) -> v4::Message {
    packet_from(&MAC, xid, kind)
}

fn packet_from(mac: &[u8], xid: u32, kind: v4::MessageType) -> v4::Message {
    let mut msg = v4::Message::default();
    msg.set_opcode(v4::Opcode::BootRequest)
        .set_chaddr(mac)
        .set_htype(v4::HType::Eth)
        .set_xid(xid);
    msg.opts_mut().insert(v4::DhcpOption::MessageType(kind));
    msg
}

fn request(xid: u32, requested: Ipv4Addr) -> v4::Message {
    let mut msg = client_packet(xid, v4::MessageType::Request);
    msg.opts_mut()
        .insert(v4::DhcpOption::ServerIdentifier(SERVER_ID));
    msg.opts_mut()
        .insert(v4::DhcpOption::RequestedIpAddress(requested));
    msg
}

#[tokio::test(start_paused = true)]
async fn test_initial_timeout_terminates_without_sending() {
    let (txn, transport) = transaction();
    let (_inbox_tx, inbox_rx) = mpsc::channel(4);
    let start = Instant::now();

    let released = txn.run(inbox_rx).await;

    assert!(released.is_none());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    assert!(transport.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_full_negotiation_and_release() {
    let (txn, transport) = transaction();
    let (inbox_tx, inbox_rx) = mpsc::channel(4);
    let task = tokio::spawn(txn.run(inbox_rx));

    inbox_tx
        .send(client_packet(7, v4::MessageType::Discover))
        .await
        .unwrap();
    inbox_tx.send(request(7, FIRST)).await.unwrap();
    let mut release = client_packet(7, v4::MessageType::Release);
    release.set_ciaddr(FIRST);
    inbox_tx.send(release).await.unwrap();

    let released = task.await.unwrap();
    assert_eq!(
        released,
        Some(PoolState {
            client: Some(Bytes::copy_from_slice(&MAC)),
            address: None,
        })
    );

    let sent = transport.messages();
    assert_eq!(sent.len(), 2);

    let (offer, dest) = &sent[0];
    assert_eq!(offer.opts().msg_type(), Some(v4::MessageType::Offer));
    assert_eq!(offer.opcode(), v4::Opcode::BootReply);
    assert_eq!(offer.xid(), 7);
    assert_eq!(offer.yiaddr(), FIRST);
    assert_eq!(dest.ip(), Ipv4Addr::BROADCAST);
    assert_eq!(dest.port(), 68);

    let (ack, _) = &sent[1];
    assert_eq!(ack.opts().msg_type(), Some(v4::MessageType::Ack));
    assert_eq!(ack.yiaddr(), FIRST);
    assert!(matches!(
        ack.opts().get(v4::OptionCode::ServerIdentifier),
        Some(v4::DhcpOption::ServerIdentifier(ip)) if *ip == SERVER_ID
    ));
    assert!(matches!(
        ack.opts().get(v4::OptionCode::AddressLeaseTime),
        Some(v4::DhcpOption::AddressLeaseTime(600))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_bound_lease_expires_after_granted_duration() {
    let (txn, _transport) = transaction();
    let (inbox_tx, inbox_rx) = mpsc::channel(4);
    let start = Instant::now();
    let task = tokio::spawn(txn.run(inbox_rx));

    inbox_tx
        .send(client_packet(9, v4::MessageType::Discover))
        .await
        .unwrap();
    inbox_tx.send(request(9, FIRST)).await.unwrap();

    assert!(task.await.unwrap().is_none());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(600) && elapsed < Duration::from_secs(601));
    drop(inbox_tx);
}

#[tokio::test(start_paused = true)]
async fn test_renewal_unicasts_to_client_address() {
    let (txn, transport) = transaction();
    let (inbox_tx, inbox_rx) = mpsc::channel(4);
    let task = tokio::spawn(txn.run(inbox_rx));

    inbox_tx
        .send(client_packet(3, v4::MessageType::Discover))
        .await
        .unwrap();
    inbox_tx.send(request(3, FIRST)).await.unwrap();
    let mut renew = request(3, FIRST);
    renew.set_ciaddr(FIRST);
    inbox_tx.send(renew).await.unwrap();
    drop(inbox_tx);

    assert!(task.await.unwrap().is_none());
    let sent = transport.messages();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].1, SocketAddr::from((FIRST, 68)));
}

#[tokio::test(start_paused = true)]
async fn test_offer_for_another_server_ends_transaction() {
    let (txn, transport) = transaction();
    let (inbox_tx, inbox_rx) = mpsc::channel(4);
    let start = Instant::now();
    let task = tokio::spawn(txn.run(inbox_rx));

    inbox_tx
        .send(client_packet(5, v4::MessageType::Discover))
        .await
        .unwrap();
    let mut elsewhere = request(5, FIRST);
    elsewhere
        .opts_mut()
        .insert(v4::DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 1, 2)));
    inbox_tx.send(elsewhere).await.unwrap();

    assert!(task.await.unwrap().is_none());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_for_another_server_gets_no_answer() {
    let (mut txn, transport) = transaction_on(&single_address_pool());
    let mut elsewhere = request(11, Ipv4Addr::new(192, 168, 1, 50));
    elsewhere
        .opts_mut()
        .insert(v4::DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 1, 2)));

    let transition = txn.handle_event(Event::Packet(elsewhere));

    assert_eq!(
        transition,
        Transition::Continue(TransactionConfig::default().initial_timeout)
    );
    assert_eq!(txn.state(), ServerState::Initial);
    assert!(transport.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_expired_offer_returns_address_to_pool() {
    let handler = single_address_pool();

    let (first, first_transport) = transaction_on(&handler);
    let (first_tx, first_rx) = mpsc::channel(4);
    let task = tokio::spawn(first.run(first_rx));
    first_tx
        .send(client_packet(21, v4::MessageType::Discover))
        .await
        .unwrap();
    assert!(task.await.unwrap().is_none());
    assert_eq!(first_transport.messages().len(), 1);

    let (mut second, second_transport) = transaction_on(&handler);
    let other_mac = [0x00, 0x0c, 0x29, 0x00, 0x00, 0x02];
    let transition = second.handle_event(Event::Packet(packet_from(
        &other_mac,
        22,
        v4::MessageType::Discover,
    )));

    assert_eq!(
        transition,
        Transition::Continue(TransactionConfig::default().offer_timeout)
    );
    let sent = second_transport.messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.yiaddr(), FIRST);
    drop(first_tx);
}

#[test]
fn test_transaction_config_validation() {
    assert_ok!(TransactionConfig::default().validate());

    let config = TransactionConfig {
        offer_timeout: Duration::ZERO,
        ..TransactionConfig::default()
    };
    assert_err!(config.validate());
}

#[test]
fn test_server_config_from_args() {
    let args = Args::try_parse_from([
        "steward",
        "--interface",
        "eth0",
        "--server-ip",
        "192.168.1.1",
        "--pool-start",
        "192.168.1.100",
        "--pool-end",
        "192.168.1.110",
        "--offer-timeout",
        "15",
    ])
    .unwrap();
    let config = ServerConfig::from_args(args).unwrap();

    assert_eq!(config.interface, "eth0");
    assert_eq!(config.server_port, 67);
    assert_eq!(config.transaction.initial_timeout, Duration::from_secs(10));
    assert_eq!(config.transaction.offer_timeout, Duration::from_secs(15));
    assert_eq!(config.pool.lease_time, 3000);
    assert_eq!(config.pool.router, None);
}

#[test]
fn test_server_config_rejects_inverted_pool() {
    let args = Args::try_parse_from([
        "steward",
        "-i",
        "eth0",
        "--server-ip",
        "192.168.1.1",
        "--pool-start",
        "192.168.1.200",
        "--pool-end",
        "192.168.1.100",
    ])
    .unwrap();
    assert!(ServerConfig::from_args(args).is_err());
}

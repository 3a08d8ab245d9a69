//! UDP endpoint: socket reader, per-peer fan-in, outgoing sender
//!
//! One socket serves every peer. The reader task keys sessions by remote
//! address and pushes raw datagram bytes into the matching byte pipe; the
//! sender task drains the shared outgoing queue, stamps sequence numbers,
//! and fragments anything larger than a datagram into multipart frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::game::constants::net as net_consts;
use crate::net::client::{self, ClientHandle};
use crate::net::framing::FRAME_LEN;
use crate::net::manager::{self, ManagerMessage};
use crate::net::protocol::{Multipart, NetMessage, Packet};

/// Bytes of multipart body overhead: id, group_id, num_parts, content
/// length prefix.
const MULTIPART_OVERHEAD: usize = 2 + 4 + 2 + 4;

/// A message queued for one peer. The sender stamps `seq` at transmission.
#[derive(Debug)]
pub struct OutgoingMessage {
    pub dest: Arc<ClientHandle>,
    pub packet: Packet,
}

/// Splits a packed packet into multipart frames that each fit in
/// `max_packet` bytes once framed.
pub fn split_for_wire(packed: &[u8], group_id: u32, max_packet: usize) -> Vec<Multipart> {
    let max_body = max_packet - FRAME_LEN - MULTIPART_OVERHEAD;
    let num_parts = packed.len().div_ceil(max_body);
    let mut parts = Vec::with_capacity(num_parts);
    for (i, chunk) in packed.chunks(max_body).enumerate() {
        parts.push(Multipart {
            id: i as u16,
            group_id,
            num_parts: num_parts as u16,
            content: chunk.to_vec(),
        });
    }
    parts
}

/// The UDP server: owns the socket and the peer table.
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Server> {
        let addr = SocketAddr::new(config.bind_address, config.port);
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("listening on udp {}", socket.local_addr()?);
        Ok(Server { socket, config })
    }

    /// Runs the socket reader until shutdown. Spawns the outgoing sender,
    /// the game manager, and two tasks per connecting peer.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
        let (to_network, outgoing_rx) = mpsc::channel::<OutgoingMessage>(1024);
        let (to_manager, manager_rx) = mpsc::channel::<ManagerMessage>(1024);
        let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<SocketAddr>(512);

        let sender = tokio::spawn(run_sender(
            self.socket.clone(),
            outgoing_rx,
            self.config.max_packet,
        ));
        let manager = tokio::spawn(manager::run_manager(
            manager_rx,
            to_network.clone(),
            shutdown.clone(),
            self.config.seed,
        ));

        let mut shutdown_rx = shutdown.subscribe();
        let mut clients: HashMap<SocketAddr, Arc<ClientHandle>> = HashMap::new();
        let mut next_client_id: u32 = 0;
        let mut buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("socket reader shutting down");
                    break;
                }
                Some(addr) = disconnect_rx.recv() => {
                    if let Some(client) = clients.remove(&addr) {
                        client.pipe.close();
                        debug!(client = client.id, %addr, "connection dropped");
                    }
                }
                read = timeout(
                    Duration::from_secs(net_consts::READ_DEADLINE_SECS),
                    self.socket.recv_from(&mut buf),
                ) => {
                    match read {
                        Err(_) => {} // deadline lapsed; loop to observe shutdown
                        Ok(Err(e)) => {
                            error!("socket read failed: {}", e);
                        }
                        Ok(Ok((0, addr))) => {
                            if let Some(client) = clients.remove(&addr) {
                                client.pipe.close();
                            }
                        }
                        Ok(Ok((n, addr))) => {
                            let client = match clients.get(&addr) {
                                Some(client) => client.clone(),
                                None => {
                                    next_client_id += 1;
                                    let (handle, control_rx) =
                                        ClientHandle::new(next_client_id, addr);
                                    let client = Arc::new(handle);
                                    info!(client = client.id, %addr, "new connection");
                                    tokio::spawn(client::run_parser(
                                        client.clone(),
                                        to_manager.clone(),
                                        to_network.clone(),
                                        disconnect_tx.clone(),
                                    ));
                                    tokio::spawn(client::run_control(
                                        client.clone(),
                                        control_rx,
                                        to_network.clone(),
                                    ));
                                    clients.insert(addr, client.clone());
                                    client
                                }
                            };
                            if client.pipe.write(&buf[..n]).await == 0 {
                                clients.remove(&addr);
                            }
                        }
                    }
                }
            }
        }

        // Close every pipe so parsers unwind, then wait for the manager to
        // collect its sessions.
        for client in clients.values() {
            client.pipe.close();
        }
        drop(to_manager);
        let _ = manager.await;
        sender.abort();
        Ok(())
    }
}

/// Outgoing sender: serializes, stamps sequence numbers, fragments large
/// payloads, and writes datagrams. Write errors are logged and skipped; the
/// liveness timer handles peers that are truly gone.
async fn run_sender(
    socket: Arc<UdpSocket>,
    mut outgoing: mpsc::Receiver<OutgoingMessage>,
    max_packet: usize,
) {
    while let Some(out) = outgoing.recv().await {
        let dest = out.dest;
        // Pack with a placeholder seq to learn the size; a sequence number
        // is only consumed per datagram actually sent.
        let mut packed = out.packet.pack(0);
        if packed.len() <= max_packet {
            let seq = dest.next_seq();
            packed[2..4].copy_from_slice(&seq.to_le_bytes());
            if let Err(e) = socket.send_to(&packed, dest.addr).await {
                warn!(client = dest.id, "send failed: {}", e);
            }
            continue;
        }

        // The inner frame carries the same seq as the first fragment.
        let group_id = dest.next_group();
        let first_seq = dest.next_seq();
        packed[2..4].copy_from_slice(&first_seq.to_le_bytes());
        for (i, part) in split_for_wire(&packed, group_id, max_packet)
            .into_iter()
            .enumerate()
        {
            let seq = if i == 0 { first_seq } else { dest.next_seq() };
            let bytes = Packet::new(NetMessage::Multipart(part)).pack(seq);
            if let Err(e) = socket.send_to(&bytes, dest.addr).await {
                warn!(client = dest.id, "send failed: {}", e);
            }
        }
    }
}

//! Per-peer client session: frame parser, multipart reassembly, liveness
//!
//! Each connected peer gets two tasks. The parser task blocks on the
//! client's byte pipe, scans frames, and dispatches them; the control task
//! owns the heartbeat cadence, the silence timeout, and the "you joined a
//! game" notification from the manager. The handle they share carries only
//! single-writer atomics.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::constants::net as net_consts;
use crate::game::session::GameCommand;
use crate::net::byte_pipe::BytePipe;
use crate::net::framing::Frame;
use crate::net::manager::ManagerMessage;
use crate::net::protocol::{next_packet, Heartbeat, Multipart, NetMessage, Packet, PacketScan};
use crate::net::server::OutgoingMessage;

/// Notifications from the manager to a client's control task.
#[derive(Debug)]
pub enum ClientControl {
    JoinedGame {
        game_id: u32,
        to_game: mpsc::Sender<GameCommand>,
    },
}

#[derive(Debug)]
struct ActiveGame {
    game_id: u32,
    to_game: mpsc::Sender<GameCommand>,
}

/// Shared per-peer state.
///
/// The sequence and group counters are touched only by the outgoing sender;
/// `last_rx` only by the parser; `smoothed_ping` is written by the parser
/// and read by anyone.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: u32,
    pub addr: SocketAddr,
    pub pipe: BytePipe,
    from_manager: mpsc::Sender<ClientControl>,
    active_game: Mutex<Option<ActiveGame>>,
    outgoing_seq: AtomicU16,
    multipart_group: AtomicU32,
    last_rx_ms: AtomicI64,
    smoothed_ping_ms: AtomicI64,
}

impl ClientHandle {
    pub fn new(id: u32, addr: SocketAddr) -> (Self, mpsc::Receiver<ClientControl>) {
        let (from_manager, control_rx) = mpsc::channel(16);
        let handle = Self {
            id,
            addr,
            pipe: BytePipe::new(net_consts::PIPE_CAPACITY),
            from_manager,
            active_game: Mutex::new(None),
            outgoing_seq: AtomicU16::new(0),
            multipart_group: AtomicU32::new(0),
            last_rx_ms: AtomicI64::new(unix_millis()),
            smoothed_ping_ms: AtomicI64::new(0),
        };
        (handle, control_rx)
    }

    /// Sender for manager-to-client notifications.
    pub fn control_sender(&self) -> mpsc::Sender<ClientControl> {
        self.from_manager.clone()
    }

    /// Next outgoing sequence number; wraps at u16.
    pub fn next_seq(&self) -> u16 {
        self.outgoing_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Next multipart group id for this client.
    pub fn next_group(&self) -> u32 {
        self.multipart_group.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn smoothed_ping_ms(&self) -> i64 {
        self.smoothed_ping_ms.load(Ordering::Relaxed)
    }

    fn touch_rx(&self) {
        self.last_rx_ms.store(unix_millis(), Ordering::Relaxed);
    }

    fn millis_since_rx(&self) -> i64 {
        unix_millis() - self.last_rx_ms.load(Ordering::Relaxed)
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Running mean over the last few one-way ping samples.
struct PingWindow {
    samples: [i64; net_consts::PING_SAMPLES],
    count: usize,
    next: usize,
}

impl PingWindow {
    fn new() -> Self {
        Self {
            samples: [0; net_consts::PING_SAMPLES],
            count: 0,
            next: 0,
        }
    }

    fn push(&mut self, sample: i64) -> i64 {
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % self.samples.len();
        self.count = (self.count + 1).min(self.samples.len());
        self.samples[..self.count].iter().sum::<i64>() / self.count as i64
    }
}

/// Accumulator for one multipart group.
struct MultipartGroup {
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl MultipartGroup {
    fn new(num_parts: u16) -> Self {
        Self {
            parts: vec![None; num_parts as usize],
            received: 0,
        }
    }

    /// Stores one part. False means the part contradicts the group (bad
    /// index or changed part count) and the whole group must be dropped.
    fn insert(&mut self, part: Multipart) -> bool {
        if part.num_parts as usize != self.parts.len() || part.id as usize >= self.parts.len() {
            return false;
        }
        let slot = &mut self.parts[part.id as usize];
        if slot.is_none() {
            self.received += 1;
        }
        *slot = Some(part.content);
        true
    }

    fn is_complete(&self) -> bool {
        self.received == self.parts.len()
    }

    fn assemble(self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in self.parts.into_iter().flatten() {
            out.extend_from_slice(&part);
        }
        out
    }
}

/// Feeds one multipart frame into the per-group accumulators. Returns the
/// reassembled inner message once a group completes; a malformed group is
/// dropped whole.
fn accumulate_multipart(
    groups: &mut HashMap<u32, MultipartGroup>,
    part: Multipart,
    client_id: u32,
) -> Option<NetMessage> {
    let group_id = part.group_id;
    let group = groups
        .entry(group_id)
        .or_insert_with(|| MultipartGroup::new(part.num_parts));
    if !group.insert(part) {
        warn!(client = client_id, group = group_id, "dropping inconsistent multipart group");
        groups.remove(&group_id);
        return None;
    }
    if !group.is_complete() {
        return None;
    }
    let bytes = match groups.remove(&group_id) {
        Some(group) => group.assemble(),
        None => return None,
    };
    match next_packet(&bytes) {
        PacketScan::Complete { packet, .. } if !matches!(packet.msg, NetMessage::Multipart(_)) => {
            Some(packet.msg)
        }
        _ => {
            warn!(client = client_id, group = group_id, "dropping unparseable multipart group");
            None
        }
    }
}

/// Parser task: reads the byte pipe, scans frames, and routes messages
/// until the pipe closes or the peer says goodbye.
pub async fn run_parser(
    client: Arc<ClientHandle>,
    to_manager: mpsc::Sender<ManagerMessage>,
    to_network: mpsc::Sender<OutgoingMessage>,
    disconnected: mpsc::Sender<SocketAddr>,
) {
    let _ = to_manager
        .send(ManagerMessage::Connected {
            client: client.clone(),
        })
        .await;

    let mut buf = vec![0u8; 4096];
    let mut filled = 0usize;
    let mut groups: HashMap<u32, MultipartGroup> = HashMap::new();
    let mut pings = PingWindow::new();

    'parse: loop {
        // A frame header may announce a body larger than the buffer.
        if let Some(frame) = Frame::parse(&buf[..filled]) {
            let needed = frame.packet_len();
            if needed > buf.len() {
                buf.resize(needed.next_power_of_two(), 0);
            }
        }

        match next_packet(&buf[..filled]) {
            PacketScan::Incomplete => {
                if filled == buf.len() {
                    buf.resize(buf.len() * 2, 0);
                }
                let n = client.pipe.read(&mut buf[filled..]).await;
                if n == 0 {
                    break 'parse;
                }
                filled += n;
                client.touch_rx();
            }
            PacketScan::Invalid { consumed, error } => {
                warn!(client = client.id, %error, "dropping undecodable packet");
                buf.copy_within(consumed..filled, 0);
                filled -= consumed;
            }
            PacketScan::Complete { packet, consumed } => {
                buf.copy_within(consumed..filled, 0);
                filled -= consumed;

                let msg = match packet.msg {
                    NetMessage::Multipart(part) => {
                        match accumulate_multipart(&mut groups, part, client.id) {
                            Some(inner) => inner,
                            None => continue,
                        }
                    }
                    other => other,
                };
                if matches!(msg, NetMessage::Disconnected) {
                    break 'parse;
                }
                dispatch(&client, msg, &to_manager, &to_network, &mut pings).await;
            }
        }
    }

    info!(client = client.id, "client parser shut down");
    let _ = to_manager
        .send(ManagerMessage::Disconnected {
            client: client.clone(),
        })
        .await;
    let _ = disconnected.send(client.addr).await;
}

async fn dispatch(
    client: &Arc<ClientHandle>,
    msg: NetMessage,
    to_manager: &mpsc::Sender<ManagerMessage>,
    to_network: &mpsc::Sender<OutgoingMessage>,
    pings: &mut PingWindow,
) {
    match msg {
        NetMessage::Heartbeat(hb) => {
            let one_way_ms = (unix_nanos() - hb.time) / 1_000_000 + 1;
            let smoothed = pings.push(one_way_ms);
            client
                .smoothed_ping_ms
                .store(smoothed, Ordering::Relaxed);
            let echo = NetMessage::Heartbeat(Heartbeat {
                time: hb.time,
                latency: smoothed * 1_000,
            });
            let _ = to_network
                .send(OutgoingMessage {
                    dest: client.clone(),
                    packet: Packet::new(echo),
                })
                .await;
        }
        NetMessage::CreateAcct(m) => {
            let _ = to_manager
                .send(ManagerMessage::CreateAcct {
                    client: client.clone(),
                    name: m.name,
                    password: m.password,
                })
                .await;
        }
        NetMessage::Login(m) => {
            let _ = to_manager
                .send(ManagerMessage::Login {
                    client: client.clone(),
                    name: m.name,
                    password: m.password,
                })
                .await;
        }
        NetMessage::JoinGame => {
            let _ = to_manager
                .send(ManagerMessage::JoinGame {
                    client: client.clone(),
                })
                .await;
        }
        NetMessage::TurnSnake(turn) => {
            let to_game = {
                let active = client.active_game.lock();
                active.as_ref().map(|g| g.to_game.clone())
            };
            match to_game {
                Some(to_game) => {
                    let _ = to_game
                        .send(GameCommand::Turn {
                            client_id: client.id,
                            direction: turn.direction,
                            tick_id: turn.tick_id,
                        })
                        .await;
                }
                None => {
                    warn!(client = client.id, "in-game command before joining a game");
                }
            }
        }
        other => {
            debug!(client = client.id, msg_type = other.msg_type(), "ignoring unexpected message");
        }
    }
}

/// Control task: 2 s heartbeats, 5 s silence timeout, and game hookup.
pub async fn run_control(
    client: Arc<ClientHandle>,
    mut control_rx: mpsc::Receiver<ClientControl>,
    to_network: mpsc::Sender<OutgoingMessage>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(net_consts::HEARTBEAT_SECS));
    loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Some(ClientControl::JoinedGame { game_id, to_game }) => {
                    debug!(client = client.id, game = game_id, "client joined game");
                    *client.active_game.lock() = Some(ActiveGame { game_id, to_game });
                }
                None => break,
            },
            _ = ticker.tick() => {
                let heartbeat = NetMessage::Heartbeat(Heartbeat {
                    time: unix_nanos(),
                    latency: client.smoothed_ping_ms() * 1_000,
                });
                if to_network
                    .send(OutgoingMessage {
                        dest: client.clone(),
                        packet: Packet::new(heartbeat),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                if client.millis_since_rx() >= (net_consts::SILENCE_TIMEOUT_SECS * 1000) as i64 {
                    warn!(client = client.id, "silent for too long, closing");
                    client.pipe.close();
                    break;
                }
            }
        }
    }
}

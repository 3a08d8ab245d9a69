//! Typed wire messages and their bit-exact codec
//!
//! Encodings must stay byte-compatible with deployed clients: every integer
//! is little-endian, strings and arrays carry u32 length prefixes, and the
//! message type ids are frozen. The codec is purely functional; nothing here
//! allocates beyond the produced message.

use crate::game::entity as game_entity;
use crate::game::entity::EntityKind;
use crate::net::framing::{BodyReader, BodyWriter, DecodeError, Frame, FRAME_LEN};
use crate::util::vec2;

/// Stable message type ids
pub mod msg_type {
    pub const ACK: u16 = 1;
    pub const MULTIPART: u16 = 2;
    pub const HEARTBEAT: u16 = 3;
    pub const CONNECTED: u16 = 4;
    pub const DISCONNECTED: u16 = 5;
    pub const CREATE_ACCT: u16 = 6;
    pub const CREATE_ACCT_RESP: u16 = 7;
    pub const LOGIN: u16 = 8;
    pub const LOGIN_RESP: u16 = 9;
    pub const JOIN_GAME: u16 = 10;
    pub const GAME_CONNECTED: u16 = 11;
    pub const GAME_MASTER_FRAME: u16 = 12;
    pub const ENTITY: u16 = 13;
    pub const SNAKE: u16 = 14;
    pub const TURN_SNAKE: u16 = 15;
    pub const REMOVE_ENTITY: u16 = 16;
    pub const UPDATE_ENTITY: u16 = 17;
    pub const SNAKE_DIED: u16 = 18;
    pub const VECT2: u16 = 19;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vect2 {
    pub x: i32,
    pub y: i32,
}

impl Vect2 {
    fn write(&self, w: &mut BodyWriter) {
        w.write_i32(self.x);
        w.write_i32(self.y);
    }

    fn read(r: &mut BodyReader) -> Result<Self, DecodeError> {
        Ok(Self {
            x: r.read_i32()?,
            y: r.read_i32()?,
        })
    }
}

impl From<vec2::Vec2> for Vect2 {
    fn from(v: vec2::Vec2) -> Self {
        Self { x: v.x, y: v.y }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multipart {
    pub id: u16,
    pub group_id: u32,
    pub num_parts: u16,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Sender clock in nanoseconds since the Unix epoch
    pub time: i64,
    /// Sender's smoothed one-way latency in microseconds
    pub latency: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAcct {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAcctResp {
    pub account_id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResp {
    pub success: u8,
    pub name: String,
    pub account_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: u32,
    pub etype: u16,
    pub x: i32,
    pub y: i32,
    pub size: i32,
    pub facing: Vect2,
}

impl Entity {
    pub fn from_game(e: &game_entity::Entity) -> Self {
        Self {
            id: e.id,
            etype: e.kind.as_u16(),
            x: e.pos.x,
            y: e.pos.y,
            size: e.size,
            facing: e.facing.into(),
        }
    }

    fn write(&self, w: &mut BodyWriter) {
        w.write_u32(self.id);
        w.write_u16(self.etype);
        w.write_i32(self.x);
        w.write_i32(self.y);
        w.write_i32(self.size);
        self.facing.write(w);
    }

    fn read(r: &mut BodyReader) -> Result<Self, DecodeError> {
        let id = r.read_u32()?;
        let etype = r.read_u16()?;
        if EntityKind::from_u16(etype).is_none() {
            return Err(DecodeError::InvalidEntityKind(etype));
        }
        Ok(Self {
            id,
            etype,
            x: r.read_i32()?,
            y: r.read_i32()?,
            size: r.read_i32()?,
            facing: Vect2::read(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snake {
    pub id: u32,
    pub name: String,
    pub segments: Vec<u32>,
    pub speed: i32,
    pub turning: i16,
}

impl Snake {
    pub fn from_game(s: &game_entity::Snake, head: &game_entity::Entity) -> Self {
        Self {
            id: s.id,
            name: head.name.clone(),
            segments: s.segments.clone(),
            speed: s.speed,
            turning: s.turning,
        }
    }

    fn write(&self, w: &mut BodyWriter) {
        w.write_u32(self.id);
        w.write_string(&self.name);
        w.write_u32(self.segments.len() as u32);
        for seg in &self.segments {
            w.write_u32(*seg);
        }
        w.write_i32(self.speed);
        w.write_i16(self.turning);
    }

    fn read(r: &mut BodyReader) -> Result<Self, DecodeError> {
        let id = r.read_u32()?;
        let name = r.read_string()?;
        let count = r.read_u32()?;
        if count as usize > r.remaining() / 4 {
            return Err(DecodeError::LengthOverrun(count));
        }
        let mut segments = Vec::with_capacity(count as usize);
        for _ in 0..count {
            segments.push(r.read_u32()?);
        }
        Ok(Self {
            id,
            name,
            segments,
            speed: r.read_i32()?,
            turning: r.read_i16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSnake {
    pub id: u32,
    /// -1 left, 0 straight, +1 right
    pub direction: i16,
    /// Tick at which the turn takes effect
    pub tick_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameConnected {
    pub id: u32,
    pub snake_id: u32,
    pub tick_id: u32,
    pub entities: Vec<Entity>,
    pub snakes: Vec<Snake>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMasterFrame {
    pub id: u32,
    pub entities: Vec<Entity>,
    pub snakes: Vec<Snake>,
    pub tick: u32,
}

/// A decoded wire message
#[derive(Debug, Clone, PartialEq)]
pub enum NetMessage {
    Ack,
    Multipart(Multipart),
    Heartbeat(Heartbeat),
    Connected,
    Disconnected,
    CreateAcct(CreateAcct),
    CreateAcctResp(CreateAcctResp),
    Login(Login),
    LoginResp(LoginResp),
    JoinGame,
    GameConnected(GameConnected),
    GameMasterFrame(GameMasterFrame),
    Entity(Entity),
    Snake(Snake),
    TurnSnake(TurnSnake),
    RemoveEntity { id: u32 },
    UpdateEntity(Entity),
    SnakeDied { id: u32 },
    Vect2(Vect2),
}

impl NetMessage {
    pub fn msg_type(&self) -> u16 {
        match self {
            NetMessage::Ack => msg_type::ACK,
            NetMessage::Multipart(_) => msg_type::MULTIPART,
            NetMessage::Heartbeat(_) => msg_type::HEARTBEAT,
            NetMessage::Connected => msg_type::CONNECTED,
            NetMessage::Disconnected => msg_type::DISCONNECTED,
            NetMessage::CreateAcct(_) => msg_type::CREATE_ACCT,
            NetMessage::CreateAcctResp(_) => msg_type::CREATE_ACCT_RESP,
            NetMessage::Login(_) => msg_type::LOGIN,
            NetMessage::LoginResp(_) => msg_type::LOGIN_RESP,
            NetMessage::JoinGame => msg_type::JOIN_GAME,
            NetMessage::GameConnected(_) => msg_type::GAME_CONNECTED,
            NetMessage::GameMasterFrame(_) => msg_type::GAME_MASTER_FRAME,
            NetMessage::Entity(_) => msg_type::ENTITY,
            NetMessage::Snake(_) => msg_type::SNAKE,
            NetMessage::TurnSnake(_) => msg_type::TURN_SNAKE,
            NetMessage::RemoveEntity { .. } => msg_type::REMOVE_ENTITY,
            NetMessage::UpdateEntity(_) => msg_type::UPDATE_ENTITY,
            NetMessage::SnakeDied { .. } => msg_type::SNAKE_DIED,
            NetMessage::Vect2(_) => msg_type::VECT2,
        }
    }

    fn write_body(&self, w: &mut BodyWriter) {
        match self {
            NetMessage::Ack
            | NetMessage::Connected
            | NetMessage::Disconnected
            | NetMessage::JoinGame => {}
            NetMessage::Multipart(m) => {
                w.write_u16(m.id);
                w.write_u32(m.group_id);
                w.write_u16(m.num_parts);
                w.write_bytes(&m.content);
            }
            NetMessage::Heartbeat(h) => {
                w.write_i64(h.time);
                w.write_i64(h.latency);
            }
            NetMessage::CreateAcct(m) => {
                w.write_string(&m.name);
                w.write_string(&m.password);
            }
            NetMessage::CreateAcctResp(m) => {
                w.write_u32(m.account_id);
                w.write_string(&m.name);
            }
            NetMessage::Login(m) => {
                w.write_string(&m.name);
                w.write_string(&m.password);
            }
            NetMessage::LoginResp(m) => {
                w.write_u8(m.success);
                w.write_string(&m.name);
                w.write_u32(m.account_id);
            }
            NetMessage::GameConnected(m) => {
                w.write_u32(m.id);
                w.write_u32(m.snake_id);
                w.write_u32(m.tick_id);
                w.write_u32(m.entities.len() as u32);
                for e in &m.entities {
                    e.write(w);
                }
                w.write_u32(m.snakes.len() as u32);
                for s in &m.snakes {
                    s.write(w);
                }
            }
            NetMessage::GameMasterFrame(m) => {
                w.write_u32(m.id);
                w.write_u32(m.entities.len() as u32);
                for e in &m.entities {
                    e.write(w);
                }
                w.write_u32(m.snakes.len() as u32);
                for s in &m.snakes {
                    s.write(w);
                }
                w.write_u32(m.tick);
            }
            NetMessage::Entity(e) => e.write(w),
            NetMessage::Snake(s) => s.write(w),
            NetMessage::TurnSnake(m) => {
                w.write_u32(m.id);
                w.write_i16(m.direction);
                w.write_u32(m.tick_id);
            }
            NetMessage::RemoveEntity { id } => w.write_u32(*id),
            NetMessage::UpdateEntity(e) => e.write(w),
            NetMessage::SnakeDied { id } => w.write_u32(*id),
            NetMessage::Vect2(v) => v.write(w),
        }
    }

    fn read_body(msg_type: u16, body: &[u8]) -> Result<NetMessage, DecodeError> {
        let mut r = BodyReader::new(body);
        let msg = match msg_type {
            msg_type::ACK => NetMessage::Ack,
            msg_type::CONNECTED => NetMessage::Connected,
            msg_type::DISCONNECTED => NetMessage::Disconnected,
            msg_type::JOIN_GAME => NetMessage::JoinGame,
            msg_type::MULTIPART => NetMessage::Multipart(Multipart {
                id: r.read_u16()?,
                group_id: r.read_u32()?,
                num_parts: r.read_u16()?,
                content: r.read_bytes()?,
            }),
            msg_type::HEARTBEAT => NetMessage::Heartbeat(Heartbeat {
                time: r.read_i64()?,
                latency: r.read_i64()?,
            }),
            msg_type::CREATE_ACCT => NetMessage::CreateAcct(CreateAcct {
                name: r.read_string()?,
                password: r.read_string()?,
            }),
            msg_type::CREATE_ACCT_RESP => NetMessage::CreateAcctResp(CreateAcctResp {
                account_id: r.read_u32()?,
                name: r.read_string()?,
            }),
            msg_type::LOGIN => NetMessage::Login(Login {
                name: r.read_string()?,
                password: r.read_string()?,
            }),
            msg_type::LOGIN_RESP => NetMessage::LoginResp(LoginResp {
                success: r.read_u8()?,
                name: r.read_string()?,
                account_id: r.read_u32()?,
            }),
            msg_type::GAME_CONNECTED => {
                let id = r.read_u32()?;
                let snake_id = r.read_u32()?;
                let tick_id = r.read_u32()?;
                let entities = read_entities(&mut r)?;
                let snakes = read_snakes(&mut r)?;
                NetMessage::GameConnected(GameConnected {
                    id,
                    snake_id,
                    tick_id,
                    entities,
                    snakes,
                })
            }
            msg_type::GAME_MASTER_FRAME => {
                let id = r.read_u32()?;
                let entities = read_entities(&mut r)?;
                let snakes = read_snakes(&mut r)?;
                let tick = r.read_u32()?;
                NetMessage::GameMasterFrame(GameMasterFrame {
                    id,
                    entities,
                    snakes,
                    tick,
                })
            }
            msg_type::ENTITY => NetMessage::Entity(Entity::read(&mut r)?),
            msg_type::SNAKE => NetMessage::Snake(Snake::read(&mut r)?),
            msg_type::TURN_SNAKE => NetMessage::TurnSnake(TurnSnake {
                id: r.read_u32()?,
                direction: r.read_i16()?,
                tick_id: r.read_u32()?,
            }),
            msg_type::REMOVE_ENTITY => NetMessage::RemoveEntity { id: r.read_u32()? },
            msg_type::UPDATE_ENTITY => NetMessage::UpdateEntity(Entity::read(&mut r)?),
            msg_type::SNAKE_DIED => NetMessage::SnakeDied { id: r.read_u32()? },
            msg_type::VECT2 => NetMessage::Vect2(Vect2::read(&mut r)?),
            other => return Err(DecodeError::UnknownMessageType(other)),
        };
        Ok(msg)
    }
}

fn read_entities(r: &mut BodyReader) -> Result<Vec<Entity>, DecodeError> {
    let count = r.read_u32()?;
    // An entity is at least 26 bytes; a count claiming more than fits is lying.
    if count as usize > r.remaining() / 26 {
        return Err(DecodeError::LengthOverrun(count));
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(Entity::read(r)?);
    }
    Ok(out)
}

fn read_snakes(r: &mut BodyReader) -> Result<Vec<Snake>, DecodeError> {
    let count = r.read_u32()?;
    if count as usize > r.remaining() / 14 {
        return Err(DecodeError::LengthOverrun(count));
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(Snake::read(r)?);
    }
    Ok(out)
}

/// A message ready for the wire. `seq` is stamped by the outgoing sender at
/// transmission time; everything else is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub seq: u16,
    pub msg: NetMessage,
}

impl Packet {
    pub fn new(msg: NetMessage) -> Self {
        Self { seq: 0, msg }
    }

    /// Serializes frame plus body with the given sequence number.
    pub fn pack(&self, seq: u16) -> Vec<u8> {
        let mut body = Vec::new();
        self.msg.write_body(&mut BodyWriter::new(&mut body));
        let frame = Frame {
            msg_type: self.msg.msg_type(),
            seq,
            content_length: body.len() as u16,
        };
        let mut out = Vec::with_capacity(FRAME_LEN + body.len());
        frame.write(&mut out);
        out.extend_from_slice(&body);
        out
    }
}

/// Result of scanning a byte stream for the next packet
#[derive(Debug, Clone, PartialEq)]
pub enum PacketScan {
    /// Not enough bytes yet; consume nothing and read more
    Incomplete,
    /// A full packet decoded; consume `consumed` bytes
    Complete { packet: Packet, consumed: usize },
    /// A full frame whose body failed to decode; consume and drop it
    Invalid {
        consumed: usize,
        error: DecodeError,
    },
}

/// Scans the front of `buf` for one packet.
///
/// A frame with an unknown type or a malformed body consumes its full
/// extent so the stream stays aligned for the packets behind it.
pub fn next_packet(buf: &[u8]) -> PacketScan {
    let Some(frame) = Frame::parse(buf) else {
        return PacketScan::Incomplete;
    };
    let total = frame.packet_len();
    if buf.len() < total {
        return PacketScan::Incomplete;
    }
    match NetMessage::read_body(frame.msg_type, &buf[FRAME_LEN..total]) {
        Ok(msg) => PacketScan::Complete {
            packet: Packet {
                seq: frame.seq,
                msg,
            },
            consumed: total,
        },
        Err(error) => PacketScan::Invalid {
            consumed: total,
            error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u32) -> Entity {
        Entity {
            id,
            etype: 1,
            x: -5_000,
            y: 12_000,
            size: 300,
            facing: Vect2 { x: 0, y: 100 },
        }
    }

    fn snake(id: u32) -> Snake {
        Snake {
            id,
            name: "noodle".into(),
            segments: vec![id + 1, id + 2, id + 3],
            speed: 2000,
            turning: -1,
        }
    }

    fn all_messages() -> Vec<NetMessage> {
        vec![
            NetMessage::Ack,
            NetMessage::Multipart(Multipart {
                id: 2,
                group_id: 9,
                num_parts: 4,
                content: vec![1, 2, 3, 4, 5],
            }),
            NetMessage::Heartbeat(Heartbeat {
                time: 1_700_000_000_000_000_000,
                latency: 42_000,
            }),
            NetMessage::Connected,
            NetMessage::Disconnected,
            NetMessage::CreateAcct(CreateAcct {
                name: "a".into(),
                password: "p".into(),
            }),
            NetMessage::CreateAcctResp(CreateAcctResp {
                account_id: 1,
                name: "a".into(),
            }),
            NetMessage::Login(Login {
                name: "a".into(),
                password: "p".into(),
            }),
            NetMessage::LoginResp(LoginResp {
                success: 1,
                name: "a".into(),
                account_id: 1,
            }),
            NetMessage::JoinGame,
            NetMessage::GameConnected(GameConnected {
                id: 1,
                snake_id: 12,
                tick_id: 77,
                entities: vec![entity(12), entity(13)],
                snakes: vec![snake(12)],
            }),
            NetMessage::GameMasterFrame(GameMasterFrame {
                id: 1,
                entities: vec![entity(12)],
                snakes: vec![snake(12)],
                tick: 250,
            }),
            NetMessage::Entity(entity(3)),
            NetMessage::Snake(snake(8)),
            NetMessage::TurnSnake(TurnSnake {
                id: 12,
                direction: 1,
                tick_id: 80,
            }),
            NetMessage::RemoveEntity { id: 55 },
            NetMessage::UpdateEntity(entity(55)),
            NetMessage::SnakeDied { id: 12 },
            NetMessage::Vect2(Vect2 { x: -1, y: 100 }),
        ]
    }

    #[test]
    fn test_message_type_ids_are_frozen() {
        let expected: Vec<u16> = (1..=19).collect();
        let got: Vec<u16> = all_messages().iter().map(|m| m.msg_type()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_roundtrip_every_message_kind() {
        for msg in all_messages() {
            let packet = Packet::new(msg.clone());
            let bytes = packet.pack(7);
            match next_packet(&bytes) {
                PacketScan::Complete { packet: decoded, consumed } => {
                    assert_eq!(consumed, bytes.len());
                    assert_eq!(decoded.seq, 7);
                    assert_eq!(decoded.msg, msg);
                }
                other => panic!("roundtrip failed for {:?}: {:?}", msg, other),
            }
        }
    }

    #[test]
    fn test_turn_snake_wire_layout() {
        // Pin the exact bytes so codec changes that break deployed clients
        // fail loudly.
        let packet = Packet::new(NetMessage::TurnSnake(TurnSnake {
            id: 0x01020304,
            direction: -1,
            tick_id: 0x0A0B0C0D,
        }));
        let bytes = packet.pack(0x0203);
        assert_eq!(
            bytes,
            [
                15, 0, // msg_type
                0x03, 0x02, // seq
                10, 0, // content_length
                0x04, 0x03, 0x02, 0x01, // id
                0xFF, 0xFF, // direction
                0x0D, 0x0C, 0x0B, 0x0A, // tick_id
            ]
        );
    }

    #[test]
    fn test_heartbeat_wire_layout() {
        let bytes = Packet::new(NetMessage::Heartbeat(Heartbeat { time: 1, latency: 2 })).pack(0);
        assert_eq!(bytes[0..2], [3, 0]);
        assert_eq!(bytes[4..6], [16, 0]);
        assert_eq!(bytes[6..14], 1i64.to_le_bytes());
        assert_eq!(bytes[14..22], 2i64.to_le_bytes());
    }

    #[test]
    fn test_incomplete_frame() {
        let bytes = Packet::new(NetMessage::SnakeDied { id: 3 }).pack(0);
        for cut in 0..bytes.len() {
            assert_eq!(
                next_packet(&bytes[..cut]),
                PacketScan::Incomplete,
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_byte_at_a_time_stream_scan() {
        // Concatenated packets fed one byte at a time come back in order.
        let sent = vec![
            NetMessage::Heartbeat(Heartbeat { time: 5, latency: 6 }),
            NetMessage::TurnSnake(TurnSnake {
                id: 12,
                direction: 1,
                tick_id: 80,
            }),
            NetMessage::JoinGame,
            NetMessage::SnakeDied { id: 9 },
        ];
        let mut stream = Vec::new();
        for m in &sent {
            stream.extend_from_slice(&Packet::new(m.clone()).pack(1));
        }

        let mut buf = Vec::new();
        let mut received = Vec::new();
        for byte in stream {
            buf.push(byte);
            loop {
                match next_packet(&buf) {
                    PacketScan::Incomplete => break,
                    PacketScan::Complete { packet, consumed } => {
                        buf.drain(..consumed);
                        received.push(packet.msg);
                    }
                    PacketScan::Invalid { .. } => panic!("valid stream flagged invalid"),
                }
            }
        }
        assert_eq!(received, sent);
    }

    #[test]
    fn test_unknown_type_is_skipped_not_stuck() {
        let mut buf = Vec::new();
        Frame {
            msg_type: 900,
            seq: 0,
            content_length: 3,
        }
        .write(&mut buf);
        buf.extend_from_slice(&[1, 2, 3]);
        let good = Packet::new(NetMessage::Ack).pack(0);
        buf.extend_from_slice(&good);

        match next_packet(&buf) {
            PacketScan::Invalid { consumed, error } => {
                assert_eq!(consumed, 9);
                assert_eq!(error, DecodeError::UnknownMessageType(900));
                assert!(matches!(
                    next_packet(&buf[consumed..]),
                    PacketScan::Complete { .. }
                ));
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_body_is_invalid_not_panic() {
        // Frame claims a 2-byte TurnSnake body; decode fails cleanly.
        let mut buf = Vec::new();
        Frame {
            msg_type: msg_type::TURN_SNAKE,
            seq: 0,
            content_length: 2,
        }
        .write(&mut buf);
        buf.extend_from_slice(&[1, 2]);
        assert!(matches!(next_packet(&buf), PacketScan::Invalid { consumed: 8, .. }));
    }

    #[test]
    fn test_hostile_array_count_rejected() {
        let mut body = Vec::new();
        {
            let mut w = BodyWriter::new(&mut body);
            w.write_u32(1); // game id
            w.write_u32(u32::MAX); // entity count lie
        }
        let mut buf = Vec::new();
        Frame {
            msg_type: msg_type::GAME_MASTER_FRAME,
            seq: 0,
            content_length: body.len() as u16,
        }
        .write(&mut buf);
        buf.extend_from_slice(&body);
        assert!(matches!(next_packet(&buf), PacketScan::Invalid { .. }));
    }

    #[test]
    fn test_entity_rejects_unknown_kind() {
        let mut e = entity(1);
        e.etype = 9;
        let bytes = Packet::new(NetMessage::Entity(e)).pack(0);
        assert!(matches!(
            next_packet(&bytes),
            PacketScan::Invalid {
                error: DecodeError::InvalidEntityKind(9),
                ..
            }
        ));
    }
}

//! Game tuning constants
//!
//! Grouped by subsystem. Wire-visible values (tick rate, map bounds, snake
//! spawn stats) must match what deployed clients expect.

/// Simulation tick constants
pub mod tick {
    /// Server tick rate in Hz
    pub const TICKS_PER_SECOND: u32 = 50;
    /// Tick duration in milliseconds
    pub const TICK_MS: u64 = 1000 / TICKS_PER_SECOND as u64;
}

/// World map constants
pub mod map {
    /// Outer bound of the quadtree region (units from origin)
    pub const RADIUS: i32 = 1_010_000;
    /// Margin between the playable square and the tree bound, so entities
    /// sitting on the wrap seam still fit inside the tree
    pub const BORDER: i32 = 10_000;
    /// Playable bound; positions wrap toroidally at +/-INTERNAL
    pub const INTERNAL: i32 = RADIUS - BORDER;
}

/// Snake constants
pub mod snake {
    /// Starting radius of head and segments
    pub const START_SIZE: i32 = 300;
    /// Starting speed in units per second
    pub const START_SPEED: i32 = 2000;
    /// Number of body segments a fresh snake spawns with
    pub const START_SEGMENTS: u32 = 10;
    /// New snakes spawn uniformly inside +/-SPAWN_EXTENT on both axes
    pub const SPAWN_EXTENT: i32 = 5_000;
    /// Facing vectors are kept normalized to this magnitude
    pub const FACING_MAGNITUDE: i32 = 100;
    /// Radians of facing rotation applied per tick while turning
    pub const TURN_RATE: f64 = 0.06;
    /// A snake carries one segment per this many units of size
    pub const SIZE_PER_SEGMENT: i32 = 30;
}

/// Food constants
pub mod food {
    /// Ticks between food spawn batches (1 s at 50 Hz)
    pub const SPAWN_INTERVAL_TICKS: u32 = 50;
    /// Food entities per spawn batch
    pub const SPAWN_COUNT: usize = 100;
    /// Inclusive lower bound on spawned food radius
    pub const SIZE_MIN: i32 = 50;
    /// Exclusive upper bound on spawned food radius
    pub const SIZE_MAX: i32 = 300;
    /// Fraction of a dead segment's size its corpse food keeps (divisor)
    pub const CORPSE_SIZE_DIVISOR: i32 = 3;
}

/// Rollback history constants
pub mod history {
    /// A snapshot is recorded every this many ticks
    pub const SNAPSHOT_INTERVAL: u32 = 10;
    /// Number of snapshot slots in the ring
    pub const RING_CAPACITY: usize = 5;
    /// Retained rollback window in ticks
    pub const WINDOW_TICKS: u32 = SNAPSHOT_INTERVAL * RING_CAPACITY as u32;
}

/// Network constants
pub mod net {
    /// UDP port the server listens on
    pub const DEFAULT_PORT: u16 = 24816;
    /// Largest datagram the server will emit; bigger payloads are split
    /// into multipart frames
    pub const MAX_PACKET: usize = 512;
    /// Per-client inbound byte pipe capacity
    pub const PIPE_CAPACITY: usize = 32 * 1024;
    /// Socket read deadline in seconds
    pub const READ_DEADLINE_SECS: u64 = 5;
    /// Interval between server heartbeats to a client, in seconds
    pub const HEARTBEAT_SECS: u64 = 2;
    /// A client that sends nothing for this long is closed
    pub const SILENCE_TIMEOUT_SECS: u64 = 5;
    /// Ticks between authoritative master frame broadcasts (5 s at 50 Hz)
    pub const MASTER_FRAME_INTERVAL_TICKS: u32 = 250;
    /// One-way ping samples averaged into the smoothed ping
    pub const PING_SAMPLES: usize = 5;
}

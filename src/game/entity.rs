//! Game entities: snake heads, body segments, and food

use crate::game::constants::snake;
use crate::game::quadtree::BoundingBox;
use crate::util::vec2::Vec2;

/// What kind of body an entity is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Head,
    Segment,
    Food,
}

impl EntityKind {
    /// Stable wire value
    pub fn as_u16(self) -> u16 {
        match self {
            EntityKind::Head => 1,
            EntityKind::Segment => 2,
            EntityKind::Food => 3,
        }
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(EntityKind::Head),
            2 => Some(EntityKind::Segment),
            3 => Some(EntityKind::Food),
            _ => None,
        }
    }
}

/// A single circular body on the plane.
///
/// `id` is unique within a game and stable across rewinds. `container` is 0
/// for everything except segments, which point back at their snake's head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: u32,
    pub kind: EntityKind,
    pub name: String,
    pub pos: Vec2,
    pub facing: Vec2,
    pub size: i32,
    pub container: u32,
}

impl Entity {
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min_x: self.pos.x - self.size,
            max_x: self.pos.x + self.size,
            min_y: self.pos.y - self.size,
            max_y: self.pos.y + self.size,
        }
    }

    /// Exact circle-vs-circle overlap check, used after the quadtree's
    /// bounding-box pass.
    pub fn intersects(&self, other: &Entity) -> bool {
        let center_dist_sq = self.pos.distance_sq_to(other.pos);
        let size_sum = (self.size + other.size) as i64;
        center_dist_sq <= size_sum * size_sum
    }
}

/// A head entity plus its ordered body segments (index 0 nearest the head).
///
/// The snake's id equals its head entity's id; segment entities live in the
/// world's entity map and are referenced here by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snake {
    pub id: u32,
    pub segments: Vec<u32>,
    /// Units per second
    pub speed: i32,
    /// -1 left, 0 straight, +1 right
    pub turning: i16,
}

/// Builds a fresh snake: a head at `pos` facing straight up plus
/// `START_SEGMENTS` segments stacked behind it.
///
/// Entity ids are `id..=id + START_SEGMENTS`; the caller owns id allocation.
pub fn spawn_snake(id: u32, name: &str, pos: Vec2) -> (Snake, Vec<Entity>) {
    let facing = Vec2::new(0, snake::FACING_MAGNITUDE);
    let mut entities = Vec::with_capacity(1 + snake::START_SEGMENTS as usize);
    entities.push(Entity {
        id,
        kind: EntityKind::Head,
        name: name.to_owned(),
        pos,
        facing,
        size: snake::START_SIZE,
        container: 0,
    });

    let mut segments = Vec::with_capacity(snake::START_SEGMENTS as usize);
    for i in 0..snake::START_SEGMENTS {
        let seg_id = id + 1 + i;
        entities.push(Entity {
            id: seg_id,
            kind: EntityKind::Segment,
            name: String::new(),
            pos: Vec2::new(pos.x, pos.y - (snake::START_SIZE / 2) * (i as i32 + 1)),
            facing,
            size: snake::START_SIZE,
            container: id,
        });
        segments.push(seg_id);
    }

    (
        Snake {
            id,
            segments,
            speed: snake::START_SPEED,
            turning: 0,
        },
        entities,
    )
}

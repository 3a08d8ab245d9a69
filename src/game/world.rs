//! Authoritative world state and the per-tick simulation step
//!
//! The world owns every entity and snake plus the quadtree indexing them.
//! `tick()` advances movement one step and reports discovered collisions;
//! resolving them (death, growth, events) is the session's job because
//! resolution changes topology and emits network traffic.

use hashbrown::HashMap;
use thiserror::Error;

use crate::game::constants::{map, snake as snake_consts, tick};
use crate::game::entity::{Entity, EntityKind, Snake};
use crate::game::quadtree::{BoundingBox, MoveResult, QuadTree};
#[cfg(test)]
use crate::util::vec2::Vec2;

/// A world-consistency violation. These indicate a programming bug, not a
/// peer fault, and abort the owning game session.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("entity {0} missing from spatial index")]
    Detached(u32),
    #[error("entity {0} not in entity map")]
    MissingEntity(u32),
    #[error("snake {0} not in snake map")]
    MissingSnake(u32),
    #[error("entity {0} added twice")]
    DuplicateEntity(u32),
    #[error("snake {0} added twice")]
    DuplicateSnake(u32),
}

/// A bounding-box overlap between a snake's head and another entity,
/// confirmed by the exact circle test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collision {
    /// The snake whose head collided
    pub snake: u32,
    /// The entity it ran into
    pub other: u32,
}

/// All simulation state for one game.
#[derive(Debug, Clone)]
pub struct World {
    pub entities: HashMap<u32, Entity>,
    pub snakes: HashMap<u32, Snake>,
    pub tree: QuadTree,
    /// Tick the world state is at; rewinds move it backwards temporarily
    pub current_tick: u32,
    /// The authoritative present; never decreases
    pub real_tick: u32,
    /// High-water mark for entity id allocation, stable across rewinds
    pub max_id: u32,
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            snakes: HashMap::new(),
            tree: QuadTree::new(BoundingBox::new(
                -map::RADIUS,
                map::RADIUS,
                -map::RADIUS,
                map::RADIUS,
            )),
            current_tick: 0,
            real_tick: 0,
            max_id: 0,
        }
    }

    /// Simulation-state equality: maps and counters. The quadtree is derived
    /// from the entity map, so it is not compared directly.
    pub fn state_eq(&self, other: &World) -> bool {
        self.current_tick == other.current_tick
            && self.max_id == other.max_id
            && self.entities == other.entities
            && self.snakes == other.snakes
    }

    pub fn add_entity(&mut self, entity: Entity) -> Result<(), WorldError> {
        if self.entities.contains_key(&entity.id) {
            return Err(WorldError::DuplicateEntity(entity.id));
        }
        self.tree.add(entity.id, entity.bounds());
        self.entities.insert(entity.id, entity);
        Ok(())
    }

    pub fn remove_entity(&mut self, id: u32) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.tree.remove(id, entity.bounds());
        Some(entity)
    }

    /// Inserts a snake and all of its entities (head first).
    pub fn add_snake(&mut self, snake: Snake, entities: Vec<Entity>) -> Result<(), WorldError> {
        if self.snakes.contains_key(&snake.id) {
            return Err(WorldError::DuplicateSnake(snake.id));
        }
        for entity in entities {
            self.add_entity(entity)?;
        }
        self.snakes.insert(snake.id, snake);
        Ok(())
    }

    /// Removes a snake and every entity belonging to it.
    pub fn remove_snake(&mut self, id: u32) -> Option<Snake> {
        let snake = self.snakes.remove(&id)?;
        self.remove_entity(id);
        for seg_id in &snake.segments {
            self.remove_entity(*seg_id);
        }
        Some(snake)
    }

    /// Grows `snake_id` after eating: the head gains `gain` radius, every
    /// segment matches the head's new size, and segments are appended at the
    /// tail until the snake carries one per `SIZE_PER_SEGMENT` units.
    pub fn feed_snake(&mut self, snake_id: u32, gain: i32) -> Result<(), WorldError> {
        let head = self
            .entities
            .get_mut(&snake_id)
            .ok_or(WorldError::MissingEntity(snake_id))?;
        let old_bounds = head.bounds();
        head.size += gain;
        let new_size = head.size;
        let new_bounds = head.bounds();
        self.relocate_checked(snake_id, old_bounds, new_bounds)?;

        let segments = self
            .snakes
            .get(&snake_id)
            .ok_or(WorldError::MissingSnake(snake_id))?
            .segments
            .clone();
        for seg_id in &segments {
            let seg = self
                .entities
                .get_mut(seg_id)
                .ok_or(WorldError::MissingEntity(*seg_id))?;
            if seg.size == new_size {
                continue;
            }
            let old = seg.bounds();
            seg.size = new_size;
            let new = seg.bounds();
            self.relocate_checked(*seg_id, old, new)?;
        }

        // Tail extension: one segment per SIZE_PER_SEGMENT units of size.
        let mut tail_id = *segments.last().unwrap_or(&snake_id);
        let target = (new_size / snake_consts::SIZE_PER_SEGMENT).max(0) as usize;
        while self.snakes[&snake_id].segments.len() < target {
            let tail = self
                .entities
                .get(&tail_id)
                .ok_or(WorldError::MissingEntity(tail_id))?;
            let (pos, facing) = (tail.pos, tail.facing);
            let new_id = self.max_id + 1;
            self.max_id = new_id;
            self.add_entity(Entity {
                id: new_id,
                kind: EntityKind::Segment,
                name: String::new(),
                pos,
                facing,
                size: new_size,
                container: snake_id,
            })?;
            self.snakes
                .get_mut(&snake_id)
                .ok_or(WorldError::MissingSnake(snake_id))?
                .segments
                .push(new_id);
            tail_id = new_id;
        }
        Ok(())
    }

    /// Kills a snake: the head disappears and every segment turns into food
    /// of a third its size, in place. Segment ids are reused for the corpse
    /// food so replay reproduces the same world. Returns the corpse ids.
    pub fn kill_snake(&mut self, snake_id: u32) -> Result<Vec<u32>, WorldError> {
        let snake = self
            .snakes
            .remove(&snake_id)
            .ok_or(WorldError::MissingSnake(snake_id))?;
        self.remove_entity(snake_id)
            .ok_or(WorldError::MissingEntity(snake_id))?;

        let mut corpse = Vec::with_capacity(snake.segments.len());
        for seg_id in snake.segments {
            let seg = self
                .entities
                .get_mut(&seg_id)
                .ok_or(WorldError::MissingEntity(seg_id))?;
            let old = seg.bounds();
            seg.kind = EntityKind::Food;
            seg.size /= crate::game::constants::food::CORPSE_SIZE_DIVISOR;
            seg.container = 0;
            let new = seg.bounds();
            self.relocate_checked(seg_id, old, new)?;
            corpse.push(seg_id);
        }
        Ok(corpse)
    }

    /// Advances the simulation one tick and returns the collisions found.
    pub fn tick(&mut self) -> Result<Vec<Collision>, WorldError> {
        let mut snake_ids: Vec<u32> = self.snakes.keys().copied().collect();
        snake_ids.sort_unstable();

        for id in &snake_ids {
            self.move_snake(*id)?;
        }

        let collisions = self.discover_collisions(&snake_ids);
        self.current_tick += 1;
        Ok(collisions)
    }

    fn move_snake(&mut self, snake_id: u32) -> Result<(), WorldError> {
        let snake = self
            .snakes
            .get(&snake_id)
            .ok_or(WorldError::MissingSnake(snake_id))?;
        let turning = snake.turning;
        let speed = snake.speed;
        let segments = snake.segments.clone();

        let head = self
            .entities
            .get_mut(&snake_id)
            .ok_or(WorldError::MissingEntity(snake_id))?;

        // Turning rotates the facing and renormalizes it to magnitude 100.
        if turning != 0 {
            let angle = if turning == 1 {
                -snake_consts::TURN_RATE
            } else {
                snake_consts::TURN_RATE
            };
            head.facing = head
                .facing
                .rotated(angle)
                .normalized_to(snake_consts::FACING_MAGNITUDE);
        }

        // The facing vector has magnitude 100, so the per-tick step divides
        // speed by an extra factor of 100.
        let step = speed as f64 / tick::TICKS_PER_SECOND as f64 / 100.0;
        let old_bounds = head.bounds();
        let mut pos = head.pos + head.facing.scaled(step);
        pos.x = wrap_coord(pos.x);
        pos.y = wrap_coord(pos.y);
        head.pos = pos;
        let new_bounds = head.bounds();
        let head_size = head.size;
        self.relocate_checked(snake_id, old_bounds, new_bounds)?;

        // Segments trail their predecessor, staying within size/3 of it.
        let follow_dist = head_size / 3;
        let mut prev = pos;
        for seg_id in segments {
            let seg = self
                .entities
                .get_mut(&seg_id)
                .ok_or(WorldError::MissingEntity(seg_id))?;
            let delta = prev - seg.pos;
            let mag = delta.magnitude() as i32;
            if mag > follow_dist {
                let pull = delta.normalized_to(mag - follow_dist);
                let old = seg.bounds();
                seg.pos += pull;
                seg.facing = pull;
                let new = seg.bounds();
                prev = seg.pos;
                self.relocate_checked(seg_id, old, new)?;
            } else {
                seg.facing = delta;
                prev = seg.pos;
            }
        }
        Ok(())
    }

    fn relocate_checked(
        &mut self,
        id: u32,
        old: BoundingBox,
        new: BoundingBox,
    ) -> Result<(), WorldError> {
        if old == new {
            return Ok(());
        }
        match self.tree.relocate(id, old, new) {
            MoveResult::NotFound => Err(WorldError::Detached(id)),
            MoveResult::SameNode | MoveResult::Moved => Ok(()),
        }
    }

    /// Bounding-box candidates from the tree, narrowed by the exact circle
    /// test. Only snake heads collide; a head never collides with its own
    /// snake.
    fn discover_collisions(&self, snake_ids: &[u32]) -> Vec<Collision> {
        let mut collisions = Vec::new();
        for snake_id in snake_ids {
            let Some(head) = self.entities.get(snake_id) else {
                continue;
            };
            let mut candidates = self.tree.query(head.bounds());
            candidates.sort_unstable();
            for other_id in candidates {
                if other_id == *snake_id {
                    continue;
                }
                let Some(other) = self.entities.get(&other_id) else {
                    continue;
                };
                if other.kind == EntityKind::Segment && other.container == *snake_id {
                    continue;
                }
                if head.intersects(other) {
                    collisions.push(Collision {
                        snake: *snake_id,
                        other: other_id,
                    });
                }
            }
        }
        collisions
    }

    /// Entity ids in ascending order, for deterministic message building.
    pub fn entity_ids_sorted(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snake ids in ascending order.
    pub fn snake_ids_sorted(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.snakes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Toroidal wrap at the playable bound.
#[inline]
fn wrap_coord(v: i32) -> i32 {
    if v > map::INTERNAL {
        v - 2 * map::INTERNAL
    } else if v < -map::INTERNAL {
        v + 2 * map::INTERNAL
    } else {
        v
    }
}

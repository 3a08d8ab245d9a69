//! Rollback history: snapshot ring and command log
//!
//! Rollback never reverses operations. The world is restored from the
//! newest snapshot at or before the target tick and replayed forward;
//! `replay_step` is the single source of truth for "what should the world
//! look like at tick t". Every command carries all the data its
//! re-application needs, so replay never consults a clock or an RNG.

use crate::game::constants::history;
use crate::game::entity::spawn_snake;
use crate::game::world::{Collision, World, WorldError};
use crate::util::vec2::Vec2;

/// One food entity of a logged spawn batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodSpawn {
    pub id: u32,
    pub pos: Vec2,
    pub size: i32,
}

/// What a logged command does when its effect tick is replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Set the snake's turning state
    Turn { direction: i16 },
    /// Create the snake; id allocation happened at accept time
    Join { name: String, pos: Vec2 },
    /// Remove the snake
    Leave,
    /// Materialize a batch of food entities
    SpawnFood { spawns: Vec<FoodSpawn> },
}

/// An input record scheduled into the simulation timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub snake_id: u32,
    /// Tick at which the server accepted the command
    pub recv_tick: u32,
    /// Tick at which the command applies; may precede `recv_tick`
    pub effect_tick: u32,
    pub kind: CommandKind,
}

/// Fixed ring of world snapshots plus the command log covering the same
/// window.
#[derive(Debug)]
pub struct History {
    slots: Vec<Option<World>>,
    head: usize,
    commands: Vec<Command>,
}

impl History {
    pub fn new() -> Self {
        Self {
            slots: vec![None; history::RING_CAPACITY],
            head: 0,
            commands: Vec::new(),
        }
    }

    /// Appends to the command log. Log order is the tie-break for commands
    /// sharing an effect tick.
    pub fn push_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Snapshots the world if it sits on a snapshot boundary.
    ///
    /// A replay crossing a boundary it already snapshotted overwrites that
    /// slot in place instead of burning a fresh one, so corrected state
    /// supersedes stale state at the same tick.
    pub fn record_if_due(&mut self, world: &World) {
        if world.current_tick % history::SNAPSHOT_INTERVAL != 0 {
            return;
        }
        if let Some(idx) = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|w| w.current_tick == world.current_tick))
        {
            self.slots[idx] = Some(world.clone());
            return;
        }
        self.head = (self.head + 1) % self.slots.len();
        self.slots[self.head] = Some(world.clone());
    }

    /// Replaces the live world with a clone of the newest snapshot at or
    /// before `target_tick`, clamped to the oldest retained snapshot when
    /// the target is out of the window. `real_tick` survives the rewind and
    /// `max_id` never decreases, so ids handed out since the snapshot stay
    /// unique. Returns false when no snapshot exists at all.
    pub fn rewind(&mut self, world: &mut World, target_tick: u32) -> bool {
        let best = self
            .slots
            .iter()
            .flatten()
            .filter(|s| s.current_tick <= target_tick)
            .max_by_key(|s| s.current_tick)
            .or_else(|| self.slots.iter().flatten().min_by_key(|s| s.current_tick));
        let Some(snapshot) = best else {
            return false;
        };
        let mut restored = snapshot.clone();
        restored.real_tick = world.real_tick;
        restored.max_id = world.max_id.max(restored.max_id);
        *world = restored;
        true
    }

    /// Advances the world one tick: snapshot if due, apply every command
    /// scheduled for the current tick in log order, then simulate. Returns
    /// the collisions the tick discovered.
    pub fn replay_step(&mut self, world: &mut World) -> Result<Vec<Collision>, WorldError> {
        self.record_if_due(world);
        let due = world.current_tick;
        // Indices first: applying a command can push new entities but never
        // touches the log.
        let due_idx: Vec<usize> = self
            .commands
            .iter()
            .enumerate()
            .filter(|(_, c)| c.effect_tick == due)
            .map(|(i, _)| i)
            .collect();
        for idx in due_idx {
            let command = self.commands[idx].clone();
            apply_command(world, &command)?;
        }
        world.tick()
    }

    /// Drops commands that fell out of the rollback window.
    pub fn gc_commands(&mut self, real_tick: u32) {
        let horizon = real_tick.saturating_sub(history::WINDOW_TICKS);
        self.commands.retain(|c| c.effect_tick >= horizon);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Tick of the newest retained snapshot, if any.
    pub fn newest_snapshot_tick(&self) -> Option<u32> {
        self.slots.iter().flatten().map(|s| s.current_tick).max()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies one command to the world. Applications are idempotent against
/// topology (a Join of an existing snake or a Leave of a missing one is a
/// no-op) so replaying from any snapshot inside the window is well-defined.
fn apply_command(world: &mut World, command: &Command) -> Result<(), WorldError> {
    match &command.kind {
        CommandKind::Turn { direction } => {
            if let Some(snake) = world.snakes.get_mut(&command.snake_id) {
                snake.turning = *direction;
            }
        }
        CommandKind::Join { name, pos } => {
            if !world.snakes.contains_key(&command.snake_id) {
                let (snake, entities) = spawn_snake(command.snake_id, name, *pos);
                world.add_snake(snake, entities)?;
            }
        }
        CommandKind::Leave => {
            world.remove_snake(command.snake_id);
        }
        CommandKind::SpawnFood { spawns } => {
            for spawn in spawns {
                if world.entities.contains_key(&spawn.id) {
                    continue;
                }
                world.add_entity(crate::game::entity::Entity {
                    id: spawn.id,
                    kind: crate::game::entity::EntityKind::Food,
                    name: String::new(),
                    pos: spawn.pos,
                    facing: Vec2::ZERO,
                    size: spawn.size,
                    container: 0,
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::snake as snake_consts;

    fn seeded_world() -> (World, History) {
        let mut world = World::new();
        let (snake, entities) = spawn_snake(1, "a", Vec2::ZERO);
        world.max_id = 1 + snake_consts::START_SEGMENTS;
        world.add_snake(snake, entities).unwrap();
        let mut hist = History::new();
        hist.record_if_due(&world);
        (world, hist)
    }

    fn turn(snake_id: u32, recv: u32, effect: u32, direction: i16) -> Command {
        Command {
            snake_id,
            recv_tick: recv,
            effect_tick: effect,
            kind: CommandKind::Turn { direction },
        }
    }

    #[test]
    fn test_record_cadence() {
        let (mut world, mut hist) = seeded_world();
        for _ in 0..25 {
            hist.replay_step(&mut world).unwrap();
        }
        // Boundaries 0, 10 and 20 are retained.
        assert_eq!(hist.newest_snapshot_tick(), Some(20));
    }

    #[test]
    fn test_rewind_picks_newest_at_or_before_target() {
        let (mut world, mut hist) = seeded_world();
        for _ in 0..35 {
            hist.replay_step(&mut world).unwrap();
        }
        assert!(hist.rewind(&mut world, 24));
        assert_eq!(world.current_tick, 20);
        assert_eq!(world.real_tick, 0); // preserved from the live world
    }

    #[test]
    fn test_rewind_clamps_to_oldest() {
        let (mut world, mut hist) = seeded_world();
        for _ in 0..80 {
            hist.replay_step(&mut world).unwrap();
        }
        // Ring of 5 at interval 10 keeps ticks 40..=80; 5 is long gone.
        assert!(hist.rewind(&mut world, 5));
        assert!(world.current_tick >= 30);
        assert!(world.current_tick <= 40);
    }

    #[test]
    fn test_rewind_preserves_max_id() {
        let (mut world, mut hist) = seeded_world();
        for _ in 0..20 {
            hist.replay_step(&mut world).unwrap();
        }
        world.max_id = 500;
        assert!(hist.rewind(&mut world, 10));
        assert_eq!(world.max_id, 500);
    }

    #[test]
    fn test_turn_applies_at_effect_tick() {
        let (mut world, mut hist) = seeded_world();
        hist.push_command(turn(1, 0, 3, 1));
        for _ in 0..3 {
            hist.replay_step(&mut world).unwrap();
        }
        assert_eq!(world.snakes[&1].turning, 0);
        hist.replay_step(&mut world).unwrap();
        assert_eq!(world.snakes[&1].turning, 1);
    }

    #[test]
    fn test_join_and_leave_replay() {
        let (mut world, mut hist) = seeded_world();
        hist.push_command(Command {
            snake_id: 12,
            recv_tick: 5,
            effect_tick: 5,
            kind: CommandKind::Join {
                name: "b".into(),
                pos: Vec2::new(4_000, 4_000),
            },
        });
        hist.push_command(Command {
            snake_id: 12,
            recv_tick: 8,
            effect_tick: 8,
            kind: CommandKind::Leave,
        });
        for _ in 0..10 {
            hist.replay_step(&mut world).unwrap();
        }
        assert!(world.snakes.get(&12).is_none());

        // Rewinding into the join/leave interval and replaying reproduces
        // both transitions.
        assert!(hist.rewind(&mut world, 0));
        for _ in 0..7 {
            hist.replay_step(&mut world).unwrap();
        }
        assert!(world.snakes.contains_key(&12));
        for _ in 0..3 {
            hist.replay_step(&mut world).unwrap();
        }
        assert!(world.snakes.get(&12).is_none());
    }

    #[test]
    fn test_spawn_food_is_idempotent() {
        let (mut world, mut hist) = seeded_world();
        hist.push_command(Command {
            snake_id: 0,
            recv_tick: 2,
            effect_tick: 2,
            kind: CommandKind::SpawnFood {
                spawns: vec![FoodSpawn {
                    id: 50,
                    pos: Vec2::new(10_000, 10_000),
                    size: 120,
                }],
            },
        });
        for _ in 0..5 {
            hist.replay_step(&mut world).unwrap();
        }
        assert_eq!(world.entities[&50].size, 120);

        hist.rewind(&mut world, 0);
        for _ in 0..5 {
            hist.replay_step(&mut world).unwrap();
        }
        assert_eq!(world.entities[&50].size, 120);
        assert_eq!(world.tree.len(), world.entities.len());
    }

    #[test]
    fn test_gc_commands() {
        let (_, mut hist) = seeded_world();
        hist.push_command(turn(1, 10, 10, 1));
        hist.push_command(turn(1, 90, 88, -1));
        hist.gc_commands(100);
        // Window is 50 ticks: effect 10 < 100 - 50 is dropped.
        assert_eq!(hist.commands().len(), 1);
        assert_eq!(hist.commands()[0].effect_tick, 88);
    }

    #[test]
    fn test_rollback_matches_direct_forward() {
        // The core determinism property: replaying a fixed log from a fixed
        // snapshot yields the same world whether or not a rewind happened
        // along the way.
        let script = vec![
            turn(1, 12, 12, 1),
            turn(1, 30, 28, 0),
            turn(1, 44, 40, -1),
            Command {
                snake_id: 0,
                recv_tick: 25,
                effect_tick: 25,
                kind: CommandKind::SpawnFood {
                    spawns: vec![FoodSpawn {
                        id: 60,
                        pos: Vec2::new(0, 2_000),
                        size: 80,
                    }],
                },
            },
        ];

        // Direct forward run.
        let (mut direct, mut direct_hist) = seeded_world();
        for c in &script {
            direct_hist.push_command(c.clone());
        }
        for _ in 0..60 {
            direct_hist.replay_step(&mut direct).unwrap();
        }

        // Run with a mid-flight rollback: commands arrive late, forcing a
        // rewind at tick 45 back past tick 40.
        let (mut rolled, mut rolled_hist) = seeded_world();
        for c in &script[..2] {
            rolled_hist.push_command(c.clone());
        }
        rolled_hist.push_command(script[3].clone());
        for _ in 0..45 {
            rolled_hist.replay_step(&mut rolled).unwrap();
        }
        rolled_hist.push_command(script[2].clone());
        assert!(rolled_hist.rewind(&mut rolled, 39));
        while rolled.current_tick < 60 {
            rolled_hist.replay_step(&mut rolled).unwrap();
        }

        assert!(direct.state_eq(&rolled), "worlds diverged after rollback");
    }
}

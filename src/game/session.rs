//! Per-game event loop: tick cadence, input intake, rollback, broadcast
//!
//! One task owns one game's world outright; every mutation happens inside
//! this loop. Late turn commands rewind the world to a snapshot and replay
//! forward, so the session's outputs always reflect "the turn happened at
//! the tick the client claims", not at the tick the packet arrived.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::game::constants::{food, history as history_consts, map, net as net_consts, snake as snake_consts, tick};
use crate::game::entity::{spawn_snake, EntityKind};
use crate::game::history::{Command, CommandKind, FoodSpawn, History};
use crate::game::world::{Collision, World, WorldError};
use crate::net::client::ClientHandle;
use crate::net::protocol::{self, NetMessage, Packet};
use crate::net::server::OutgoingMessage;
use crate::util::vec2::Vec2;

/// In-game commands from per-client parsers.
#[derive(Debug)]
pub enum GameCommand {
    Turn {
        client_id: u32,
        direction: i16,
        tick_id: u32,
    },
    Disconnect {
        client_id: u32,
    },
}

/// Lifecycle messages from the game manager.
#[derive(Debug)]
pub enum SessionControl {
    AddPlayer {
        client: Arc<ClientHandle>,
        name: String,
    },
    RemovePlayer {
        client_id: u32,
    },
}

/// Fatal session failures. These abort one game, never the server.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("world invariant broken: {0}")]
    World(#[from] WorldError),
    #[error("outgoing network queue closed")]
    NetworkClosed,
}

/// Something the tick resolved that clients need to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    FoodEaten { snake: u32, food: u32 },
    SnakeDied { snake: u32, corpse: Vec<u32> },
}

struct SessionUser {
    snake_id: u32,
    client: Arc<ClientHandle>,
}

/// A single running game.
pub struct GameSession {
    id: u32,
    world: World,
    history: History,
    users: HashMap<u32, SessionUser>,
    from_network: mpsc::Receiver<GameCommand>,
    from_manager: mpsc::Receiver<SessionControl>,
    to_network: mpsc::Sender<OutgoingMessage>,
    shutdown: broadcast::Receiver<()>,
    rng: StdRng,
}

impl GameSession {
    /// Builds a session plus the senders used to feed it. Everything random
    /// in this game derives from `seed`.
    pub fn new(
        id: u32,
        seed: u64,
        to_network: mpsc::Sender<OutgoingMessage>,
        shutdown: broadcast::Receiver<()>,
    ) -> (
        GameSession,
        mpsc::Sender<GameCommand>,
        mpsc::Sender<SessionControl>,
    ) {
        let (net_tx, from_network) = mpsc::channel(1024);
        let (manager_tx, from_manager) = mpsc::channel(128);
        let session = GameSession {
            id,
            world: World::new(),
            history: History::new(),
            users: HashMap::new(),
            from_network,
            from_manager,
            to_network,
            shutdown,
            rng: StdRng::seed_from_u64(seed),
        };
        (session, net_tx, manager_tx)
    }

    /// Runs the game until shutdown or a fatal invariant break.
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!(game = self.id, "game session started");
        let mut ticker = tokio::time::interval(Duration::from_millis(tick::TICK_MS));
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(game = self.id, "game session shutting down");
                    return Ok(());
                }
                Some(command) = self.from_network.recv() => {
                    self.handle_network(command).await?;
                }
                Some(control) = self.from_manager.recv() => {
                    self.handle_manager(control).await?;
                }
                _ = ticker.tick() => {
                    self.advance().await?;
                }
            }
        }
    }

    /// One wall-clock tick boundary: advance the authoritative present and
    /// replay the world up to it, then run the periodic cadences.
    async fn advance(&mut self) -> Result<(), SessionError> {
        self.world.real_tick += 1;
        while self.world.current_tick < self.world.real_tick {
            let collisions = self.history.replay_step(&mut self.world)?;
            let events = resolve_collisions(&mut self.world, &collisions)?;
            self.broadcast_events(&events).await?;
        }

        let now = self.world.real_tick;
        if now % food::SPAWN_INTERVAL_TICKS == 0 && !self.users.is_empty() {
            self.schedule_food_spawn();
        }
        if now % net_consts::MASTER_FRAME_INTERVAL_TICKS == 0 {
            self.send_master_frame().await?;
        }
        if now % history_consts::SNAPSHOT_INTERVAL == 0 {
            self.history.gc_commands(now);
        }
        Ok(())
    }

    async fn handle_network(&mut self, command: GameCommand) -> Result<(), SessionError> {
        match command {
            GameCommand::Turn {
                client_id,
                direction,
                tick_id,
            } => self.handle_turn(client_id, direction, tick_id).await,
            GameCommand::Disconnect { client_id } => self.remove_player(client_id).await,
        }
    }

    async fn handle_manager(&mut self, control: SessionControl) -> Result<(), SessionError> {
        match control {
            SessionControl::AddPlayer { client, name } => self.add_player(client, &name).await,
            SessionControl::RemovePlayer { client_id } => self.remove_player(client_id).await,
        }
    }

    async fn handle_turn(
        &mut self,
        client_id: u32,
        direction: i16,
        tick_id: u32,
    ) -> Result<(), SessionError> {
        let Some(user) = self.users.get(&client_id) else {
            warn!(client = client_id, "turn from client with no snake");
            return Ok(());
        };
        let snake_id = user.snake_id;
        let real = self.world.real_tick;
        // Older than the replay window can undo: silently drop.
        if real.saturating_sub(tick_id) > history_consts::WINDOW_TICKS {
            debug!(
                client = client_id,
                effect = tick_id,
                real,
                "dropping turn older than the replay window"
            );
            return Ok(());
        }
        let direction = direction.clamp(-1, 1);

        self.history.push_command(Command {
            snake_id,
            recv_tick: real,
            effect_tick: tick_id,
            kind: CommandKind::Turn { direction },
        });
        if self.world.current_tick >= tick_id {
            self.history
                .rewind(&mut self.world, tick_id.saturating_sub(1));
        }

        // Echo the authoritative turn to everyone, sender included, in the
        // tick it was accepted.
        self.broadcast(NetMessage::TurnSnake(protocol::TurnSnake {
            id: snake_id,
            direction,
            tick_id,
        }))
        .await
    }

    async fn add_player(
        &mut self,
        client: Arc<ClientHandle>,
        name: &str,
    ) -> Result<(), SessionError> {
        let snake_id = self.world.max_id + 1;
        self.world.max_id += 1 + snake_consts::START_SEGMENTS;
        let pos = Vec2::new(
            self.rng
                .gen_range(-snake_consts::SPAWN_EXTENT..=snake_consts::SPAWN_EXTENT),
            self.rng
                .gen_range(-snake_consts::SPAWN_EXTENT..=snake_consts::SPAWN_EXTENT),
        );
        let real = self.world.real_tick;
        self.history.push_command(Command {
            snake_id,
            recv_tick: real,
            effect_tick: real.saturating_sub(1),
            kind: CommandKind::Join {
                name: name.to_owned(),
                pos,
            },
        });
        if self.world.current_tick == self.world.real_tick {
            let (snake, entities) = spawn_snake(snake_id, name, pos);
            self.world.add_snake(snake, entities)?;
        }

        info!(
            game = self.id,
            client = client.id,
            snake = snake_id,
            "player joined"
        );
        let connected = NetMessage::GameConnected(protocol::GameConnected {
            id: self.id,
            snake_id,
            tick_id: self.world.current_tick,
            entities: self.wire_entities(false),
            snakes: self.wire_snakes(),
        });
        self.send_to(&client, connected).await?;
        self.users.insert(client.id, SessionUser { snake_id, client });
        Ok(())
    }

    async fn remove_player(&mut self, client_id: u32) -> Result<(), SessionError> {
        let Some(user) = self.users.remove(&client_id) else {
            return Ok(());
        };
        let snake_id = user.snake_id;
        let real = self.world.real_tick;
        info!(
            game = self.id,
            client = client_id,
            snake = snake_id,
            "player left"
        );
        // Schedule the removal so replay deletes the snake at the right
        // moment; apply it to the live world only when it is at the present.
        self.history.push_command(Command {
            snake_id,
            recv_tick: real,
            effect_tick: real.saturating_sub(1),
            kind: CommandKind::Leave,
        });
        if self.world.current_tick == self.world.real_tick {
            if let Some(snake) = self.world.remove_snake(snake_id) {
                self.broadcast(NetMessage::RemoveEntity { id: snake_id }).await?;
                for seg_id in snake.segments {
                    self.broadcast(NetMessage::RemoveEntity { id: seg_id }).await?;
                }
            }
        }
        Ok(())
    }

    /// Allocates ids and logs the next food batch. The batch applies on the
    /// next replay step; recording it as a command is what makes replay
    /// regenerate the same food without consulting the RNG.
    fn schedule_food_spawn(&mut self) {
        let real = self.world.real_tick;
        let mut spawns = Vec::with_capacity(food::SPAWN_COUNT);
        for _ in 0..food::SPAWN_COUNT {
            let id = self.world.max_id + 1;
            self.world.max_id = id;
            spawns.push(FoodSpawn {
                id,
                pos: Vec2::new(
                    self.rng.gen_range(-map::INTERNAL..=map::INTERNAL),
                    self.rng.gen_range(-map::INTERNAL..=map::INTERNAL),
                ),
                size: self.rng.gen_range(food::SIZE_MIN..food::SIZE_MAX),
            });
        }
        self.history.push_command(Command {
            snake_id: 0,
            recv_tick: real,
            effect_tick: real,
            kind: CommandKind::SpawnFood { spawns },
        });
    }

    /// The authoritative re-sync: all non-food entities plus all snakes.
    async fn send_master_frame(&mut self) -> Result<(), SessionError> {
        let frame = NetMessage::GameMasterFrame(protocol::GameMasterFrame {
            id: self.id,
            entities: self.wire_entities(true),
            snakes: self.wire_snakes(),
            tick: self.world.current_tick,
        });
        self.broadcast(frame).await
    }

    fn wire_entities(&self, skip_food: bool) -> Vec<protocol::Entity> {
        self.world
            .entity_ids_sorted()
            .into_iter()
            .filter_map(|id| {
                let e = &self.world.entities[&id];
                if skip_food && e.kind == EntityKind::Food {
                    None
                } else {
                    Some(protocol::Entity::from_game(e))
                }
            })
            .collect()
    }

    fn wire_snakes(&self) -> Vec<protocol::Snake> {
        self.world
            .snake_ids_sorted()
            .into_iter()
            .filter_map(|id| {
                let snake = &self.world.snakes[&id];
                let head = self.world.entities.get(&id)?;
                Some(protocol::Snake::from_game(snake, head))
            })
            .collect()
    }

    async fn broadcast_events(&mut self, events: &[GameEvent]) -> Result<(), SessionError> {
        for event in events {
            match event {
                GameEvent::FoodEaten { snake, food } => {
                    self.broadcast(NetMessage::RemoveEntity { id: *food }).await?;
                    if let Some(head) = self.world.entities.get(snake) {
                        self.broadcast(NetMessage::UpdateEntity(protocol::Entity::from_game(
                            head,
                        )))
                        .await?;
                    }
                }
                GameEvent::SnakeDied { snake, corpse } => {
                    self.broadcast(NetMessage::SnakeDied { id: *snake }).await?;
                    for id in corpse {
                        if let Some(entity) = self.world.entities.get(id) {
                            self.broadcast(NetMessage::UpdateEntity(
                                protocol::Entity::from_game(entity),
                            ))
                            .await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn broadcast(&self, msg: NetMessage) -> Result<(), SessionError> {
        for user in self.users.values() {
            self.to_network
                .send(OutgoingMessage {
                    dest: user.client.clone(),
                    packet: Packet::new(msg.clone()),
                })
                .await
                .map_err(|_| SessionError::NetworkClosed)?;
        }
        Ok(())
    }

    async fn send_to(&self, client: &Arc<ClientHandle>, msg: NetMessage) -> Result<(), SessionError> {
        self.to_network
            .send(OutgoingMessage {
                dest: client.clone(),
                packet: Packet::new(msg),
            })
            .await
            .map_err(|_| SessionError::NetworkClosed)
    }
}

/// Applies the collision policy to the world and reports what changed.
///
/// Discovery only pairs a head with entities outside its own snake, so the
/// cases left are food, a foreign body segment, and a foreign head. A snake
/// that already died or food already eaten earlier in the list is skipped.
pub fn resolve_collisions(
    world: &mut World,
    collisions: &[Collision],
) -> Result<Vec<GameEvent>, SessionError> {
    let mut events = Vec::new();
    for collision in collisions {
        if !world.snakes.contains_key(&collision.snake) {
            continue;
        }
        let Some(other) = world.entities.get(&collision.other) else {
            continue;
        };
        match other.kind {
            EntityKind::Food => {
                let gain = other.size / 2;
                let food_id = other.id;
                world.remove_entity(food_id);
                world.feed_snake(collision.snake, gain)?;
                events.push(GameEvent::FoodEaten {
                    snake: collision.snake,
                    food: food_id,
                });
            }
            EntityKind::Segment => {
                let corpse = world.kill_snake(collision.snake)?;
                events.push(GameEvent::SnakeDied {
                    snake: collision.snake,
                    corpse,
                });
            }
            EntityKind::Head => {
                let other_id = other.id;
                if !world.snakes.contains_key(&other_id) {
                    continue;
                }
                let my_size = world.entities[&collision.snake].size;
                let their_size = other.size;
                // Bigger head survives; ties go to the lower id.
                let loser = if my_size > their_size {
                    other_id
                } else if my_size < their_size {
                    collision.snake
                } else {
                    collision.snake.max(other_id)
                };
                let corpse = world.kill_snake(loser)?;
                events.push(GameEvent::SnakeDied {
                    snake: loser,
                    corpse,
                });
            }
        }
    }
    Ok(events)
}

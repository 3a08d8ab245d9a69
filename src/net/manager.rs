//! Game manager: account directory, connected users, game routing
//!
//! A single task owns the account table and the game list. Control-plane
//! messages (connect, account, login, join) land here; everything in-game
//! flows directly from the client's parser to its session.

use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::game::session::{GameCommand, GameSession, SessionControl};
use crate::net::client::{ClientControl, ClientHandle};
use crate::net::protocol::{CreateAcctResp, LoginResp, NetMessage, Packet};
use crate::net::server::OutgoingMessage;

/// Control-plane traffic from per-client parsers.
#[derive(Debug)]
pub enum ManagerMessage {
    Connected {
        client: Arc<ClientHandle>,
    },
    Disconnected {
        client: Arc<ClientHandle>,
    },
    CreateAcct {
        client: Arc<ClientHandle>,
        name: String,
        password: String,
    },
    Login {
        client: Arc<ClientHandle>,
        name: String,
        password: String,
    },
    JoinGame {
        client: Arc<ClientHandle>,
    },
}

struct Account {
    id: u32,
    name: String,
    password: String,
}

struct UserEntry {
    client: Arc<ClientHandle>,
    account: Option<(u32, String)>,
    game_id: Option<u32>,
}

struct GameHandle {
    to_session: mpsc::Sender<SessionControl>,
    to_game: mpsc::Sender<GameCommand>,
    task: JoinHandle<()>,
}

struct GameManager {
    accounts: HashMap<String, Account>,
    next_account_id: u32,
    users: HashMap<u32, UserEntry>,
    games: HashMap<u32, GameHandle>,
    next_game_id: u32,
    to_network: mpsc::Sender<OutgoingMessage>,
    shutdown: broadcast::Sender<()>,
    seed: Option<u64>,
}

/// Runs the manager until shutdown, then waits for every game session to
/// finish so the caller knows all games have unwound.
pub async fn run_manager(
    mut rx: mpsc::Receiver<ManagerMessage>,
    to_network: mpsc::Sender<OutgoingMessage>,
    shutdown: broadcast::Sender<()>,
    seed: Option<u64>,
) {
    let mut manager = GameManager {
        accounts: HashMap::new(),
        next_account_id: 0,
        users: HashMap::new(),
        games: HashMap::new(),
        next_game_id: 0,
        to_network,
        shutdown,
        seed,
    };
    let mut shutdown_rx = manager.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("manager shutting down all games");
                break;
            }
            msg = rx.recv() => match msg {
                Some(msg) => manager.handle(msg).await,
                None => break,
            }
        }
    }
    for (id, game) in manager.games.drain() {
        if game.task.await.is_err() {
            error!(game = id, "game session task panicked");
        }
    }
    info!("manager stopped");
}

impl GameManager {
    async fn handle(&mut self, msg: ManagerMessage) {
        match msg {
            ManagerMessage::Connected { client } => {
                debug!(client = client.id, "user connected");
                self.users.entry(client.id).or_insert(UserEntry {
                    client,
                    account: None,
                    game_id: None,
                });
            }
            ManagerMessage::Disconnected { client } => {
                let Some(user) = self.users.remove(&client.id) else {
                    return;
                };
                info!(client = client.id, "user disconnected");
                if let Some(game_id) = user.game_id {
                    if let Some(game) = self.games.get(&game_id) {
                        let _ = game
                            .to_session
                            .send(SessionControl::RemovePlayer {
                                client_id: client.id,
                            })
                            .await;
                    }
                }
            }
            ManagerMessage::CreateAcct {
                client,
                name,
                password,
            } => self.create_account(client, name, password).await,
            ManagerMessage::Login {
                client,
                name,
                password,
            } => self.login(client, name, password).await,
            ManagerMessage::JoinGame { client } => self.join_game(client).await,
        }
    }

    async fn create_account(&mut self, client: Arc<ClientHandle>, name: String, password: String) {
        let mut resp = CreateAcctResp {
            account_id: 0,
            name: name.clone(),
        };
        if !self.accounts.contains_key(&name) {
            self.next_account_id += 1;
            let account = Account {
                id: self.next_account_id,
                name: name.clone(),
                password,
            };
            resp.account_id = account.id;
            if let Some(user) = self.users.get_mut(&client.id) {
                user.account = Some((account.id, account.name.clone()));
            }
            info!(client = client.id, account = account.id, "account created");
            self.accounts.insert(name, account);
        }
        self.send(client, NetMessage::CreateAcctResp(resp)).await;
    }

    async fn login(&mut self, client: Arc<ClientHandle>, name: String, password: String) {
        let mut resp = LoginResp {
            success: 0,
            name: name.clone(),
            account_id: 0,
        };
        if let Some(account) = self.accounts.get(&name) {
            if account.password == password {
                resp.success = 1;
                resp.account_id = account.id;
                if let Some(user) = self.users.get_mut(&client.id) {
                    user.account = Some((account.id, account.name.clone()));
                }
                info!(client = client.id, account = account.id, "logged in");
            }
        }
        self.send(client, NetMessage::LoginResp(resp)).await;
    }

    async fn join_game(&mut self, client: Arc<ClientHandle>) {
        let Some(user) = self.users.get(&client.id) else {
            warn!(client = client.id, "join from unknown connection");
            return;
        };
        let Some((_, account_name)) = user.account.clone() else {
            warn!(client = client.id, "join before account setup, dropping");
            return;
        };
        if let Some(game_id) = user.game_id {
            warn!(client = client.id, game = game_id, "already in a game, ignoring join");
            return;
        }

        if self.games.is_empty() {
            self.create_game();
        }
        let game_id = 1;
        let Some(game) = self.games.get(&game_id) else {
            return;
        };
        let _ = game
            .to_session
            .send(SessionControl::AddPlayer {
                client: client.clone(),
                name: account_name,
            })
            .await;
        let _ = client
            .control_sender()
            .send(ClientControl::JoinedGame {
                game_id,
                to_game: game.to_game.clone(),
            })
            .await;
        if let Some(user) = self.users.get_mut(&client.id) {
            user.game_id = Some(game_id);
        }
    }

    fn create_game(&mut self) {
        self.next_game_id += 1;
        let id = self.next_game_id;
        let seed = self
            .seed
            .map(|s| s.wrapping_add(id as u64))
            .unwrap_or_else(rand::random);
        let (session, to_game, to_session) = GameSession::new(
            id,
            seed,
            self.to_network.clone(),
            self.shutdown.subscribe(),
        );
        let task = tokio::spawn(async move {
            if let Err(e) = session.run().await {
                error!(game = id, "game session failed: {}", e);
            }
        });
        info!(game = id, "launched new game");
        self.games.insert(
            id,
            GameHandle {
                to_session,
                to_game,
                task,
            },
        );
    }

    async fn send(&self, dest: Arc<ClientHandle>, msg: NetMessage) {
        let _ = self
            .to_network
            .send(OutgoingMessage {
                dest,
                packet: Packet::new(msg),
            })
            .await;
    }
}

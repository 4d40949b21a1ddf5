// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use connect_common::{
    CompletedGame, Game, GameEndReason, GameEvent, GameId, GameState, MoveError, Player, PlayerId,
    check_win_at, is_board_full,
};
use tokio::sync::RwLock;
use tracing::info;

use crate::events::EventEmitter;
use crate::persistence::ResultRecorder;

#[derive(Default)]
struct RegistryStore {
    games: HashMap<GameId, Game>,
    player_games: HashMap<PlayerId, GameId>,
    disconnected: HashMap<PlayerId, Instant>,
}

/// Authoritative owner of every live game. All three maps and the games they
/// contain sit behind one lock; mutation happens inside a lock scope that
/// returns snapshots plus pending effects, and events/persistence are
/// enqueued only after the lock is released.
#[derive(Clone)]
pub struct GameRegistry {
    store: Arc<RwLock<RegistryStore>>,
    events: EventEmitter,
    results: ResultRecorder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    /// Snapshot taken immediately after the move was applied.
    pub game: Game,
    pub row: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    GameNotFound,
    GameNotPlaying,
    NotInGame,
    NotYourTurn,
    Board(MoveError),
}

impl std::fmt::Display for MoveRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GameNotFound => write!(f, "game not found"),
            Self::GameNotPlaying => write!(f, "game is not in progress"),
            Self::NotInGame => write!(f, "player is not in this game"),
            Self::NotYourTurn => write!(f, "not your turn"),
            Self::Board(error) => write!(f, "{error}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForfeitOutcome {
    /// Snapshot of the finished game, with the remaining seat as winner.
    pub game: Game,
}

impl GameRegistry {
    pub fn new(events: EventEmitter, results: ResultRecorder) -> Self {
        Self {
            store: Arc::new(RwLock::new(RegistryStore::default())),
            events,
            results,
        }
    }

    pub async fn create_game(&self, player1: Player) -> Game {
        let mut store = self.store.write().await;
        let game = Game::new(player1);
        store
            .player_games
            .insert(game.player1.id.clone(), game.id.clone());
        store.games.insert(game.id.clone(), game.clone());
        info!(game_id = %game.id, player1 = %game.player1.username, "game created");
        game
    }

    /// Seats `player2`, moves the game to `Playing` and emits the
    /// game-start event.
    pub async fn join_game(&self, game_id: &str, player2: Player) -> Option<Game> {
        let (snapshot, event) = {
            let mut store = self.store.write().await;
            let player2_id = player2.id.clone();
            let player2_username = player2.username.clone();
            let player2_bot = player2.is_bot;
            let game = store.games.get_mut(game_id)?;
            game.player2 = Some(player2);
            game.state = GameState::Playing;
            let snapshot = game.clone();
            store.player_games.insert(player2_id, game_id.to_string());

            let event = GameEvent::GameStart {
                game_id: snapshot.id.clone(),
                player1: snapshot.player1.username.clone(),
                player2: player2_username,
                player1_bot: snapshot.player1.is_bot,
                player2_bot,
                timestamp: Utc::now(),
            };
            (snapshot, event)
        };

        info!(
            game_id = %snapshot.id,
            player1 = %snapshot.player1.username,
            player2 = snapshot.player2.as_ref().map(|p| p.username.as_str()).unwrap_or(""),
            "game started"
        );
        self.events.emit(event);
        Some(snapshot)
    }

    /// Applies one authoritative move. Emits the move event, then on a
    /// terminal board the game-end event plus the archive record.
    pub async fn make_move(
        &self,
        game_id: &str,
        player_id: &str,
        column: i32,
    ) -> Result<MoveOutcome, MoveRejection> {
        let (outcome, events, result) = {
            let mut store = self.store.write().await;
            let game = store
                .games
                .get_mut(game_id)
                .ok_or(MoveRejection::GameNotFound)?;
            if game.state != GameState::Playing {
                return Err(MoveRejection::GameNotPlaying);
            }
            let seat = game.seat_of(player_id).ok_or(MoveRejection::NotInGame)?;
            if game.current_turn != seat {
                return Err(MoveRejection::NotYourTurn);
            }

            let row = game.drop_disc(column, seat).map_err(MoveRejection::Board)?;
            let now = Utc::now();
            let mover = game
                .player_in_seat(seat)
                .map(|p| p.username.clone())
                .unwrap_or_default();
            let mut events = vec![GameEvent::GameMove {
                game_id: game.id.clone(),
                player: mover,
                column,
                row,
                timestamp: now,
            }];

            let mut result = None;
            if let Some(line) = check_win_at(&game.board, row, column as usize) {
                game.winner = game.player_in_seat(seat).cloned();
                game.winning_line = Some(line);
                finish(game, now);
                let (completed, end_event) = terminal_effects(game, GameEndReason::Win, now);
                events.push(end_event);
                result = Some(completed);
            } else if is_board_full(&game.board) {
                finish(game, now);
                let (completed, end_event) = terminal_effects(game, GameEndReason::Draw, now);
                events.push(end_event);
                result = Some(completed);
            } else {
                game.current_turn = 3 - game.current_turn;
            }

            (
                MoveOutcome {
                    game: game.clone(),
                    row,
                },
                events,
                result,
            )
        };

        for event in events {
            self.events.emit(event);
        }
        if let Some(result) = result {
            self.results.record(result);
        }
        Ok(outcome)
    }

    pub async fn game(&self, game_id: &str) -> Option<Game> {
        self.store.read().await.games.get(game_id).cloned()
    }

    pub async fn game_for_player(&self, player_id: &str) -> Option<Game> {
        let store = self.store.read().await;
        let game_id = store.player_games.get(player_id)?;
        store.games.get(game_id).cloned()
    }

    pub async fn mark_disconnected(&self, player_id: &str) {
        let mut store = self.store.write().await;
        store
            .disconnected
            .insert(player_id.to_string(), Instant::now());
    }

    pub async fn reconnect_player(&self, player_id: &str) {
        let mut store = self.store.write().await;
        store.disconnected.remove(player_id);
    }

    /// Drops a retired game together with both player bindings.
    pub async fn remove_game(&self, game_id: &str) {
        let mut store = self.store.write().await;
        if let Some(game) = store.games.remove(game_id) {
            store.player_games.remove(&game.player1.id);
            if let Some(player2) = &game.player2 {
                store.player_games.remove(&player2.id);
            }
        }
    }

    /// Forfeits every game whose disconnect record is older than `grace` and
    /// is still being played. Stale records for finished or vanished games
    /// are cleared without effect.
    pub async fn expire_disconnected(&self, grace: Duration) -> Vec<ForfeitOutcome> {
        let mut outcomes = Vec::new();
        let mut events = Vec::new();
        let mut results = Vec::new();
        {
            let mut store = self.store.write().await;
            let now = Instant::now();
            let expired: Vec<PlayerId> = store
                .disconnected
                .iter()
                .filter(|(_, disconnected_at)| now.duration_since(**disconnected_at) > grace)
                .map(|(player_id, _)| player_id.clone())
                .collect();

            for player_id in expired {
                store.disconnected.remove(&player_id);
                let Some(game_id) = store.player_games.get(&player_id).cloned() else {
                    continue;
                };
                let Some(game) = store.games.get_mut(&game_id) else {
                    continue;
                };
                if game.state != GameState::Playing {
                    continue;
                }
                let Some(loser_seat) = game.seat_of(&player_id) else {
                    continue;
                };
                let Some(winner) = game.player_in_seat(3 - loser_seat).cloned() else {
                    continue;
                };

                let now_utc = Utc::now();
                game.winner = Some(winner);
                finish(game, now_utc);
                let (completed, end_event) = terminal_effects(game, GameEndReason::Forfeit, now_utc);
                events.push(end_event);
                results.push(completed);
                outcomes.push(ForfeitOutcome { game: game.clone() });
            }
        }

        for event in events {
            self.events.emit(event);
        }
        for result in results {
            self.results.record(result);
        }
        outcomes
    }
}

fn finish(game: &mut Game, at: DateTime<Utc>) {
    game.state = GameState::Finished;
    game.end_time = Some(at);
}

/// Archive record and game-end event for a game that just finished.
fn terminal_effects(
    game: &Game,
    reason: GameEndReason,
    at: DateTime<Utc>,
) -> (CompletedGame, GameEvent) {
    let winner = game
        .winner
        .as_ref()
        .map(|p| p.username.clone())
        .unwrap_or_default();
    let duration = (at - game.start_time).num_seconds();
    let total_moves = game.move_count() as i64;
    let completed = CompletedGame {
        game_id: game.id.clone(),
        player1: game.player1.username.clone(),
        player2: game
            .player2
            .as_ref()
            .map(|p| p.username.clone())
            .unwrap_or_default(),
        winner: winner.clone(),
        duration,
        total_moves,
        completed_at: at,
        player1_is_bot: game.player1.is_bot,
        player2_is_bot: game.player2.as_ref().map(|p| p.is_bot).unwrap_or(false),
    };
    let event = GameEvent::GameEnd {
        game_id: game.id.clone(),
        winner,
        duration,
        total_moves,
        reason,
        timestamp: at,
    };
    (completed, event)
}

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

//! Translates wire messages into registry and matchmaking operations and
//! routes the outcomes to both seats of a game.

use std::{sync::Arc, time::Duration};

use connect_common::{
    ErrorPayload, Game, GameEndReason, GameStartPayload, GameState, GameUpdatePayload,
    JoinQueuePayload, MovePayload, Player, ReconnectPayload, ServerMessage, is_valid_move,
};
use rand::Rng;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::AppState;
use crate::bot;
use crate::connection::ClientSession;
use crate::registry::MoveRejection;

pub const GAME_START_POLL: Duration = Duration::from_millis(500);
pub const GAME_START_DEADLINE: Duration = Duration::from_secs(15);
pub const FORFEIT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// How long a disconnected player may reconnect before forfeiting.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(30);

const BOT_OPENING_DELAY: Duration = Duration::from_secs(1);

pub async fn handle_join_queue(
    state: &AppState,
    session: &Arc<ClientSession>,
    payload: JoinQueuePayload,
) {
    // A game id on join means the client is trying to resume a game.
    if let Some(game_id) = payload.game_id {
        let reconnect = ReconnectPayload {
            username: payload.username,
            game_id,
        };
        handle_reconnect(state, session, reconnect).await;
        return;
    }

    let player = Player::human(payload.username);
    session.bind_player(player.clone());
    state.clients.bind(player.id.clone(), session.clone());
    state.matchmaker.enqueue(player.clone()).await;

    let state = state.clone();
    let session = session.clone();
    tokio::spawn(async move {
        wait_for_game_start(state, session, player).await;
    });
}

/// Polls until matchmaking has placed the player into a playing game, then
/// announces the game to this client (and a human opponent) and hands the
/// opening move to the bot when it is due one.
async fn wait_for_game_start(state: AppState, session: Arc<ClientSession>, player: Player) {
    let matched = tokio::time::timeout(GAME_START_DEADLINE, async {
        let mut poll = interval(GAME_START_POLL);
        loop {
            poll.tick().await;
            if let Some(game) = state.registry.game_for_player(&player.id).await
                && game.state == GameState::Playing
            {
                return game;
            }
        }
    })
    .await;
    // On timeout the watcher exits silently; the player stays queued and the
    // matchmaking bot fallback covers them.
    let Ok(game) = matched else { return };

    session.bind_game(game.id.clone());
    state.matchmaker.remove(&player.id).await;
    session.send(&ServerMessage::GameStart(GameStartPayload {
        game: game.clone(),
        your_player_id: player.id.clone(),
    }));

    if let Some(opponent) = opponent_of(&game, &player.id)
        && !opponent.is_bot
        && let Some(peer) = state.clients.get(&opponent.id)
    {
        peer.send(&ServerMessage::GameStart(GameStartPayload {
            game: game.clone(),
            your_player_id: opponent.id.clone(),
        }));
    }

    if let Some(player2) = &game.player2
        && player2.is_bot
        && game.current_turn == 2
    {
        tokio::time::sleep(BOT_OPENING_DELAY).await;
        take_bot_turn(&state, &game.id).await;
    }
}

pub async fn handle_move(state: &AppState, session: &Arc<ClientSession>, payload: MovePayload) {
    let (Some(player), Some(game_id)) = (session.player(), session.game_id()) else {
        session.send(&ServerMessage::error("Not in a game"));
        return;
    };
    let Some(game) = state.registry.game(&game_id).await else {
        session.send(&ServerMessage::error("Game not found"));
        return;
    };
    let Some(seat) = game.seat_of(&player.id) else {
        session.send(&ServerMessage::error("Not in a game"));
        return;
    };
    if game.current_turn != seat {
        session.send(&ServerMessage::invalid_move("Not your turn"));
        return;
    }
    if !is_valid_move(&game.board, payload.column) {
        session.send(&ServerMessage::invalid_move("Invalid move"));
        return;
    }

    // The registry revalidates under its lock; the checks above only decide
    // the reply wording for the common rejections.
    match state
        .registry
        .make_move(&game_id, &player.id, payload.column)
        .await
    {
        Ok(outcome) => {
            let game = outcome.game;
            send_game_update(state, &game, None);
            if game.state == GameState::Finished {
                let reason = if game.winner.is_some() {
                    GameEndReason::Win
                } else {
                    GameEndReason::Draw
                };
                send_game_over(state, &game, reason);
                state.registry.remove_game(&game.id).await;
                return;
            }
            if bot_seat_to_move(&game).is_some() {
                schedule_bot_turn(state, game.id);
            }
        }
        Err(rejection @ (MoveRejection::NotYourTurn | MoveRejection::Board(_))) => {
            session.send(&ServerMessage::invalid_move(rejection.to_string()));
        }
        Err(rejection) => {
            session.send(&ServerMessage::error(rejection.to_string()));
        }
    }
}

pub async fn handle_reconnect(
    state: &AppState,
    session: &Arc<ClientSession>,
    payload: ReconnectPayload,
) {
    let rejected = || ServerMessage::error("Game not found or already finished");

    let Some(game) = state.registry.game(&payload.game_id).await else {
        session.send(&rejected());
        return;
    };
    if game.state != GameState::Playing {
        session.send(&rejected());
        return;
    }
    let player = if game.player1.username == payload.username {
        game.player1.clone()
    } else if let Some(player2) = &game.player2
        && player2.username == payload.username
    {
        player2.clone()
    } else {
        session.send(&rejected());
        return;
    };

    session.bind_player(player.clone());
    session.bind_game(game.id.clone());
    state.clients.bind(player.id.clone(), session.clone());
    state.registry.reconnect_player(&player.id).await;

    info!(game_id = %game.id, username = %player.username, "player reconnected");
    session.send(&ServerMessage::GameUpdate(GameUpdatePayload {
        game,
        message: Some("Reconnected successfully".to_string()),
    }));
}

/// Teardown when a connection dies: unbind the lookup, leave the queue and,
/// for a player mid-game, open the reconnect grace window and tell the
/// opponent.
pub async fn handle_disconnect(state: &AppState, session: &Arc<ClientSession>) {
    let Some(player) = session.player() else {
        return;
    };
    state.clients.unbind_session(&player.id, &session.session_id);
    state.matchmaker.remove(&player.id).await;

    let Some(game_id) = session.game_id() else {
        return;
    };
    let Some(game) = state.registry.game(&game_id).await else {
        return;
    };
    if game.state != GameState::Playing {
        return;
    }

    state.registry.mark_disconnected(&player.id).await;
    info!(
        game_id = %game.id,
        username = %player.username,
        "player disconnected mid-game; reconnect grace started"
    );
    if let Some(opponent) = opponent_of(&game, &player.id)
        && !opponent.is_bot
        && let Some(peer) = state.clients.get(&opponent.id)
    {
        peer.send(&ServerMessage::OpponentLeft(ErrorPayload {
            message: "Opponent disconnected. They have 30 seconds to reconnect.".to_string(),
        }));
    }
}

/// Forfeits games whose disconnected player overstayed the grace window.
pub async fn run_forfeit_sweep(state: AppState) {
    let mut ticker = interval(FORFEIT_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for outcome in state.registry.expire_disconnected(RECONNECT_GRACE).await {
            let game = outcome.game;
            info!(
                game_id = %game.id,
                winner = game.winner.as_ref().map(|p| p.username.as_str()).unwrap_or(""),
                "game forfeited after reconnect grace expired"
            );
            send_game_over(&state, &game, GameEndReason::Forfeit);
            state.registry.remove_game(&game.id).await;
        }
    }
}

fn schedule_bot_turn(state: &AppState, game_id: String) {
    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(bot_reply_delay()).await;
        take_bot_turn(&state, &game_id).await;
    });
}

async fn take_bot_turn(state: &AppState, game_id: &str) {
    let Some(game) = state.registry.game(game_id).await else {
        return;
    };
    if game.state != GameState::Playing {
        return;
    }
    let Some(seat) = bot_seat_to_move(&game) else {
        return;
    };
    let Some(bot_player) = game.player_in_seat(seat).cloned() else {
        return;
    };

    let column = bot::choose_column(&game, seat);
    if column < 0 {
        return;
    }

    match state.registry.make_move(game_id, &bot_player.id, column).await {
        Ok(outcome) => {
            let game = outcome.game;
            send_game_update(state, &game, Some("Bot made a move"));
            if game.state == GameState::Finished {
                let reason = if game.winner.is_some() {
                    GameEndReason::Win
                } else {
                    GameEndReason::Draw
                };
                send_game_over(state, &game, reason);
                state.registry.remove_game(&game.id).await;
            }
        }
        Err(rejection) => {
            warn!(game_id = %game_id, rejection = %rejection, "bot move rejected");
        }
    }
}

fn bot_seat_to_move(game: &Game) -> Option<u8> {
    let seat = game.current_turn;
    game.player_in_seat(seat)
        .filter(|player| player.is_bot)
        .map(|_| seat)
}

fn bot_reply_delay() -> Duration {
    Duration::from_millis(rand::rng().random_range(500..1500))
}

fn opponent_of<'a>(game: &'a Game, player_id: &str) -> Option<&'a Player> {
    let seat = game.seat_of(player_id)?;
    game.player_in_seat(3 - seat)
}

fn send_game_update(state: &AppState, game: &Game, note: Option<&str>) {
    for seat in [1, 2] {
        let Some(player) = game.player_in_seat(seat) else {
            continue;
        };
        if player.is_bot {
            continue;
        }
        let Some(client) = state.clients.get(&player.id) else {
            continue;
        };
        client.send(&ServerMessage::GameUpdate(GameUpdatePayload {
            game: game.clone(),
            message: note.map(str::to_string),
        }));
    }
}

pub(crate) fn send_game_over(state: &AppState, game: &Game, reason: GameEndReason) {
    let winner = game
        .winner
        .as_ref()
        .map(|p| p.username.clone())
        .unwrap_or_default();
    let message = match reason {
        GameEndReason::Draw => "Game ended in a draw!".to_string(),
        _ => format!("{winner} wins!"),
    };
    for seat in [1, 2] {
        let Some(player) = game.player_in_seat(seat) else {
            continue;
        };
        if player.is_bot {
            continue;
        }
        let Some(client) = state.clients.get(&player.id) else {
            continue;
        };
        client.send(&ServerMessage::GameOver(connect_common::GameOverPayload {
            game: game.clone(),
            winner: winner.clone(),
            reason,
            message: message.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ClientRegistry, OUTBOUND_QUEUE_CAPACITY};
    use crate::events::{EventEmitter, EventSink};
    use crate::matchmaking::Matchmaker;
    use crate::persistence::{LeaderboardOutcome, ResultRecorder, ResultStore};
    use crate::registry::GameRegistry;
    use async_trait::async_trait;
    use connect_common::{CompletedGame, GameEvent};
    use tokio::sync::mpsc;

    struct NoopEventSink;

    #[async_trait]
    impl EventSink for NoopEventSink {
        async fn publish(&self, _event: &GameEvent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopResultStore;

    #[async_trait]
    impl ResultStore for NoopResultStore {
        async fn save_completed_game(&self, _result: &CompletedGame) -> anyhow::Result<()> {
            Ok(())
        }

        async fn record_outcome(
            &self,
            _username: &str,
            _outcome: LeaderboardOutcome,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_state() -> AppState {
        AppState {
            registry: GameRegistry::new(
                EventEmitter::start(Arc::new(NoopEventSink)),
                ResultRecorder::start(Arc::new(NoopResultStore)),
            ),
            matchmaker: Matchmaker::new(),
            clients: ClientRegistry::default(),
        }
    }

    fn session() -> (Arc<ClientSession>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (ClientSession::new(tx), rx)
    }

    fn next_message(rx: &mut mpsc::Receiver<String>) -> ServerMessage {
        let frame = rx.try_recv().expect("expected an outbound frame");
        serde_json::from_str(&frame).expect("outbound frame must decode")
    }

    struct Seated {
        state: AppState,
        game: Game,
        alice: Player,
        bob: Player,
        alice_session: Arc<ClientSession>,
        alice_rx: mpsc::Receiver<String>,
        bob_session: Arc<ClientSession>,
        bob_rx: mpsc::Receiver<String>,
    }

    async fn seated_game() -> Seated {
        let state = test_state();
        let alice = Player::human("Alice");
        let bob = Player::human("Bob");
        let game = state.registry.create_game(alice.clone()).await;
        let game = state
            .registry
            .join_game(&game.id, bob.clone())
            .await
            .expect("game must exist");

        let (alice_session, alice_rx) = session();
        alice_session.bind_player(alice.clone());
        alice_session.bind_game(game.id.clone());
        state.clients.bind(alice.id.clone(), alice_session.clone());

        let (bob_session, bob_rx) = session();
        bob_session.bind_player(bob.clone());
        bob_session.bind_game(game.id.clone());
        state.clients.bind(bob.id.clone(), bob_session.clone());

        Seated {
            state,
            game,
            alice,
            bob,
            alice_session,
            alice_rx,
            bob_session,
            bob_rx,
        }
    }

    #[tokio::test]
    async fn move_without_a_game_binding_is_an_error() {
        let state = test_state();
        let (session, mut rx) = session();

        handle_move(&state, &session, MovePayload { column: 3 }).await;

        match next_message(&mut rx) {
            ServerMessage::Error(payload) => assert_eq!(payload.message, "Not in a game"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_turn_move_is_rejected_without_touching_the_game() {
        let mut seated = seated_game().await;

        handle_move(&seated.state, &seated.bob_session, MovePayload { column: 0 }).await;

        match next_message(&mut seated.bob_rx) {
            ServerMessage::InvalidMove(payload) => assert_eq!(payload.message, "Not your turn"),
            other => panic!("expected invalid_move, got {other:?}"),
        }
        assert!(seated.alice_rx.try_recv().is_err());

        let unchanged = seated.state.registry.game(&seated.game.id).await.unwrap();
        assert_eq!(unchanged.move_count(), 0);
        assert_eq!(unchanged.current_turn, 1);
    }

    #[tokio::test]
    async fn out_of_range_column_is_rejected() {
        let mut seated = seated_game().await;

        handle_move(
            &seated.state,
            &seated.alice_session,
            MovePayload { column: 7 },
        )
        .await;

        match next_message(&mut seated.alice_rx) {
            ServerMessage::InvalidMove(payload) => assert_eq!(payload.message, "Invalid move"),
            other => panic!("expected invalid_move, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_move_fans_out_updates_to_both_seats() {
        let mut seated = seated_game().await;

        handle_move(
            &seated.state,
            &seated.alice_session,
            MovePayload { column: 3 },
        )
        .await;

        for rx in [&mut seated.alice_rx, &mut seated.bob_rx] {
            match next_message(rx) {
                ServerMessage::GameUpdate(payload) => {
                    assert_eq!(payload.game.board[5][3], 1);
                    assert_eq!(payload.game.current_turn, 2);
                    assert_eq!(payload.game.state, GameState::Playing);
                    assert_eq!(payload.message, None);
                }
                other => panic!("expected game_update, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn winning_move_sends_game_over_to_both_seats_and_retires_the_game() {
        let mut seated = seated_game().await;

        for _ in 0..3 {
            handle_move(
                &seated.state,
                &seated.alice_session,
                MovePayload { column: 3 },
            )
            .await;
            handle_move(&seated.state, &seated.bob_session, MovePayload { column: 4 }).await;
        }
        handle_move(
            &seated.state,
            &seated.alice_session,
            MovePayload { column: 3 },
        )
        .await;

        // Skip the six mid-game updates, then the final update precedes the
        // game_over frame.
        for rx in [&mut seated.alice_rx, &mut seated.bob_rx] {
            let mut last_two = Vec::new();
            while let Ok(frame) = rx.try_recv() {
                last_two.push(serde_json::from_str::<ServerMessage>(&frame).unwrap());
                if last_two.len() > 2 {
                    last_two.remove(0);
                }
            }
            match &last_two[0] {
                ServerMessage::GameUpdate(payload) => {
                    assert_eq!(payload.game.state, GameState::Finished);
                }
                other => panic!("expected game_update, got {other:?}"),
            }
            match &last_two[1] {
                ServerMessage::GameOver(payload) => {
                    assert_eq!(payload.winner, "Alice");
                    assert_eq!(payload.reason, GameEndReason::Win);
                    assert_eq!(payload.message, "Alice wins!");
                    assert_eq!(
                        payload.game.winning_line,
                        Some(vec![[5, 3], [4, 3], [3, 3], [2, 3]])
                    );
                }
                other => panic!("expected game_over, got {other:?}"),
            }
        }

        assert!(seated.state.registry.game(&seated.game.id).await.is_none());
    }

    #[tokio::test]
    async fn reconnect_to_an_unknown_game_is_an_error_and_skips_the_queue() {
        let state = test_state();
        let (session_handle, mut rx) = session();

        handle_join_queue(
            &state,
            &session_handle,
            JoinQueuePayload {
                username: "Alice".to_string(),
                game_id: Some("missing-game".to_string()),
            },
        )
        .await;

        match next_message(&mut rx) {
            ServerMessage::Error(payload) => {
                assert_eq!(payload.message, "Game not found or already finished");
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(state.matchmaker.len().await, 0);
    }

    #[tokio::test]
    async fn reconnect_with_a_wrong_username_is_rejected() {
        let seated = seated_game().await;
        let (session_handle, mut rx) = session();

        handle_reconnect(
            &seated.state,
            &session_handle,
            ReconnectPayload {
                username: "Mallory".to_string(),
                game_id: seated.game.id.clone(),
            },
        )
        .await;

        match next_message(&mut rx) {
            ServerMessage::Error(payload) => {
                assert_eq!(payload.message, "Game not found or already finished");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reconnect_rebinds_and_replays_identical_snapshots() {
        let seated = seated_game().await;
        seated.state.registry.mark_disconnected(&seated.alice.id).await;

        let mut snapshots = Vec::new();
        for _ in 0..2 {
            let (session_handle, mut rx) = session();
            handle_reconnect(
                &seated.state,
                &session_handle,
                ReconnectPayload {
                    username: "Alice".to_string(),
                    game_id: seated.game.id.clone(),
                },
            )
            .await;

            match next_message(&mut rx) {
                ServerMessage::GameUpdate(payload) => {
                    assert_eq!(payload.message.as_deref(), Some("Reconnected successfully"));
                    snapshots.push(payload.game);
                }
                other => panic!("expected game_update, got {other:?}"),
            }
            assert_eq!(session_handle.player().map(|p| p.id), Some(seated.alice.id.clone()));
            assert_eq!(session_handle.game_id(), Some(seated.game.id.clone()));
        }
        assert_eq!(snapshots[0], snapshots[1]);

        // The grace record is gone: nothing left for the forfeit sweep.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(
            seated
                .state
                .registry
                .expire_disconnected(Duration::ZERO)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn disconnect_mid_game_notifies_the_opponent_and_opens_the_grace_window() {
        let mut seated = seated_game().await;

        handle_disconnect(&seated.state, &seated.alice_session).await;

        match next_message(&mut seated.bob_rx) {
            ServerMessage::OpponentLeft(payload) => {
                assert!(payload.message.contains("30 seconds"));
            }
            other => panic!("expected opponent_left, got {other:?}"),
        }
        assert!(seated.state.clients.get(&seated.alice.id).is_none());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let outcomes = seated
            .state
            .registry
            .expire_disconnected(Duration::ZERO)
            .await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].game.winner.as_ref().map(|p| p.id.as_str()),
            Some(seated.bob.id.as_str())
        );
    }

    #[tokio::test]
    async fn join_queue_binds_the_player_and_enqueues() {
        let state = test_state();
        let (session_handle, _rx) = session();

        handle_join_queue(
            &state,
            &session_handle,
            JoinQueuePayload {
                username: "Alice".to_string(),
                game_id: None,
            },
        )
        .await;

        let player = session_handle.player().expect("player must be bound");
        assert_eq!(player.username, "Alice");
        assert!(!player.is_bot);
        assert_eq!(state.matchmaker.len().await, 1);
        assert!(state.clients.get(&player.id).is_some());
    }
}

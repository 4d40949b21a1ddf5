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

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use connect_common::CompletedGame;
use sqlx::postgres::PgPool;
use tokio::sync::mpsc;
use tracing::warn;

pub const RESULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardOutcome {
    Win,
    Loss,
    Draw,
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_completed_game(&self, result: &CompletedGame) -> anyhow::Result<()>;
    async fn record_outcome(
        &self,
        username: &str,
        outcome: LeaderboardOutcome,
    ) -> anyhow::Result<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    id VARCHAR(255) PRIMARY KEY,
    player1 VARCHAR(255) NOT NULL,
    player2 VARCHAR(255) NOT NULL,
    winner VARCHAR(255),
    duration INTEGER NOT NULL,
    total_moves INTEGER NOT NULL,
    completed_at TIMESTAMPTZ NOT NULL,
    player1_is_bot BOOLEAN NOT NULL DEFAULT FALSE,
    player2_is_bot BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE TABLE IF NOT EXISTS leaderboard (
    username VARCHAR(255) PRIMARY KEY,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    draws INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_games_completed_at ON games(completed_at);
CREATE INDEX IF NOT EXISTS idx_leaderboard_wins ON leaderboard(wins DESC);
"#;

/// Postgres-backed archive of completed games plus leaderboard counters.
pub struct PostgresResultStore {
    pool: PgPool,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("failed to create games/leaderboard schema")?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    async fn save_completed_game(&self, result: &CompletedGame) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO games
                (id, player1, player2, winner, duration, total_moves, completed_at,
                 player1_is_bot, player2_is_bot)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&result.game_id)
        .bind(&result.player1)
        .bind(&result.player2)
        .bind(&result.winner)
        .bind(result.duration)
        .bind(result.total_moves)
        .bind(result.completed_at)
        .bind(result.player1_is_bot)
        .bind(result.player2_is_bot)
        .execute(&self.pool)
        .await
        .context("failed to insert completed game")?;
        Ok(())
    }

    async fn record_outcome(
        &self,
        username: &str,
        outcome: LeaderboardOutcome,
    ) -> anyhow::Result<()> {
        let (wins, losses, draws) = match outcome {
            LeaderboardOutcome::Win => (1, 0, 0),
            LeaderboardOutcome::Loss => (0, 1, 0),
            LeaderboardOutcome::Draw => (0, 0, 1),
        };
        sqlx::query(
            r#"
            INSERT INTO leaderboard (username, wins, losses, draws)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (username) DO UPDATE
            SET wins = leaderboard.wins + EXCLUDED.wins,
                losses = leaderboard.losses + EXCLUDED.losses,
                draws = leaderboard.draws + EXCLUDED.draws
            "#,
        )
        .bind(username)
        .bind(wins)
        .bind(losses)
        .bind(draws)
        .execute(&self.pool)
        .await
        .context("failed to upsert leaderboard entry")?;
        Ok(())
    }
}

/// Handle used by gameplay code to hand off a finished game. The writer task
/// owns all store I/O; failures are logged and never reach gameplay.
#[derive(Clone)]
pub struct ResultRecorder {
    tx: mpsc::Sender<CompletedGame>,
}

impl ResultRecorder {
    pub fn start(store: Arc<dyn ResultStore>) -> Self {
        let (tx, rx) = mpsc::channel(RESULT_QUEUE_CAPACITY);
        tokio::spawn(run_result_writer(rx, store));
        Self { tx }
    }

    pub fn record(&self, result: CompletedGame) {
        if let Err(error) = self.tx.try_send(result) {
            warn!(%error, "result queue full or closed; dropping completed-game record");
        }
    }
}

async fn run_result_writer(mut rx: mpsc::Receiver<CompletedGame>, store: Arc<dyn ResultStore>) {
    while let Some(result) = rx.recv().await {
        persist_result(store.as_ref(), &result).await;
    }
}

pub(crate) async fn persist_result(store: &dyn ResultStore, result: &CompletedGame) {
    if let Err(error) = store.save_completed_game(result).await {
        warn!(game_id = %result.game_id, error = %error, "failed to archive completed game");
    }
    for (username, outcome) in leaderboard_updates(result) {
        if let Err(error) = store.record_outcome(&username, outcome).await {
            warn!(username = %username, error = %error, "failed to update leaderboard entry");
        }
    }
}

/// Per-username counter bumps for one finished game. Bots never contribute.
fn leaderboard_updates(result: &CompletedGame) -> Vec<(String, LeaderboardOutcome)> {
    let mut updates = Vec::new();
    if result.winner.is_empty() {
        if !result.player1_is_bot {
            updates.push((result.player1.clone(), LeaderboardOutcome::Draw));
        }
        if !result.player2_is_bot {
            updates.push((result.player2.clone(), LeaderboardOutcome::Draw));
        }
        return updates;
    }

    let (winner_is_bot, loser, loser_is_bot) = if result.winner == result.player1 {
        (result.player1_is_bot, &result.player2, result.player2_is_bot)
    } else {
        (result.player2_is_bot, &result.player1, result.player1_is_bot)
    };
    if !winner_is_bot {
        updates.push((result.winner.clone(), LeaderboardOutcome::Win));
    }
    if !loser_is_bot {
        updates.push((loser.clone(), LeaderboardOutcome::Loss));
    }
    updates
}

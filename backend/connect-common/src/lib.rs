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

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ROWS: usize = 6;
pub const COLS: usize = 7;
pub const WIN_LENGTH: usize = 4;

/// Board cells: 0 = empty, 1 = seat one, 2 = seat two. Row 0 is the top
/// row; gravity fills columns from the bottom up.
pub type Board = Vec<Vec<u8>>;

pub type PlayerId = String;
pub type GameId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub is_bot: bool,
}

impl Player {
    pub fn human(username: impl Into<String>) -> Self {
        Self {
            id: generate_player_id(),
            username: username.into(),
            is_bot: false,
        }
    }

    pub fn bot() -> Self {
        Self {
            id: generate_player_id(),
            username: "Bot".to_string(),
            is_bot: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameEndReason {
    Win,
    Draw,
    Forfeit,
}

impl GameEndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Draw => "draw",
            Self::Forfeit => "forfeit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub player1: Player,
    pub player2: Option<Player>,
    pub board: Board,
    /// Seat whose move is next, 1 or 2. Seat 1 always opens.
    pub current_turn: u8,
    pub state: GameState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Player>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_line: Option<Vec<[usize; 2]>>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_move_col: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_move_row: Option<usize>,
}

impl Game {
    pub fn new(player1: Player) -> Self {
        Self {
            id: generate_game_id(),
            player1,
            player2: None,
            board: vec![vec![0; COLS]; ROWS],
            current_turn: 1,
            state: GameState::Waiting,
            winner: None,
            winning_line: None,
            start_time: Utc::now(),
            end_time: None,
            last_move_col: None,
            last_move_row: None,
        }
    }

    /// Seat (1 or 2) held by the given player id, if they are in this game.
    pub fn seat_of(&self, player_id: &str) -> Option<u8> {
        if self.player1.id == player_id {
            return Some(1);
        }
        match &self.player2 {
            Some(p2) if p2.id == player_id => Some(2),
            _ => None,
        }
    }

    pub fn player_in_seat(&self, seat: u8) -> Option<&Player> {
        match seat {
            1 => Some(&self.player1),
            2 => self.player2.as_ref(),
            _ => None,
        }
    }

    /// Number of discs on the board, which equals the number of moves made.
    pub fn move_count(&self) -> usize {
        self.board
            .iter()
            .flatten()
            .filter(|&&cell| cell != 0)
            .count()
    }

    /// Drop a disc for `seat` into `column`, recording the landing cell as
    /// the last move. Returns the row the disc settled in.
    pub fn drop_disc(&mut self, column: i32, seat: u8) -> Result<usize, MoveError> {
        let row = drop_disc(&mut self.board, column, seat)?;
        self.last_move_col = Some(column as usize);
        self.last_move_row = Some(row);
        Ok(row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveError {
    OutOfRange,
    ColumnFull,
}

impl std::fmt::Display for MoveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "column out of range"),
            Self::ColumnFull => write!(f, "column is full"),
        }
    }
}

impl std::error::Error for MoveError {}

pub fn is_valid_move(board: &Board, column: i32) -> bool {
    (0..COLS as i32).contains(&column) && board[0][column as usize] == 0
}

/// Write `seat` into the lowest empty cell of `column` and return its row.
pub fn drop_disc(board: &mut Board, column: i32, seat: u8) -> Result<usize, MoveError> {
    if !(0..COLS as i32).contains(&column) {
        return Err(MoveError::OutOfRange);
    }
    let column = column as usize;
    for row in (0..ROWS).rev() {
        if board[row][column] == 0 {
            board[row][column] = seat;
            return Ok(row);
        }
    }
    Err(MoveError::ColumnFull)
}

/// Axes probed from a just-placed disc, in fixed order: horizontal,
/// vertical, down-right diagonal, down-left diagonal. The order makes the
/// reported winning line deterministic.
const WIN_DIRECTIONS: [(i32, i32); 4] = [(0, 1), (-1, 0), (1, 1), (1, -1)];

/// Look for a four-in-a-row through the cell at (`row`, `col`). Returns the
/// first run found, truncated to exactly four cells ordered
/// backward-extension first, then the placed cell, then the forward
/// extension.
pub fn check_win_at(board: &Board, row: usize, col: usize) -> Option<Vec<[usize; 2]>> {
    let seat = board[row][col];
    if seat == 0 {
        return None;
    }
    WIN_DIRECTIONS
        .iter()
        .find_map(|&(d_row, d_col)| line_through(board, row, col, d_row, d_col, seat))
}

fn line_through(
    board: &Board,
    row: usize,
    col: usize,
    d_row: i32,
    d_col: i32,
    seat: u8,
) -> Option<Vec<[usize; 2]>> {
    let mut cells = vec![[row, col]];

    let (mut r, mut c) = (row as i32 + d_row, col as i32 + d_col);
    while cells.len() < WIN_LENGTH && cell_matches(board, r, c, seat) {
        cells.push([r as usize, c as usize]);
        r += d_row;
        c += d_col;
    }

    let (mut r, mut c) = (row as i32 - d_row, col as i32 - d_col);
    while cells.len() < WIN_LENGTH && cell_matches(board, r, c, seat) {
        cells.insert(0, [r as usize, c as usize]);
        r -= d_row;
        c -= d_col;
    }

    if cells.len() >= WIN_LENGTH {
        cells.truncate(WIN_LENGTH);
        Some(cells)
    } else {
        None
    }
}

fn cell_matches(board: &Board, row: i32, col: i32, seat: u8) -> bool {
    row >= 0
        && col >= 0
        && (row as usize) < ROWS
        && (col as usize) < COLS
        && board[row as usize][col as usize] == seat
}

/// A board is full once the top row has no empty cells; gravity guarantees
/// everything below is filled too.
pub fn is_board_full(board: &Board) -> bool {
    board[0].iter().all(|&cell| cell != 0)
}

pub fn generate_player_id() -> PlayerId {
    Uuid::new_v4().to_string()
}

const GAME_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Game ids carry a creation-timestamp prefix for debuggability; uniqueness
/// comes from the random suffix, never from clock resolution.
pub fn generate_game_id() -> GameId {
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| GAME_ID_ALPHABET[rng.random_range(0..GAME_ID_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

// ---------------------------------------------------------------------------
// Client wire protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinQueue(JoinQueuePayload),
    Move(MovePayload),
    Reconnect(ReconnectPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueuePayload {
    pub username: String,
    /// A game id in a join request means the client is reconnecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovePayload {
    pub column: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPayload {
    pub username: String,
    pub game_id: GameId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    GameStart(GameStartPayload),
    GameUpdate(GameUpdatePayload),
    GameOver(GameOverPayload),
    InvalidMove(ErrorPayload),
    OpponentLeft(ErrorPayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn invalid_move(message: impl Into<String>) -> Self {
        Self::InvalidMove(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameStartPayload {
    pub game: Game,
    pub your_player_id: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdatePayload {
    pub game: Game,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameOverPayload {
    pub game: Game,
    /// Winner username; empty on a draw.
    pub winner: String,
    pub reason: GameEndReason,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Domain events consumed by downstream analytics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    #[serde(rename_all = "camelCase")]
    GameStart {
        game_id: GameId,
        player1: String,
        player2: String,
        player1_bot: bool,
        player2_bot: bool,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    GameMove {
        game_id: GameId,
        player: String,
        column: i32,
        row: usize,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    GameEnd {
        game_id: GameId,
        winner: String,
        /// Game duration in whole seconds.
        duration: i64,
        total_moves: i64,
        reason: GameEndReason,
        timestamp: DateTime<Utc>,
    },
}

impl GameEvent {
    pub fn game_id(&self) -> &str {
        match self {
            Self::GameStart { game_id, .. }
            | Self::GameMove { game_id, .. }
            | Self::GameEnd { game_id, .. } => game_id,
        }
    }
}

/// Row written to the completed-games archive when a game finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedGame {
    pub game_id: GameId,
    pub player1: String,
    pub player2: String,
    /// Winner username; empty on a draw.
    pub winner: String,
    pub duration: i64,
    pub total_moves: i64,
    pub completed_at: DateTime<Utc>,
    pub player1_is_bot: bool,
    pub player2_is_bot: bool,
}

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

use connect_common::{Board, COLS, Game, check_win_at, drop_disc, is_valid_move};
use rand::Rng;

/// Column preference when nothing tactical is on the board.
pub const CENTER_ORDER: [i32; 7] = [3, 2, 4, 1, 5, 0, 6];

/// Picks a column for the bot holding `seat`, or -1 when no move exists.
///
/// Priorities, first match wins: take an immediate win, block the
/// opponent's immediate win, create a double threat (two winning replies on
/// the next turn), block the opponent's double threat, prefer the center,
/// otherwise any valid column. Each priority scans columns left to right;
/// all simulation happens on board copies.
pub fn choose_column(game: &Game, seat: u8) -> i32 {
    let opponent = 3 - seat;

    if let Some(column) = winning_column(&game.board, seat) {
        return column;
    }
    if let Some(column) = winning_column(&game.board, opponent) {
        return column;
    }
    if let Some(column) = double_threat_column(&game.board, seat) {
        return column;
    }
    if let Some(column) = double_threat_column(&game.board, opponent) {
        return column;
    }

    for &column in &CENTER_ORDER {
        if is_valid_move(&game.board, column) {
            return column;
        }
    }

    let valid: Vec<i32> = (0..COLS as i32)
        .filter(|&column| is_valid_move(&game.board, column))
        .collect();
    if valid.is_empty() {
        return -1;
    }
    valid[rand::rng().random_range(0..valid.len())]
}

fn winning_column(board: &Board, seat: u8) -> Option<i32> {
    (0..COLS as i32).find(|&column| wins_immediately(board, column, seat))
}

fn wins_immediately(board: &Board, column: i32, seat: u8) -> bool {
    if !is_valid_move(board, column) {
        return false;
    }
    let mut probe = board.clone();
    match drop_disc(&mut probe, column, seat) {
        Ok(row) => check_win_at(&probe, row, column as usize).is_some(),
        Err(_) => false,
    }
}

/// A column that, once played by `seat`, leaves two or more distinct
/// columns winning for `seat` on the following turn.
fn double_threat_column(board: &Board, seat: u8) -> Option<i32> {
    (0..COLS as i32).find(|&column| {
        if !is_valid_move(board, column) {
            return false;
        }
        let mut probe = board.clone();
        if drop_disc(&mut probe, column, seat).is_err() {
            return false;
        }
        let followup_wins = (0..COLS as i32)
            .filter(|&next| wins_immediately(&probe, next, seat))
            .count();
        followup_wins >= 2
    })
}

//! Board model and move resolution
//!
//! The 9×9 board starts with eleven boat cells placed so that no two boat
//! groups touch orthogonally; one group belongs to each player from the
//! start. A move claims a neutral boat (and its boat neighbors) for the
//! player on turn, or sinks adjacent opponent ships; hitting an own ship or
//! a sunk cell invalidates the whole move.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::error;

use crate::error::GameError;
use crate::protocol::{NUM_DELIMITER, SEQ_DELIMITER};

/// Board edge length.
pub const BOARD_SIZE: usize = 9;

/// Boat cells on a freshly generated board.
pub const BOAT_CELLS: usize = 11;

/// Total placement retries before generation gives up on further boats.
const MAX_PLACEMENT_RETRIES: u32 = 1000;

/// One of the two players of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    One,
    Two,
}

impl Side {
    /// The opposing side.
    pub fn other(self) -> Side {
        match self {
            Side::One => Side::Two,
            Side::Two => Side::One,
        }
    }
}

/// A single board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// Open water
    Free,
    /// Neutral boat, claimable by either player
    Boat,
    /// Intact ship owned by a player
    Ship(Side),
    /// Sunk ship of a player
    Sunk(Side),
}

impl Cell {
    /// Absolute wire code: 0 free, 1/2 ships, 3 boat, -1/-2 sunk.
    fn code(self) -> i8 {
        match self {
            Cell::Free => 0,
            Cell::Ship(Side::One) => 1,
            Cell::Ship(Side::Two) => 2,
            Cell::Boat => 3,
            Cell::Sunk(Side::One) => -1,
            Cell::Sunk(Side::Two) => -2,
        }
    }

    /// Code as the given viewer sees it: neutral boats and the opponent's
    /// intact ships render as free; own ships as 1; sunks as -1 (own) or
    /// -2 (opponent).
    fn viewer_code(self, viewer: Side) -> i8 {
        match self {
            Cell::Free | Cell::Boat => 0,
            Cell::Ship(owner) => {
                if owner == viewer {
                    1
                } else {
                    0
                }
            }
            Cell::Sunk(owner) => {
                if owner == viewer {
                    -1
                } else {
                    -2
                }
            }
        }
    }

    fn is_targetable(self) -> bool {
        matches!(self, Cell::Boat | Cell::Ship(_))
    }
}

/// A board position, both coordinates already bounds-checked by the
/// command validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub row: usize,
    pub col: usize,
}

impl Pos {
    /// Orthogonal in-bounds neighbors.
    fn neighbors(self) -> Vec<Pos> {
        let mut out = Vec::with_capacity(4);
        if self.row > 0 {
            out.push(Pos { row: self.row - 1, col: self.col });
        }
        if self.row < BOARD_SIZE - 1 {
            out.push(Pos { row: self.row + 1, col: self.col });
        }
        if self.col > 0 {
            out.push(Pos { row: self.row, col: self.col - 1 });
        }
        if self.col < BOARD_SIZE - 1 {
            out.push(Pos { row: self.row, col: self.col + 1 });
        }
        out
    }
}

/// How a finished (or unfinished) game stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Both players still have live ships
    Ongoing,
    /// One player has no live ships left
    Winner(Side),
    /// Both fleets emptied on the same move; nobody wins
    Draw,
}

/// The 9×9 match board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

impl Board {
    /// An all-water board, the placeholder before a game starts.
    pub fn empty() -> Self {
        Board {
            cells: [[Cell::Free; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    fn get(&self, pos: Pos) -> Cell {
        self.cells[pos.row][pos.col]
    }

    fn set(&mut self, pos: Pos, cell: Cell) {
        self.cells[pos.row][pos.col] = cell;
    }

    /// Count of orthogonal neighbors holding any boat or ship.
    fn occupied_neighbors(&self, pos: Pos) -> usize {
        pos.neighbors()
            .into_iter()
            .filter(|&n| self.get(n).is_targetable())
            .count()
    }

    /// Generate a random legal starting board.
    ///
    /// Places a random number of two-cell boats and fills up to eleven boat
    /// cells with singles, never letting two groups touch orthogonally.
    /// One placed group is reassigned to each player as their starting ship.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut board = Board::empty();
        let mut groups: Vec<Vec<Pos>> = Vec::new();
        let mut retries = 0u32;

        let two_cell_count = rng.gen_range(0..=BOAT_CELLS / 4);

        // two-cell boats: a free cell with free surroundings plus one of its
        // equally unencumbered neighbors
        let mut placed_pairs = 0;
        while placed_pairs < two_cell_count && retries <= MAX_PLACEMENT_RETRIES {
            let anchor = Pos {
                row: rng.gen_range(0..BOARD_SIZE),
                col: rng.gen_range(0..BOARD_SIZE),
            };
            if board.get(anchor) != Cell::Free || board.occupied_neighbors(anchor) != 0 {
                retries += 1;
                continue;
            }

            let candidates: Vec<Pos> = anchor
                .neighbors()
                .into_iter()
                .filter(|&n| board.get(n) == Cell::Free && board.occupied_neighbors(n) == 0)
                .collect();

            match candidates.choose(&mut rng) {
                Some(&second) => {
                    board.set(anchor, Cell::Boat);
                    board.set(second, Cell::Boat);
                    groups.push(vec![anchor, second]);
                    placed_pairs += 1;
                }
                None => retries += 1,
            }
        }

        // single-cell boats for the remaining budget
        let singles = BOAT_CELLS - 2 * placed_pairs;
        let mut placed_singles = 0;
        while placed_singles < singles && retries <= MAX_PLACEMENT_RETRIES {
            let pos = Pos {
                row: rng.gen_range(0..BOARD_SIZE),
                col: rng.gen_range(0..BOARD_SIZE),
            };
            if board.get(pos) != Cell::Free || board.occupied_neighbors(pos) != 0 {
                retries += 1;
                continue;
            }
            board.set(pos, Cell::Boat);
            groups.push(vec![pos]);
            placed_singles += 1;
        }

        if retries > MAX_PLACEMENT_RETRIES {
            error!(
                "board generation gave up after {} retries with {} groups placed",
                MAX_PLACEMENT_RETRIES,
                groups.len()
            );
        }

        // each player starts owning one of the placed groups
        while groups.len() < 2 {
            if let Some(pos) = board.first_free_cell() {
                board.set(pos, Cell::Boat);
                groups.push(vec![pos]);
            } else {
                break;
            }
        }

        let idx = rng.gen_range(0..groups.len());
        let player_one_cells = groups.swap_remove(idx);
        for pos in player_one_cells {
            board.set(pos, Cell::Ship(Side::One));
        }

        let idx = rng.gen_range(0..groups.len());
        let player_two_cells = groups.swap_remove(idx);
        for pos in player_two_cells {
            board.set(pos, Cell::Ship(Side::Two));
        }

        board
    }

    fn first_free_cell(&self) -> Option<Pos> {
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                let pos = Pos { row, col };
                if self.get(pos) == Cell::Free {
                    return Some(pos);
                }
            }
        }
        None
    }

    /// Resolve a move by `side` at `pos`.
    ///
    /// The target set is the center cell plus every orthogonal neighbor
    /// holding a boat or a ship, provided the center holds one itself.
    /// Neutral boats in the set become the mover's ships, opponent ships
    /// become sunk. An own ship anywhere in the set, or a sunk center,
    /// fails the whole move with no mutation.
    pub fn apply_move(&mut self, side: Side, pos: Pos) -> Result<(), GameError> {
        let center = self.get(pos);

        if let Cell::Sunk(_) = center {
            return Err(GameError::InvalidMove);
        }

        let mut targets = Vec::with_capacity(5);
        if center.is_targetable() {
            targets.push(pos);
            for neighbor in pos.neighbors() {
                if self.get(neighbor).is_targetable() {
                    targets.push(neighbor);
                }
            }
        }

        // validate first so a refused move leaves every cell untouched
        if targets.iter().any(|&t| self.get(t) == Cell::Ship(side)) {
            return Err(GameError::InvalidMove);
        }

        for target in targets {
            match self.get(target) {
                Cell::Boat => self.set(target, Cell::Ship(side)),
                Cell::Ship(owner) => self.set(target, Cell::Sunk(owner)),
                _ => {}
            }
        }

        Ok(())
    }

    /// Whether the game is over and who won.
    pub fn outcome(&self) -> Outcome {
        let mut live_one = 0;
        let mut live_two = 0;
        for row in &self.cells {
            for cell in row {
                match cell {
                    Cell::Ship(Side::One) => live_one += 1,
                    Cell::Ship(Side::Two) => live_two += 1,
                    _ => {}
                }
            }
        }

        match (live_one, live_two) {
            (0, 0) => Outcome::Draw,
            (0, _) => Outcome::Winner(Side::Two),
            (_, 0) => Outcome::Winner(Side::One),
            _ => Outcome::Ongoing,
        }
    }

    /// The board as the given player may see it: rows joined by `,`,
    /// cells by `:`, with hidden cells rendered as free.
    pub fn projection(&self, viewer: Side) -> String {
        let rows: Vec<String> = self
            .cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.viewer_code(viewer).to_string())
                    .collect::<Vec<_>>()
                    .join(&NUM_DELIMITER.to_string())
            })
            .collect();
        rows.join(&SEQ_DELIMITER.to_string())
    }

    /// Full unmasked rendering for debug logs, one row per line.
    pub fn render(&self) -> String {
        let rows: Vec<String> = self
            .cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.code().to_string())
                    .collect::<Vec<_>>()
                    .join(&NUM_DELIMITER.to_string())
            })
            .collect();
        rows.join("\n")
    }

    /// Count of cells still holding a neutral boat or a live ship.
    pub fn live_cells(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|c| c.is_targetable())
            .count()
    }

    #[cfg(test)]
    pub fn from_codes(codes: [[i8; BOARD_SIZE]; BOARD_SIZE]) -> Self {
        let mut board = Board::empty();
        for (r, row) in codes.iter().enumerate() {
            for (c, &code) in row.iter().enumerate() {
                let cell = match code {
                    0 => Cell::Free,
                    1 => Cell::Ship(Side::One),
                    2 => Cell::Ship(Side::Two),
                    3 => Cell::Boat,
                    -1 => Cell::Sunk(Side::One),
                    -2 => Cell::Sunk(Side::Two),
                    _ => panic!("bad cell code {}", code),
                };
                board.cells[r][c] = cell;
            }
        }
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_codes() -> [[i8; BOARD_SIZE]; BOARD_SIZE] {
        [[0; BOARD_SIZE]; BOARD_SIZE]
    }

    #[test]
    fn test_generation_invariants() {
        for _ in 0..50 {
            let board = Board::generate();

            let mut boat_cells = 0;
            let mut one_cells = Vec::new();
            let mut two_cells = Vec::new();
            for row in 0..BOARD_SIZE {
                for col in 0..BOARD_SIZE {
                    match board.get(Pos { row, col }) {
                        Cell::Boat => boat_cells += 1,
                        Cell::Ship(Side::One) => one_cells.push(Pos { row, col }),
                        Cell::Ship(Side::Two) => two_cells.push(Pos { row, col }),
                        _ => {}
                    }
                }
            }

            assert_eq!(boat_cells + one_cells.len() + two_cells.len(), BOAT_CELLS);
            assert!((1..=2).contains(&one_cells.len()));
            assert!((1..=2).contains(&two_cells.len()));
        }
    }

    #[test]
    fn test_generation_no_adjacent_groups() {
        for _ in 0..50 {
            let board = Board::generate();
            // each occupied cell may only touch cells of the same owner, and
            // at most one of them (groups are at most two cells long)
            for row in 0..BOARD_SIZE {
                for col in 0..BOARD_SIZE {
                    let pos = Pos { row, col };
                    let cell = board.get(pos);
                    if !cell.is_targetable() {
                        continue;
                    }
                    let occupied: Vec<Cell> = pos
                        .neighbors()
                        .into_iter()
                        .map(|n| board.get(n))
                        .filter(|c| c.is_targetable())
                        .collect();
                    assert!(occupied.len() <= 1, "cell {:?} touches {} groups", pos, occupied.len());
                    for n in occupied {
                        assert_eq!(n, cell, "adjacent cells belong to different groups");
                    }
                }
            }
        }
    }

    #[test]
    fn test_move_on_own_ship_fails_without_mutation() {
        let mut codes = empty_codes();
        codes[4][4] = 1;
        codes[4][5] = 3;
        let mut board = Board::from_codes(codes);
        let before = board.clone();

        let result = board.apply_move(Side::One, Pos { row: 4, col: 4 });
        assert_eq!(result, Err(GameError::InvalidMove));
        assert_eq!(board, before);
    }

    #[test]
    fn test_move_on_neighboring_own_ship_fails_without_mutation() {
        let mut codes = empty_codes();
        codes[4][4] = 3;
        codes[4][5] = 1;
        let mut board = Board::from_codes(codes);
        let before = board.clone();

        let result = board.apply_move(Side::One, Pos { row: 4, col: 4 });
        assert_eq!(result, Err(GameError::InvalidMove));
        assert_eq!(board, before);
    }

    #[test]
    fn test_move_on_sunk_cell_fails_without_mutation() {
        let mut codes = empty_codes();
        codes[2][2] = -2;
        let mut board = Board::from_codes(codes);
        let before = board.clone();

        let result = board.apply_move(Side::One, Pos { row: 2, col: 2 });
        assert_eq!(result, Err(GameError::InvalidMove));
        assert_eq!(board, before);
    }

    #[test]
    fn test_move_on_free_cell_is_a_noop() {
        let mut codes = empty_codes();
        codes[0][0] = 3;
        let mut board = Board::from_codes(codes);
        let before = board.clone();

        assert!(board.apply_move(Side::One, Pos { row: 5, col: 5 }).is_ok());
        assert_eq!(board, before);
    }

    #[test]
    fn test_move_claims_boat_cluster_atomically() {
        // center boat with a neutral above and an opponent ship below
        let mut codes = empty_codes();
        codes[4][4] = 3;
        codes[3][4] = 3;
        codes[5][4] = 2;
        let mut board = Board::from_codes(codes);

        assert!(board.apply_move(Side::One, Pos { row: 4, col: 4 }).is_ok());
        assert_eq!(board.get(Pos { row: 4, col: 4 }), Cell::Ship(Side::One));
        assert_eq!(board.get(Pos { row: 3, col: 4 }), Cell::Ship(Side::One));
        assert_eq!(board.get(Pos { row: 5, col: 4 }), Cell::Sunk(Side::Two));
    }

    #[test]
    fn test_move_sinks_opponent_center() {
        let mut codes = empty_codes();
        codes[4][4] = 2;
        let mut board = Board::from_codes(codes);

        assert!(board.apply_move(Side::One, Pos { row: 4, col: 4 }).is_ok());
        assert_eq!(board.get(Pos { row: 4, col: 4 }), Cell::Sunk(Side::Two));
    }

    #[test]
    fn test_live_cells_non_increasing() {
        let mut board = Board::generate();
        let mut previous = board.live_cells();
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let pos = Pos {
                row: rng.gen_range(0..BOARD_SIZE),
                col: rng.gen_range(0..BOARD_SIZE),
            };
            let side = if rng.gen_bool(0.5) { Side::One } else { Side::Two };
            if board.apply_move(side, pos).is_ok() {
                let now = board.live_cells();
                assert!(now <= previous);
                previous = now;
            }
        }
    }

    #[test]
    fn test_outcome() {
        let mut codes = empty_codes();
        codes[0][0] = 1;
        codes[8][8] = 2;
        assert_eq!(Board::from_codes(codes).outcome(), Outcome::Ongoing);

        let mut codes = empty_codes();
        codes[0][0] = 1;
        codes[8][8] = -2;
        assert_eq!(Board::from_codes(codes).outcome(), Outcome::Winner(Side::One));

        let mut codes = empty_codes();
        codes[0][0] = -1;
        codes[8][8] = 2;
        assert_eq!(Board::from_codes(codes).outcome(), Outcome::Winner(Side::Two));

        let mut codes = empty_codes();
        codes[0][0] = -1;
        codes[8][8] = -2;
        assert_eq!(Board::from_codes(codes).outcome(), Outcome::Draw);
    }

    #[test]
    fn test_projection_hides_hidden_cells() {
        let mut codes = empty_codes();
        codes[0][0] = 1;
        codes[0][1] = 2;
        codes[0][2] = 3;
        codes[0][3] = -1;
        codes[0][4] = -2;
        let board = Board::from_codes(codes);

        let p1 = board.projection(Side::One);
        let first_row: Vec<&str> = p1.split(',').next().unwrap().split(':').collect();
        assert_eq!(&first_row[..5], &["1", "0", "0", "-1", "-2"]);

        let p2 = board.projection(Side::Two);
        let first_row: Vec<&str> = p2.split(',').next().unwrap().split(':').collect();
        assert_eq!(&first_row[..5], &["0", "1", "0", "-2", "-1"]);
    }

    #[test]
    fn test_projection_shape() {
        let board = Board::empty();
        let projection = board.projection(Side::One);
        let rows: Vec<&str> = projection.split(',').collect();
        assert_eq!(rows.len(), BOARD_SIZE);
        for row in rows {
            assert_eq!(row.split(':').count(), BOARD_SIZE);
        }
    }
}

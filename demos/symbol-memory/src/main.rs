use std::time::Duration;

use metamind::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Game types
// ---------------------------------------------------------------------------

const SYMBOLS: [&str; 12] = [
    "■", "●", "▲", "◆", "★", "♦", "♥", "♣", "♠", "⬡", "⬢", "⌘",
];

const HIDDEN_DURATION: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Memorize,
    Hidden,
    Compare,
    Feedback,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Memorize => "memorize",
            Self::Hidden => "hidden",
            Self::Compare => "compare",
            Self::Feedback => "feedback",
        }
    }
}

type Grid = Vec<Vec<&'static str>>;

/// Show a pattern, hide it, show it again (maybe changed), ask whether it
/// changed.
struct SymbolMemory {
    rng: StdRng,
    difficulty: u64,
    score: u64,
    total_rounds: u64,
    correct_rounds: u64,
    phase: Phase,
    phase_elapsed: Duration,
    original: Grid,
    modified: Grid,
    message: String,
}

impl SymbolMemory {
    /// Parameters: `difficulty` (1-10, default 3) and an optional `seed`.
    fn from_params(
        params: &Snapshot,
    ) -> Result<Box<dyn TrainingModule>, ModuleError> {
        let difficulty = match params.get("difficulty") {
            None => 3,
            Some(v) => v
                .as_u64()
                .filter(|d| (1..=10).contains(d))
                .ok_or_else(|| ModuleError::InvalidParameter {
                    name: "difficulty".into(),
                    reason: "must be an integer from 1 to 10".into(),
                })?,
        };
        let rng = match params.get("seed").and_then(Value::as_u64) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Box::new(Self::new(difficulty, rng)))
    }

    fn new(difficulty: u64, rng: StdRng) -> Self {
        let mut game = Self {
            rng,
            difficulty,
            score: 0,
            total_rounds: 0,
            correct_rounds: 0,
            phase: Phase::Memorize,
            phase_elapsed: Duration::ZERO,
            original: Vec::new(),
            modified: Vec::new(),
            message: String::new(),
        };
        game.start_round();
        game
    }

    fn grid_size(&self) -> usize {
        (3 + (self.difficulty as usize - 1) / 3).min(6)
    }

    fn memorize_duration(&self) -> Duration {
        let secs = 6.0 - (self.difficulty - 1) as f64 * 0.4;
        Duration::from_secs_f64(secs.max(2.0))
    }

    fn was_modified(&self) -> bool {
        self.original != self.modified
    }

    fn start_round(&mut self) {
        let size = self.grid_size();
        let cells = size * size;
        let wanted = (cells as f64 * (0.3 + 0.05 * self.difficulty as f64))
            as usize;
        let count = wanted.clamp(3, cells);

        let mut grid: Grid = vec![vec![""; size]; size];
        let mut placed = 0;
        while placed < count {
            let (row, col) = self.random_cell(size);
            if grid[row][col].is_empty() {
                grid[row][col] = self.random_symbol();
                placed += 1;
            }
        }

        self.modified = self.maybe_modify(&grid);
        self.original = grid;
        self.phase = Phase::Memorize;
        self.phase_elapsed = Duration::ZERO;
        self.message = "Memorize the pattern".into();
    }

    /// Half the time returns the grid unchanged; otherwise changes, adds,
    /// or removes one symbol.
    fn maybe_modify(&mut self, grid: &Grid) -> Grid {
        let mut out = grid.clone();
        if self.rng.random_bool(0.5) {
            return out;
        }

        let size = grid.len();
        let filled: Vec<(usize, usize)> = (0..size)
            .flat_map(|r| (0..size).map(move |c| (r, c)))
            .filter(|&(r, c)| !grid[r][c].is_empty())
            .collect();

        match self.rng.random_range(0..3) {
            0 => {
                let (row, col) = filled[self.rng.random_range(0..filled.len())];
                let current = grid[row][col];
                let mut symbol = current;
                while symbol == current {
                    symbol = self.random_symbol();
                }
                out[row][col] = symbol;
            }
            1 => {
                for _ in 0..10 {
                    let (row, col) = self.random_cell(size);
                    if grid[row][col].is_empty() {
                        out[row][col] = self.random_symbol();
                        break;
                    }
                }
            }
            _ => {
                let (row, col) = filled[self.rng.random_range(0..filled.len())];
                out[row][col] = "";
            }
        }
        out
    }

    fn random_cell(&mut self, size: usize) -> (usize, usize) {
        (self.rng.random_range(0..size), self.rng.random_range(0..size))
    }

    fn random_symbol(&mut self) -> &'static str {
        SYMBOLS[self.rng.random_range(0..SYMBOLS.len())]
    }

    fn answer(&mut self, said_modified: bool) -> Value {
        let modified = self.was_modified();
        let correct = said_modified == modified;
        let round_score = if correct { 10 * self.difficulty } else { 0 };

        self.score += round_score;
        self.total_rounds += 1;
        if correct {
            self.correct_rounds += 1;
        }
        self.message = format!(
            "{} The pattern {}",
            if correct { "Correct!" } else { "Incorrect!" },
            if modified { "was modified" } else { "was not modified" },
        );
        self.phase = Phase::Feedback;
        self.phase_elapsed = Duration::ZERO;

        json!({ "correct": correct, "round_score": round_score })
    }

    fn next_round(&mut self) -> Value {
        // Level up every third round at 80% accuracy.
        if self.total_rounds % 3 == 0
            && self.correct_rounds * 5 >= self.total_rounds * 4
            && self.difficulty < 10
        {
            self.difficulty += 1;
            tracing::debug!(difficulty = self.difficulty, "level up");
        }
        self.start_round();
        json!({ "level": self.difficulty })
    }

    fn ignored(&self) -> Value {
        json!({ "ignored": true, "phase": self.phase.as_str() })
    }
}

impl TrainingModule for SymbolMemory {
    fn get_state(&self) -> Result<Snapshot, ModuleError> {
        let size = self.grid_size();
        let grid = match self.phase {
            Phase::Memorize => self.original.clone(),
            Phase::Hidden => vec![vec![""; size]; size],
            Phase::Compare | Phase::Feedback => self.modified.clone(),
        };

        let Value::Object(state) = json!({
            "phase": self.phase.as_str(),
            "message": self.message,
            "score": self.score,
            "level": self.difficulty,
            "grid": { "size": size, "cells": grid },
            "rounds": {
                "total": self.total_rounds,
                "correct": self.correct_rounds,
            },
        }) else {
            return Err(ModuleError::failed("state is not an object"));
        };
        Ok(state)
    }

    fn update(&mut self, dt: Duration) -> Result<(), ModuleError> {
        self.phase_elapsed += dt;
        match self.phase {
            Phase::Memorize if self.phase_elapsed >= self.memorize_duration() => {
                self.phase = Phase::Hidden;
                self.phase_elapsed = Duration::ZERO;
                self.message = "Remember the pattern...".into();
            }
            Phase::Hidden if self.phase_elapsed >= HIDDEN_DURATION => {
                self.phase = Phase::Compare;
                self.phase_elapsed = Duration::ZERO;
                self.message = "Did the pattern change?".into();
            }
            _ => {}
        }
        Ok(())
    }

    fn click_handler(&mut self) -> Option<&mut dyn ClickHandler> {
        Some(self)
    }

    fn key_handler(&mut self) -> Option<&mut dyn KeyHandler> {
        Some(self)
    }
}

/// Buttons on the 1024x768 layout the clients draw.
impl ClickHandler for SymbolMemory {
    fn handle_click(&mut self, x: i32, y: i32) -> Result<Value, ModuleError> {
        let in_row = (550..=600).contains(&y);
        Ok(match self.phase {
            Phase::Compare if in_row && (300..=400).contains(&x) => {
                self.answer(true)
            }
            Phase::Compare if in_row && (624..=724).contains(&x) => {
                self.answer(false)
            }
            Phase::Feedback if in_row && (462..=562).contains(&x) => {
                self.next_round()
            }
            _ => self.ignored(),
        })
    }
}

impl KeyHandler for SymbolMemory {
    fn handle_key(&mut self, key: &str) -> Result<Value, ModuleError> {
        Ok(match (self.phase, key) {
            (Phase::Compare, "y") => self.answer(true),
            (Phase::Compare, "n") => self.answer(false),
            (Phase::Feedback, "space" | "return") => self.next_round(),
            _ => self.ignored(),
        })
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    metamind::init_logging();

    let addr = std::env::var("METAMIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8765".to_string());

    let server = MetamindServer::builder()
        .bind(&addr)
        .module(
            "symbol_memory",
            "Spot whether a grid of symbols changed",
            SymbolMemory::from_params,
        )
        .build()
        .await?;

    tracing::info!(%addr, "symbol memory server listening");
    server.run().await?;
    Ok(())
}

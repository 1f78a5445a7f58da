use std::collections::HashMap;

use crate::config::{Config, Variant};
use crate::error::{Error, Result};
use crate::probs::ProbTable;
use crate::state::{Action, State, StateIterator};

/// Fee for moving `action` cars overnight.
///
/// In the extended variant one employee shuttles a single car from A to B
/// for free, so the first A->B car costs nothing.
pub fn transfer_fee(action: Action, unit_cost: f64, variant: Variant) -> f64 {
    match variant {
        Variant::Original => f64::from(action.abs()) * unit_cost,
        Variant::Extended => {
            if action > 0 {
                f64::from(action - 1) * unit_cost
            } else {
                f64::from(action.abs()) * unit_cost
            }
        }
    }
}

/// Overnight parking fee for an end-of-day state. A flat fee applies per
/// location holding more cars than fit on the free lot; the original
/// variant has no such fee.
pub fn parking_fee(next: State, config: &Config) -> f64 {
    if config.variant() == Variant::Original {
        return 0.0;
    }
    let mut fee = 0.0;
    if next.a > config.parking_threshold {
        fee += config.parking_fee;
    }
    if next.b > config.parking_threshold {
        fee += config.parking_fee;
    }
    fee
}

/// One valid (state, action) pair with its pseudo-state and transfer fee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRow {
    pub state: State,
    pub action: Action,
    pub pseudo: State,
    pub fee: f64,
}

/// Every valid (state, action, pseudo-state, fee) tuple, indexed for O(1)
/// lookup by (state, action) and by state.
///
/// For a fixed state each valid action appears exactly once. Built in
/// row-major state order with actions ascending, so two builds from the
/// same configuration are identical.
pub struct TransferTable {
    rows: Vec<TransferRow>,
    index: HashMap<(State, Action), usize>,
    actions: HashMap<State, Vec<Action>>,
}

impl TransferTable {
    pub fn build(config: &Config) -> TransferTable {
        let max_transfer = config.max_transfer as i8;
        let mut rows = Vec::new();
        for state in StateIterator::new(config.min_cars, config.capacity_a, config.capacity_b) {
            for action in -max_transfer..=max_transfer {
                let Some(pseudo) = state.apply_transfer(
                    action,
                    config.min_cars,
                    config.capacity_a,
                    config.capacity_b,
                ) else {
                    continue;
                };
                let fee = transfer_fee(action, config.transfer_unit_cost, config.variant());
                rows.push(TransferRow { state, action, pseudo, fee });
            }
        }
        TransferTable::from_rows(rows)
    }

    /// Rebuild the lookup indices from a row listing (fresh build or a
    /// table reloaded from a checkpoint).
    pub fn from_rows(rows: Vec<TransferRow>) -> TransferTable {
        let mut index = HashMap::with_capacity(rows.len());
        let mut actions: HashMap<State, Vec<Action>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            index.insert((row.state, row.action), i);
            actions.entry(row.state).or_default().push(row.action);
        }
        TransferTable { rows, index, actions }
    }

    pub fn rows(&self) -> &[TransferRow] {
        &self.rows
    }

    /// The row for one (state, action) pair. A miss is a table
    /// construction bug, never a silent default.
    pub fn lookup(&self, state: State, action: Action) -> Result<&TransferRow> {
        self.index
            .get(&(state, action))
            .map(|&i| &self.rows[i])
            .ok_or_else(|| {
                Error::MissingRow(format!("no transfer row for state {state}, action {action}"))
            })
    }

    /// Legal actions for a state, ascending.
    pub fn legal_actions(&self, state: State) -> Result<&[Action]> {
        self.actions
            .get(&state)
            .map(|a| a.as_slice())
            .ok_or_else(|| Error::MissingRow(format!("no actions for state {state}")))
    }
}

/// One (rentals, returns) combination reachable from a pseudo-state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRow {
    pub rentals_a: u8,
    pub rentals_b: u8,
    pub returns_a: u8,
    pub returns_b: u8,
    /// p(s', r | pseudo-state), product of the four truncated Poisson terms.
    pub probability: f64,
    /// Rental revenue for this combination.
    pub reward: f64,
    /// Overnight parking fee incurred at the end-of-day state.
    pub parking_fee: f64,
    pub next: State,
}

/// All reachable daily outcomes, grouped by pseudo-state.
///
/// Per pseudo-state the rows cover every rentals/returns combination the
/// lot bounds allow, and their probabilities sum to 1.
pub struct TransitionTable {
    groups: HashMap<State, Vec<TransitionRow>>,
}

impl TransitionTable {
    pub fn build(config: &Config, probs: &ProbTable) -> TransitionTable {
        let mut groups = HashMap::new();
        for pseudo in StateIterator::new(config.min_cars, config.capacity_a, config.capacity_b) {
            let mut rows = Vec::new();
            // Rentals are capped by cars present, returns by remaining room.
            for rentals_a in 0..=pseudo.a {
                for rentals_b in 0..=pseudo.b {
                    for returns_a in 0..=(config.capacity_a - pseudo.a) {
                        for returns_b in 0..=(config.capacity_b - pseudo.b) {
                            let next = State::new(
                                pseudo.a - rentals_a + returns_a,
                                pseudo.b - rentals_b + returns_b,
                            );
                            let probability = probs
                                .joint_prob(pseudo, rentals_a, rentals_b, returns_a, returns_b);
                            let reward = f64::from(rentals_a + rentals_b)
                                * config.reward_per_rental;
                            rows.push(TransitionRow {
                                rentals_a,
                                rentals_b,
                                returns_a,
                                returns_b,
                                probability,
                                reward,
                                parking_fee: parking_fee(next, config),
                                next,
                            });
                        }
                    }
                }
            }
            groups.insert(pseudo, rows);
        }
        TransitionTable { groups }
    }

    pub fn from_groups(groups: HashMap<State, Vec<TransitionRow>>) -> TransitionTable {
        TransitionTable { groups }
    }

    /// Daily outcomes for one pseudo-state. A miss is a table
    /// construction bug.
    pub fn transitions(&self, pseudo: State) -> Result<&[TransitionRow]> {
        self.groups
            .get(&pseudo)
            .map(|rows| rows.as_slice())
            .ok_or_else(|| Error::MissingRow(format!("no transitions for pseudo-state {pseudo}")))
    }

    pub fn groups(&self) -> &HashMap<State, Vec<TransitionRow>> {
        &self.groups
    }
}

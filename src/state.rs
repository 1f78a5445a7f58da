use std::fmt;
use std::iter::Iterator;

use crate::error::{Error, Result};

/// Signed car-transfer count. Positive moves cars from location A to B.
pub type Action = i8;

/// Number of cars at each location at the start of a day.
///
/// Also used for pseudo-states (the lot counts after the overnight
/// transfer, before that day's rentals and returns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State {
    /// Cars at location A.
    pub a: u8,
    /// Cars at location B.
    pub b: u8,
}

impl State {
    pub fn new(a: u8, b: u8) -> State {
        State { a, b }
    }

    /// Canonical string key, e.g. `(3, 12)` encodes as `"03_12"`.
    ///
    /// Used only at the persistence boundary; in-memory lookups key on
    /// the struct itself.
    pub fn encode(&self) -> String {
        format!("{:02}_{:02}", self.a, self.b)
    }

    /// Parse the `"AA_BB"` form back into a state.
    pub fn parse(key: &str) -> Result<State> {
        let bad = || Error::BadStateKey { key: key.to_string() };
        let (a, b) = key.split_once('_').ok_or_else(bad)?;
        let a = a.parse::<u8>().map_err(|_| bad())?;
        let b = b.parse::<u8>().map_err(|_| bad())?;
        Ok(State { a, b })
    }

    /// Pseudo-state reached by moving `action` cars from A to B.
    /// `None` if either lot would leave `[min, max]`.
    pub fn apply_transfer(
        &self, action: Action, min: u8, max_a: u8, max_b: u8,
    ) -> Option<State> {
        let pa = self.a as i16 - action as i16;
        let pb = self.b as i16 + action as i16;
        if pa < min as i16 || pa > max_a as i16 || pb < min as i16 || pb > max_b as i16 {
            return None;
        }
        Some(State { a: pa as u8, b: pb as u8 })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(a: {}, b: {})", self.a, self.b)
    }
}

/// Iterates every state in row-major order: (0,0), (0,1), ..., (max_a, max_b).
///
/// Table builds and value sweeps both rely on this order, so it is part
/// of the observable behavior (Gauss-Seidel sweeps are order-dependent).
pub struct StateIterator {
    a: u8,
    b: u8,
    min: u8,
    max_a: u8,
    max_b: u8,
    done: bool,
}

impl StateIterator {
    pub fn new(min: u8, max_a: u8, max_b: u8) -> StateIterator {
        StateIterator { a: min, b: min, min, max_a, max_b, done: false }
    }
}

impl Iterator for StateIterator {
    type Item = State;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let state = State { a: self.a, b: self.b };
        if self.b < self.max_b {
            self.b += 1;
        } else if self.a < self.max_a {
            self.b = self.min;
            self.a += 1;
        } else {
            self.done = true;
        }
        Some(state)
    }
}

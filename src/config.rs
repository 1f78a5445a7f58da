use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Problem variant. The original problem is Example 4.2; the extended
/// problem (Exercise 4.7) adds the free employee shuttle and overnight
/// parking fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Original,
    Extended,
}

impl Variant {
    /// Checkpoint subdirectory, so the two variants never collide on disk.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Variant::Original => "original",
            Variant::Extended => "extended",
        }
    }
}

/// Hold information read from the TOML configuration file.
///
/// All components read their parameters from here; there is no other
/// source of problem constants.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Solve the original problem (true) or the extended variant (false).
    pub original_problem: bool,
    /// Whether to write checkpoints to disk at all.
    pub use_disk_cache: bool,
    /// Whether to try loading cached SASP/transition tables before building.
    pub load_cached_data: bool,
    /// Whether to try resuming policy/value tables from checkpoints.
    pub load_cached_model: bool,
    /// Sequence number of the policy checkpoint to resume from; -1 for none.
    pub policy_seq_nr: i32,
    /// Sequence number of the value checkpoint to resume from; -1 for none.
    pub value_seq_nr: i32,

    /// Smallest lot count (normally 0).
    pub min_cars: u8,
    /// Largest lot count at location A.
    pub capacity_a: u8,
    /// Largest lot count at location B.
    pub capacity_b: u8,
    /// Largest overnight transfer in either direction.
    pub max_transfer: u8,
    /// Cost per car transferred overnight.
    pub transfer_unit_cost: f64,

    /// Expected rentals per day at each location.
    pub rental_rate_a: f64,
    pub rental_rate_b: f64,
    /// Expected returns per day at each location.
    pub return_rate_a: f64,
    pub return_rate_b: f64,

    /// Revenue per car rented.
    pub reward_per_rental: f64,
    /// Flat overnight fee per location above the parking threshold
    /// (extended variant only).
    pub parking_fee: f64,
    /// Lot count above which the parking fee applies.
    pub parking_threshold: u8,

    /// Discount factor.
    pub gamma: f64,
    /// Softness of the epsilon-soft policy.
    pub epsilon: f64,
    /// Convergence threshold for sweep deltas.
    pub theta: f64,

    /// Directory for checkpoint files.
    pub data_dir: PathBuf,
}

impl Config {
    /// Textbook defaults for the original problem (Example 4.2).
    pub fn original() -> Config {
        Config {
            original_problem: true,
            use_disk_cache: false,
            load_cached_data: false,
            load_cached_model: false,
            policy_seq_nr: -1,
            value_seq_nr: -1,
            min_cars: 0,
            capacity_a: 20,
            capacity_b: 20,
            max_transfer: 5,
            transfer_unit_cost: 2.0,
            rental_rate_a: 3.0,
            rental_rate_b: 4.0,
            return_rate_a: 3.0,
            return_rate_b: 2.0,
            reward_per_rental: 10.0,
            parking_fee: 4.0,
            parking_threshold: 10,
            gamma: 0.9,
            epsilon: 0.1,
            theta: 0.5,
            data_dir: PathBuf::from("data"),
        }
    }

    /// Textbook defaults for the extended problem (Exercise 4.7).
    pub fn extended() -> Config {
        Config {
            original_problem: false,
            theta: 1.0,
            ..Config::original()
        }
    }

    pub fn variant(&self) -> Variant {
        if self.original_problem {
            Variant::Original
        } else {
            Variant::Extended
        }
    }

    /// Fail fast on parameter combinations the solver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.theta <= 0.0 {
            return Err(Error::Config(format!("theta must be > 0, got {}", self.theta)));
        }
        if !(0.0..1.0).contains(&self.epsilon) {
            return Err(Error::Config(format!(
                "epsilon must be in [0, 1), got {}",
                self.epsilon
            )));
        }
        if self.gamma <= 0.0 || self.gamma > 1.0 {
            return Err(Error::Config(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        if self.capacity_a < self.min_cars || self.capacity_b < self.min_cars {
            return Err(Error::Config(format!(
                "capacities ({}, {}) must be >= min_cars ({})",
                self.capacity_a, self.capacity_b, self.min_cars
            )));
        }
        // Lot counts and transfers must survive the u8/i8 arithmetic in
        // the table builders.
        if self.capacity_a > 254 || self.capacity_b > 254 {
            return Err(Error::Config(format!(
                "capacities ({}, {}) must be <= 254",
                self.capacity_a, self.capacity_b
            )));
        }
        if self.max_transfer > 127 {
            return Err(Error::Config(format!(
                "max_transfer ({}) must be <= 127",
                self.max_transfer
            )));
        }
        if self.max_transfer > self.capacity_a.min(self.capacity_b) {
            return Err(Error::Config(format!(
                "max_transfer ({}) exceeds smallest capacity",
                self.max_transfer
            )));
        }
        for (name, rate) in [
            ("rental_rate_a", self.rental_rate_a),
            ("rental_rate_b", self.rental_rate_b),
            ("return_rate_a", self.return_rate_a),
            ("return_rate_b", self.return_rate_b),
        ] {
            if rate <= 0.0 {
                return Err(Error::Config(format!("{name} must be > 0, got {rate}")));
            }
        }
        if self.load_cached_model && self.policy_seq_nr >= 0 && self.value_seq_nr >= 0 {
            // Resuming mid-run requires knowing which phase finished last.
            if (self.policy_seq_nr - self.value_seq_nr).abs() != 1 {
                return Err(Error::Config(format!(
                    "policy_seq_nr ({}) and value_seq_nr ({}) must differ by exactly 1",
                    self.policy_seq_nr, self.value_seq_nr
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textbook_defaults_are_valid() {
        assert!(Config::original().validate().is_ok());
        assert!(Config::extended().validate().is_ok());
    }

    #[test]
    fn variant_follows_problem_flag() {
        assert_eq!(Config::original().variant(), Variant::Original);
        assert_eq!(Config::extended().variant(), Variant::Extended);
    }

    #[test]
    fn rejects_nonpositive_theta() {
        let mut config = Config::original();
        config.theta = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_epsilon_of_one() {
        let mut config = Config::original();
        config.epsilon = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_capacity_beyond_u8_arithmetic() {
        let mut config = Config::original();
        config.capacity_a = 255;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_transfer_beyond_i8_range() {
        let mut config = Config::original();
        config.capacity_a = 254;
        config.capacity_b = 254;
        config.max_transfer = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_transfer_larger_than_lot() {
        let mut config = Config::original();
        config.capacity_b = 3;
        config.max_transfer = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_nonadjacent_resume_sequence_numbers() {
        let mut config = Config::original();
        config.load_cached_model = true;
        config.policy_seq_nr = 5;
        config.value_seq_nr = 2;
        assert!(config.validate().is_err());
    }
}

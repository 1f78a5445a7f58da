use statrs::distribution::{Discrete, DiscreteCDF, Poisson};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::State;

/// Which of the two rental locations a probability refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    A,
    B,
}

/// Rental and return probabilities for both locations.
///
/// Precalculated once at engine setup and immutable afterwards. Indices
/// into the four tables are [cars on lot, number of cars rented or
/// returned]. The Poisson distribution is truncated at the lot boundary:
/// renting every car on the lot means "that many customers or more", so
/// the boundary cell absorbs the tail mass (1 - CDF) and each row sums
/// to exactly 1.
pub struct ProbTable {
    max_a: u8,
    max_b: u8,
    /// Location A rental probs, indexed [cars on lot, cars rented].
    rent_a: ndarray::Array2<f64>,
    /// Location A return probs, indexed [cars on lot, cars returned].
    return_a: ndarray::Array2<f64>,
    /// Location B rental probs, indexed [cars on lot, cars rented].
    rent_b: ndarray::Array2<f64>,
    /// Location B return probs, indexed [cars on lot, cars returned].
    return_b: ndarray::Array2<f64>,
}

impl ProbTable {
    pub fn new(config: &Config) -> Result<ProbTable> {
        Ok(ProbTable {
            max_a: config.capacity_a,
            max_b: config.capacity_b,
            rent_a: ProbTable::calc_rent_probs(config.rental_rate_a, config.capacity_a)?,
            return_a: ProbTable::calc_return_probs(config.return_rate_a, config.capacity_a)?,
            rent_b: ProbTable::calc_rent_probs(config.rental_rate_b, config.capacity_b)?,
            return_b: ProbTable::calc_return_probs(config.return_rate_b, config.capacity_b)?,
        })
    }

    fn poisson(rate: f64) -> Result<Poisson> {
        Poisson::new(rate)
            .map_err(|e| Error::Config(format!("invalid Poisson rate {rate}: {e}")))
    }

    fn calc_rent_probs(rate: f64, max_n: u8) -> Result<ndarray::Array2<f64>> {
        let rent_dist = ProbTable::poisson(rate)?;
        let dim = max_n as usize + 1;
        let mut probs = ndarray::Array2::<f64>::zeros((dim, dim));
        for n in 0..=max_n {
            for x in 0..=max_n {
                probs[[n as usize, x as usize]] = ProbTable::rent_prob(n, x, &rent_dist);
            }
        }
        Ok(probs)
    }

    fn rent_prob(n: u8, x: u8, rent_dist: &Poisson) -> f64 {
        // No cars on lot, so only zero rentals allowed.
        if n == 0 && x == 0 {
            return 1.0;
        }
        // Renting fewer cars than what's on the lot.
        if x < n {
            return rent_dist.pmf(u64::from(x));
        }
        // Renting all cars on lot. Using 1 - CDF folds the truncated tail
        // into the boundary cell so the row sums to 1.0.
        if x == n {
            return 1.0 - rent_dist.cdf(u64::from(n - 1));
        }
        // x > n is impossible.
        0.0
    }

    fn calc_return_probs(rate: f64, max_n: u8) -> Result<ndarray::Array2<f64>> {
        let return_dist = ProbTable::poisson(rate)?;
        let dim = max_n as usize + 1;
        let mut probs = ndarray::Array2::<f64>::zeros((dim, dim));
        for n in 0..=max_n {
            for y in 0..=max_n {
                probs[[n as usize, y as usize]] =
                    ProbTable::return_prob(n, y, max_n, &return_dist);
            }
        }
        Ok(probs)
    }

    fn return_prob(n: u8, y: u8, max_n: u8, return_dist: &Poisson) -> f64 {
        // Not enough room on lot to take that many returns.
        if y > max_n - n {
            return 0.0;
        }
        // Full lot can only take zero returns.
        if n == max_n {
            return if y == 0 { 1.0 } else { 0.0 };
        }
        // Returning fewer cars than empty spaces on lot.
        if y < max_n - n {
            return return_dist.pmf(u64::from(y));
        }
        // Filling the lot; the boundary cell absorbs the tail.
        1.0 - return_dist.cdf(u64::from(max_n - n - 1))
    }

    /// P(`rented` rentals | `on_lot` cars present after the transfer).
    pub fn rent_prob_at(&self, loc: Location, on_lot: u8, rented: u8) -> f64 {
        match loc {
            Location::A => self.rent_a[[on_lot as usize, rented as usize]],
            Location::B => self.rent_b[[on_lot as usize, rented as usize]],
        }
    }

    /// P(`returned` returns | `on_lot` cars present after the transfer).
    pub fn return_prob_at(&self, loc: Location, on_lot: u8, returned: u8) -> f64 {
        match loc {
            Location::A => self.return_a[[on_lot as usize, returned as usize]],
            Location::B => self.return_b[[on_lot as usize, returned as usize]],
        }
    }

    /// Joint probability of one (rentals, returns) combination for a
    /// pseudo-state. The four counts are independent Poisson variables.
    pub fn joint_prob(
        &self, pseudo: State, rentals_a: u8, rentals_b: u8, returns_a: u8, returns_b: u8,
    ) -> f64 {
        self.rent_prob_at(Location::A, pseudo.a, rentals_a)
            * self.rent_prob_at(Location::B, pseudo.b, rentals_b)
            * self.return_prob_at(Location::A, pseudo.a, returns_a)
            * self.return_prob_at(Location::B, pseudo.b, returns_b)
    }

    pub fn capacity(&self, loc: Location) -> u8 {
        match loc {
            Location::A => self.max_a,
            Location::B => self.max_b,
        }
    }

    fn show_array(arr: &ndarray::Array2<f64>, row_prefix: &str) {
        print!("    cars on lot:");
        for n in 0..arr.dim().0 {
            print!("{:9}", n);
        }
        println!();
        for (x, col) in arr.columns().into_iter().enumerate() {
            print!("{row_prefix}: {x:>3} | ");
            for elem in col.iter() {
                print!("{:8.4} ", elem);
            }
            println!();
        }
    }

    pub fn show_probs(&self) {
        println!("\n=== Location A Rental Probabilities ===");
        ProbTable::show_array(&self.rent_a, "  cars rented");
        println!("\n=== Location A Return Probabilities ===");
        ProbTable::show_array(&self.return_a, "cars returned");
        println!("\n=== Location B Rental Probabilities ===");
        ProbTable::show_array(&self.rent_b, "  cars rented");
        println!("\n=== Location B Return Probabilities ===");
        ProbTable::show_array(&self.return_b, "cars returned");
    }
}

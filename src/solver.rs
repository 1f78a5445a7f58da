use std::collections::HashMap;

use log::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{TransferTable, TransitionTable};
use crate::state::{Action, State, StateIterator};
use crate::store::CheckpointStore;

/// Default preferred action for a cold-started policy: move no cars.
const DEFAULT_ACTION: Action = 0;

/// Expected discounted return per state, mutated in place across sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTable {
    values: HashMap<State, f64>,
}

impl ValueTable {
    /// Every state starts at 0.0.
    pub fn new(config: &Config) -> ValueTable {
        let values = StateIterator::new(config.min_cars, config.capacity_a, config.capacity_b)
            .map(|s| (s, 0.0))
            .collect();
        ValueTable { values }
    }

    pub fn from_values(values: HashMap<State, f64>) -> ValueTable {
        ValueTable { values }
    }

    /// Value of a state. Every reachable state is seeded at
    /// construction, so a miss means the table was built for a different
    /// configuration.
    pub fn get(&self, state: State) -> Result<f64> {
        self.values
            .get(&state)
            .copied()
            .ok_or_else(|| Error::MissingRow(format!("no value for state {state}")))
    }

    pub fn set(&mut self, state: State, value: f64) {
        self.values.insert(state, value);
    }

    pub fn values(&self) -> &HashMap<State, f64> {
        &self.values
    }
}

/// Epsilon-soft action probabilities per state.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    probs: HashMap<(State, Action), f64>,
}

impl PolicyTable {
    /// Cold start: epsilon-soft around [`DEFAULT_ACTION`] in every state.
    pub fn new(transfers: &TransferTable, epsilon: f64) -> Result<PolicyTable> {
        let mut policy = PolicyTable { probs: HashMap::new() };
        let mut states: Vec<State> = transfers.rows().iter().map(|r| r.state).collect();
        states.dedup();
        for state in states {
            let actions = transfers.legal_actions(state)?;
            policy.make_greedy(state, actions, DEFAULT_ACTION, epsilon);
        }
        Ok(policy)
    }

    pub fn from_probs(probs: HashMap<(State, Action), f64>) -> PolicyTable {
        PolicyTable { probs }
    }

    pub fn prob(&self, state: State, action: Action) -> Result<f64> {
        self.probs
            .get(&(state, action))
            .copied()
            .ok_or_else(|| {
                Error::MissingRow(format!("no policy entry for state {state}, action {action}"))
            })
    }

    /// Rewrite the distribution for one state to be epsilon-soft-greedy
    /// around `preferred`: `1 - eps + eps/n` there, `eps/n` elsewhere.
    pub fn make_greedy(
        &mut self, state: State, actions: &[Action], preferred: Action, epsilon: f64,
    ) {
        let n = actions.len() as f64;
        for &action in actions {
            let p = if action == preferred {
                1.0 - epsilon + epsilon / n
            } else {
                epsilon / n
            };
            self.probs.insert((state, action), p);
        }
    }

    /// The action the policy currently prefers in `state`: the one with
    /// the largest probability, ties broken toward the smallest action.
    pub fn preferred_action(&self, state: State, actions: &[Action]) -> Result<Action> {
        let mut best: Option<(Action, f64)> = None;
        for &action in actions {
            let p = self.prob(state, action)?;
            if best.map_or(true, |(_, bp)| p > bp) {
                best = Some((action, p));
            }
        }
        best.map(|(a, _)| a)
            .ok_or_else(|| Error::MissingRow(format!("no actions for state {state}")))
    }

    pub fn probs(&self) -> &HashMap<(State, Action), f64> {
        &self.probs
    }
}

/// Policy iteration over the enumerated car rental MDP.
///
/// Alternates policy evaluation (Gauss-Seidel value sweeps to a theta
/// fixed point) with epsilon-soft-greedy policy improvement, reading the
/// immutable transfer and transition tables and mutating the (Pi, V)
/// pair. Checkpoints each phase's result under an incrementing sequence
/// number and terminates once the policy is stable.
pub struct PolicyIteration<'a> {
    config: Config,
    transfers: &'a TransferTable,
    transitions: &'a TransitionTable,
    value: ValueTable,
    policy: PolicyTable,
    seq_nr: u32,
    resume_phase: Phase,
    store: Option<&'a CheckpointStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Evaluate,
    Improve,
}

impl<'a> PolicyIteration<'a> {
    pub fn new(
        config: &Config,
        transfers: &'a TransferTable,
        transitions: &'a TransitionTable,
        store: Option<&'a CheckpointStore>,
    ) -> Result<PolicyIteration<'a>> {
        config.validate()?;

        let mut policy = None;
        let mut value = None;
        let mut pi_seq = -1i32;
        let mut v_seq = -1i32;

        // A checkpoint that is supposed to exist but doesn't is not an
        // error; we fall back to a cold start and recompute.
        if config.load_cached_model {
            if let Some(store) = store {
                if config.policy_seq_nr >= 0 {
                    match store.load_policy(config.policy_seq_nr as u32)? {
                        Some(p) => {
                            policy = Some(p);
                            pi_seq = config.policy_seq_nr;
                        }
                        None => warn!(
                            "policy checkpoint {} not found, starting cold",
                            config.policy_seq_nr
                        ),
                    }
                }
                if config.value_seq_nr >= 0 {
                    match store.load_value(config.value_seq_nr as u32)? {
                        Some(v) => {
                            value = Some(v);
                            v_seq = config.value_seq_nr;
                        }
                        None => warn!(
                            "value checkpoint {} not found, starting cold",
                            config.value_seq_nr
                        ),
                    }
                }
            }
        }

        // The more recent checkpoint tells us which phase completed
        // last; a fresher value table means improvement runs next.
        let resume_phase = if v_seq > pi_seq { Phase::Improve } else { Phase::Evaluate };
        let seq_nr = (pi_seq.max(v_seq) + 1) as u32;

        let policy = match policy {
            Some(p) => p,
            None => PolicyTable::new(transfers, config.epsilon)?,
        };

        Ok(PolicyIteration {
            config: config.clone(),
            transfers,
            transitions,
            value: value.unwrap_or_else(|| ValueTable::new(config)),
            policy,
            seq_nr,
            resume_phase,
            store,
        })
    }

    /// Run evaluation and improvement to a stable policy. Returns the
    /// number of completed improvement passes.
    pub fn solve(&mut self) -> Result<u32> {
        let mut phase = self.resume_phase;
        let mut cycles = 0u32;
        loop {
            match phase {
                Phase::Evaluate => {
                    self.evaluate()?;
                    phase = Phase::Improve;
                }
                Phase::Improve => {
                    cycles += 1;
                    if self.improve()? {
                        info!("policy stable after {cycles} improvement passes");
                        return Ok(cycles);
                    }
                    phase = Phase::Evaluate;
                }
            }
        }
    }

    /// Policy evaluation: sweep values in place until the largest
    /// per-state change falls below theta, then checkpoint V.
    ///
    /// Sweeps run in ascending state order and later states in the same
    /// sweep see the earlier updates (Gauss-Seidel). This converges
    /// faster than recomputing from a frozen copy but makes the
    /// intermediate values order-dependent.
    pub fn evaluate(&mut self) -> Result<()> {
        let mut sweeps = 0u32;
        loop {
            let mut delta = 0.0f64;
            for state in self.states() {
                let old_v = self.value.get(state)?;
                let mut new_v = 0.0;
                for &action in self.transfers.legal_actions(state)? {
                    let pi = self.policy.prob(state, action)?;
                    new_v += pi * self.action_value(state, action)?;
                }
                self.value.set(state, new_v);
                delta = delta.max((old_v - new_v).abs());
            }
            sweeps += 1;
            debug!("evaluation sweep {sweeps}: delta {delta:.6}");
            if delta < self.config.theta {
                break;
            }
        }
        info!("values converged after {sweeps} sweeps");
        self.checkpoint_value()?;
        Ok(())
    }

    /// Policy improvement: make the policy epsilon-soft-greedy with
    /// respect to the converged values. Returns true if the policy is
    /// stable (no state changed its preferred action with a value delta
    /// above theta), which terminates the algorithm.
    pub fn improve(&mut self) -> Result<bool> {
        let mut policy_stable = true;
        for state in self.states() {
            let actions = self.transfers.legal_actions(state)?.to_vec();
            let old_action = self.policy.preferred_action(state, &actions)?;
            let old_v = self.value.get(state)?;

            // Scan actions ascending, keep strict maxima: the smallest
            // maximizing action wins ties.
            let mut best_action = None;
            let mut best_q = f64::NEG_INFINITY;
            let mut delta = 0.0f64;
            for &action in &actions {
                let q = self.action_value(state, action)?;
                if q > best_q {
                    best_q = q;
                    best_action = Some(action);
                    delta = delta.max((old_v - q).abs());
                }
            }
            let new_action = best_action
                .ok_or_else(|| Error::MissingRow(format!("no actions for state {state}")))?;

            self.policy
                .make_greedy(state, &actions, new_action, self.config.epsilon);

            if new_action != old_action && delta > self.config.theta {
                policy_stable = false;
            }
        }

        if policy_stable {
            info!("policy stable");
        } else {
            info!("policy changed, re-evaluating");
            self.checkpoint_policy()?;
        }
        Ok(policy_stable)
    }

    /// Q(s, a): expected one-step reward net of transfer and parking
    /// fees, plus the discounted value of the successor state.
    fn action_value(&self, state: State, action: Action) -> Result<f64> {
        let transfer = self.transfers.lookup(state, action)?;
        let mut q = 0.0;
        for row in self.transitions.transitions(transfer.pseudo)? {
            let next_v = self.value.get(row.next)?;
            q += row.probability
                * (row.reward - transfer.fee - row.parking_fee + self.config.gamma * next_v);
        }
        Ok(q)
    }

    fn states(&self) -> StateIterator {
        StateIterator::new(
            self.config.min_cars,
            self.config.capacity_a,
            self.config.capacity_b,
        )
    }

    fn checkpoint_value(&mut self) -> Result<()> {
        if !self.config.use_disk_cache {
            return Ok(());
        }
        if let Some(store) = self.store {
            store.save_value(&self.value, self.seq_nr)?;
            self.seq_nr += 1;
        }
        Ok(())
    }

    fn checkpoint_policy(&mut self) -> Result<()> {
        if !self.config.use_disk_cache {
            return Ok(());
        }
        if let Some(store) = self.store {
            store.save_policy(&self.policy, self.seq_nr)?;
            self.seq_nr += 1;
        }
        Ok(())
    }

    pub fn value(&self) -> &ValueTable {
        &self.value
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    pub fn sequence_number(&self) -> u32 {
        self.seq_nr
    }

    /// The greedy action per state, for display.
    pub fn greedy_actions(&self) -> Result<Vec<(State, Action)>> {
        let mut grid = Vec::new();
        for state in self.states() {
            let actions = self.transfers.legal_actions(state)?;
            grid.push((state, self.policy.preferred_action(state, actions)?));
        }
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::config::Variant;
    use crate::model::{TransferTable, TransitionTable};
    use crate::probs::ProbTable;

    fn toy_config() -> Config {
        let mut config = Config::original();
        config.capacity_a = 2;
        config.capacity_b = 2;
        config.max_transfer = 1;
        config.rental_rate_a = 1.0;
        config.rental_rate_b = 1.0;
        config.return_rate_a = 1.0;
        config.return_rate_b = 1.0;
        config.theta = 0.01;
        config
    }

    struct Tables {
        transfers: TransferTable,
        transitions: TransitionTable,
    }

    fn build_tables(config: &Config) -> Tables {
        let probs = ProbTable::new(config).unwrap();
        Tables {
            transfers: TransferTable::build(config),
            transitions: TransitionTable::build(config, &probs),
        }
    }

    fn scratch_dir(test_name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("rustrental-tests")
            .join(format!("{}-{}", test_name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn cold_start_prefers_no_transfer() {
        let config = toy_config();
        let tables = build_tables(&config);
        let engine =
            PolicyIteration::new(&config, &tables.transfers, &tables.transitions, None).unwrap();
        for state in StateIterator::new(0, 2, 2) {
            let actions = tables.transfers.legal_actions(state).unwrap();
            assert_eq!(engine.policy().preferred_action(state, actions).unwrap(), 0);
        }
        assert_eq!(engine.sequence_number(), 0);
    }

    #[test]
    fn policy_rows_stay_stochastic() {
        // After any improvement pass the per-state probabilities must
        // still sum to 1.
        let config = toy_config();
        let tables = build_tables(&config);
        let mut engine =
            PolicyIteration::new(&config, &tables.transfers, &tables.transitions, None).unwrap();
        engine.evaluate().unwrap();
        engine.improve().unwrap();
        for state in StateIterator::new(0, 2, 2) {
            let actions = tables.transfers.legal_actions(state).unwrap();
            let total: f64 = actions
                .iter()
                .map(|&a| engine.policy().prob(state, a).unwrap())
                .sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn toy_problem_terminates_quickly() {
        let config = toy_config();
        let tables = build_tables(&config);
        let mut engine =
            PolicyIteration::new(&config, &tables.transfers, &tables.transitions, None).unwrap();
        let cycles = engine.solve().unwrap();
        assert!(cycles < 20, "took {cycles} improvement passes");
    }

    #[test]
    fn starved_lot_receives_cars() {
        // With all cars at B and symmetric demand, the learned policy
        // must move at least one car back to A.
        let config = toy_config();
        let tables = build_tables(&config);
        let mut engine =
            PolicyIteration::new(&config, &tables.transfers, &tables.transitions, None).unwrap();
        engine.solve().unwrap();
        let state = State::new(0, 2);
        let actions = tables.transfers.legal_actions(state).unwrap();
        let action = engine.policy().preferred_action(state, actions).unwrap();
        assert!(action <= -1, "expected a transfer to A, got {action}");
    }

    #[test]
    fn greedy_values_never_decrease() {
        // Classic policy iteration guarantee, checked on a small MDP
        // with a pure greedy policy. Values may wobble by up to theta
        // because evaluation stops early.
        let mut config = toy_config();
        config.capacity_a = 3;
        config.capacity_b = 3;
        config.epsilon = 0.0;
        config.theta = 0.001;
        let tables = build_tables(&config);
        let mut engine =
            PolicyIteration::new(&config, &tables.transfers, &tables.transitions, None).unwrap();

        let mut previous: Option<ValueTable> = None;
        for _ in 0..10 {
            engine.evaluate().unwrap();
            if let Some(prev) = &previous {
                for (state, &v) in engine.value().values() {
                    let before = prev.get(*state).unwrap();
                    assert!(
                        v >= before - 2.0 * config.theta,
                        "value at {state} fell from {before} to {v}"
                    );
                }
            }
            previous = Some(engine.value().clone());
            if engine.improve().unwrap() {
                break;
            }
        }
    }

    #[test]
    fn action_value_raises_on_missing_transfer_row() {
        let config = toy_config();
        let tables = build_tables(&config);
        let engine =
            PolicyIteration::new(&config, &tables.transfers, &tables.transitions, None).unwrap();
        // (0, 0) with action 1 would drive lot A negative; no such row.
        assert!(engine.action_value(State::new(0, 0), 1).is_err());
    }

    #[test]
    fn cold_policy_is_epsilon_soft() {
        let config = toy_config();
        let tables = build_tables(&config);
        let policy = PolicyTable::new(&tables.transfers, config.epsilon).unwrap();
        // State (1, 1) has three legal actions: -1, 0, 1.
        let state = State::new(1, 1);
        let n = 3.0;
        assert_abs_diff_eq!(
            policy.prob(state, 0).unwrap(),
            1.0 - config.epsilon + config.epsilon / n,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            policy.prob(state, -1).unwrap(),
            config.epsilon / n,
            epsilon = 1e-12
        );
    }

    #[test]
    fn resumes_improvement_from_newer_value_checkpoint() {
        // Arrange: a policy checkpoint at seq 0 and a fresher value
        // checkpoint at seq 1, as left behind by a run interrupted
        // after its second evaluation converged.
        let dir = scratch_dir("resume-improve");
        let store = CheckpointStore::new(&dir, Variant::Original);
        let mut config = toy_config();
        config.load_cached_model = true;
        config.policy_seq_nr = 0;
        config.value_seq_nr = 1;
        let tables = build_tables(&config);

        let policy = PolicyTable::new(&tables.transfers, config.epsilon).unwrap();
        store.save_policy(&policy, 0).unwrap();
        let mut value = ValueTable::new(&config);
        value.set(State::new(1, 1), 7.5);
        store.save_value(&value, 1).unwrap();

        // Act
        let engine = PolicyIteration::new(
            &config, &tables.transfers, &tables.transitions, Some(&store),
        )
        .unwrap();

        // Assert: the fresher value table means improvement runs next,
        // numbering continues past both checkpoints, and the loaded
        // tables are the warm start.
        assert_eq!(engine.resume_phase, Phase::Improve);
        assert_eq!(engine.sequence_number(), 2);
        assert_eq!(engine.value().get(State::new(1, 1)).unwrap(), 7.5);
        assert_eq!(engine.policy(), &policy);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_checkpoints_fall_back_to_cold_start() {
        // Pointing at checkpoints that were never written must start
        // cold, not fail.
        let dir = scratch_dir("resume-missing");
        let store = CheckpointStore::new(&dir, Variant::Original);
        let mut config = toy_config();
        config.load_cached_model = true;
        config.policy_seq_nr = 4;
        config.value_seq_nr = 5;
        let tables = build_tables(&config);

        let engine = PolicyIteration::new(
            &config, &tables.transfers, &tables.transitions, Some(&store),
        )
        .unwrap();

        assert_eq!(engine.resume_phase, Phase::Evaluate);
        assert_eq!(engine.sequence_number(), 0);
        let state = State::new(1, 1);
        let actions = tables.transfers.legal_actions(state).unwrap();
        assert_eq!(engine.policy().preferred_action(state, actions).unwrap(), 0);
        assert_eq!(engine.value().get(state).unwrap(), 0.0);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn greedy_actions_cover_every_state() {
        let config = toy_config();
        let tables = build_tables(&config);
        let mut engine =
            PolicyIteration::new(&config, &tables.transfers, &tables.transitions, None).unwrap();
        engine.solve().unwrap();
        let grid = engine.greedy_actions().unwrap();
        assert_eq!(grid.len(), 9);
    }
}

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Variant;
use crate::error::{Error, Result};
use crate::model::{TransferRow, TransferTable, TransitionRow, TransitionTable};
use crate::solver::{PolicyTable, ValueTable};
use crate::state::{Action, State};

const TRANSFERS_FILE: &str = "sasp.csv";
const TRANSITIONS_FILE: &str = "transitions.csv";

/// Tab-separated CSV persistence for the four tables.
///
/// The transfer and transition tables are pure functions of the
/// configuration and live in one canonical file each; value and policy
/// checkpoints carry a zero-padded sequence number. Each problem variant
/// gets its own subdirectory so the two configurations never collide.
/// Absent files are reported as `None`, not errors, so callers can
/// recompute; writes go to a temporary sibling and are renamed into
/// place so a crash never leaves a truncated file behind.
pub struct CheckpointStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct TransferRecord {
    state: String,
    action: Action,
    pseudo: String,
    fee: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TransitionRecord {
    pseudo: String,
    rentals_a: u8,
    rentals_b: u8,
    returns_a: u8,
    returns_b: u8,
    probability: f64,
    reward: f64,
    parking_fee: f64,
    next: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValueRecord {
    state: String,
    value: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PolicyRecord {
    state: String,
    action: Action,
    prob: f64,
}

impl CheckpointStore {
    pub fn new(base_dir: &Path, variant: Variant) -> CheckpointStore {
        CheckpointStore { root: base_dir.join(variant.dir_name()) }
    }

    fn value_file(seq_nr: u32) -> String {
        format!("value_{seq_nr:02}.csv")
    }

    fn policy_file(seq_nr: u32) -> String {
        format!("policy_{seq_nr:02}.csv")
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.is_file() {
            return Err(Error::PathCollision {
                path: self.root.clone(),
                reason: "a file exists where the checkpoint directory should be".to_string(),
            });
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Serialize records to `<root>/<name>`, tab-separated, via a
    /// temporary file and an atomic rename.
    fn write_records<T: Serialize>(&self, name: &str, records: &[T]) -> Result<()> {
        self.ensure_root()?;
        let target = self.root.join(name);
        if target.is_dir() {
            return Err(Error::PathCollision {
                path: target,
                reason: "a directory exists where the checkpoint file should be".to_string(),
            });
        }
        let tmp = self.root.join(format!("{name}.tmp"));
        {
            let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(&tmp)?;
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &target)?;
        info!("checkpointed {} rows to {}", records.len(), target.display());
        Ok(())
    }

    /// Read records from `<root>/<name>`. A missing directory or file
    /// means the caller has to recompute and is not an error.
    fn read_records<T: DeserializeOwned>(&self, name: &str) -> Result<Option<Vec<T>>> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(None);
        }
        if path.is_dir() {
            return Err(Error::PathCollision {
                path,
                reason: "a directory exists where the checkpoint file should be".to_string(),
            });
        }
        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(&path)?;
        let mut records = Vec::new();
        for record in reader.deserialize() {
            records.push(record?);
        }
        Ok(Some(records))
    }

    pub fn save_transfers(&self, table: &TransferTable) -> Result<()> {
        let records: Vec<TransferRecord> = table
            .rows()
            .iter()
            .map(|row| TransferRecord {
                state: row.state.encode(),
                action: row.action,
                pseudo: row.pseudo.encode(),
                fee: row.fee,
            })
            .collect();
        self.write_records(TRANSFERS_FILE, &records)
    }

    pub fn load_transfers(&self) -> Result<Option<TransferTable>> {
        let Some(records) = self.read_records::<TransferRecord>(TRANSFERS_FILE)? else {
            return Ok(None);
        };
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            rows.push(TransferRow {
                state: State::parse(&record.state)?,
                action: record.action,
                pseudo: State::parse(&record.pseudo)?,
                fee: record.fee,
            });
        }
        Ok(Some(TransferTable::from_rows(rows)))
    }

    pub fn save_transitions(&self, table: &TransitionTable) -> Result<()> {
        // Sorted by pseudo-state so repeated saves are byte-identical.
        let mut pseudos: Vec<&State> = table.groups().keys().collect();
        pseudos.sort();
        let mut records = Vec::new();
        for pseudo in pseudos {
            for row in &table.groups()[pseudo] {
                records.push(TransitionRecord {
                    pseudo: pseudo.encode(),
                    rentals_a: row.rentals_a,
                    rentals_b: row.rentals_b,
                    returns_a: row.returns_a,
                    returns_b: row.returns_b,
                    probability: row.probability,
                    reward: row.reward,
                    parking_fee: row.parking_fee,
                    next: row.next.encode(),
                });
            }
        }
        self.write_records(TRANSITIONS_FILE, &records)
    }

    pub fn load_transitions(&self) -> Result<Option<TransitionTable>> {
        let Some(records) = self.read_records::<TransitionRecord>(TRANSITIONS_FILE)? else {
            return Ok(None);
        };
        let mut groups: HashMap<State, Vec<TransitionRow>> = HashMap::new();
        for record in records {
            let pseudo = State::parse(&record.pseudo)?;
            groups.entry(pseudo).or_default().push(TransitionRow {
                rentals_a: record.rentals_a,
                rentals_b: record.rentals_b,
                returns_a: record.returns_a,
                returns_b: record.returns_b,
                probability: record.probability,
                reward: record.reward,
                parking_fee: record.parking_fee,
                next: State::parse(&record.next)?,
            });
        }
        Ok(Some(TransitionTable::from_groups(groups)))
    }

    pub fn save_value(&self, table: &ValueTable, seq_nr: u32) -> Result<()> {
        let mut states: Vec<&State> = table.values().keys().collect();
        states.sort();
        let records: Vec<ValueRecord> = states
            .into_iter()
            .map(|s| ValueRecord { state: s.encode(), value: table.values()[s] })
            .collect();
        self.write_records(&CheckpointStore::value_file(seq_nr), &records)
    }

    pub fn load_value(&self, seq_nr: u32) -> Result<Option<ValueTable>> {
        let Some(records) =
            self.read_records::<ValueRecord>(&CheckpointStore::value_file(seq_nr))?
        else {
            return Ok(None);
        };
        let mut values = HashMap::with_capacity(records.len());
        for record in records {
            values.insert(State::parse(&record.state)?, record.value);
        }
        Ok(Some(ValueTable::from_values(values)))
    }

    pub fn save_policy(&self, table: &PolicyTable, seq_nr: u32) -> Result<()> {
        let mut keys: Vec<&(State, Action)> = table.probs().keys().collect();
        keys.sort();
        let records: Vec<PolicyRecord> = keys
            .into_iter()
            .map(|key| PolicyRecord {
                state: key.0.encode(),
                action: key.1,
                prob: table.probs()[key],
            })
            .collect();
        self.write_records(&CheckpointStore::policy_file(seq_nr), &records)
    }

    pub fn load_policy(&self, seq_nr: u32) -> Result<Option<PolicyTable>> {
        let Some(records) =
            self.read_records::<PolicyRecord>(&CheckpointStore::policy_file(seq_nr))?
        else {
            return Ok(None);
        };
        let mut probs = HashMap::with_capacity(records.len());
        for record in records {
            probs.insert((State::parse(&record.state)?, record.action), record.prob);
        }
        Ok(Some(PolicyTable::from_probs(probs)))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::Config;
    use crate::model::{TransferTable, TransitionTable};
    use crate::probs::ProbTable;

    fn toy_config() -> Config {
        let mut config = Config::original();
        config.capacity_a = 2;
        config.capacity_b = 2;
        config.max_transfer = 1;
        config
    }

    fn scratch_dir(test_name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("rustrental-tests")
            .join(format!("{}-{}", test_name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn value_roundtrip_at_sequence_three() {
        // Arrange
        let dir = scratch_dir("value-roundtrip");
        let store = CheckpointStore::new(&dir, Variant::Original);
        let config = toy_config();
        let mut value = ValueTable::new(&config);
        value.set(State::new(1, 2), 42.5);
        value.set(State::new(0, 0), -3.25);
        // Act
        store.save_value(&value, 3).unwrap();
        let loaded = store.load_value(3).unwrap().unwrap();
        // Assert
        assert_eq!(loaded, value);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_checkpoint_is_none_not_error() {
        let dir = scratch_dir("missing-checkpoint");
        let store = CheckpointStore::new(&dir, Variant::Original);
        assert!(store.load_value(7).unwrap().is_none());
        assert!(store.load_policy(7).unwrap().is_none());
        assert!(store.load_transfers().unwrap().is_none());
    }

    #[test]
    fn variants_do_not_collide() {
        let dir = scratch_dir("variant-dirs");
        let config = toy_config();
        let value = ValueTable::new(&config);
        let original = CheckpointStore::new(&dir, Variant::Original);
        let extended = CheckpointStore::new(&dir, Variant::Extended);
        original.save_value(&value, 0).unwrap();
        assert!(extended.load_value(0).unwrap().is_none());
        assert!(original.load_value(0).unwrap().is_some());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn policy_roundtrip() {
        let dir = scratch_dir("policy-roundtrip");
        let store = CheckpointStore::new(&dir, Variant::Extended);
        let config = toy_config();
        let transfers = TransferTable::build(&config);
        let policy = PolicyTable::new(&transfers, config.epsilon).unwrap();
        store.save_policy(&policy, 1).unwrap();
        let loaded = store.load_policy(1).unwrap().unwrap();
        assert_eq!(loaded, policy);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn transfer_table_roundtrip() {
        let dir = scratch_dir("transfer-roundtrip");
        let store = CheckpointStore::new(&dir, Variant::Original);
        let table = TransferTable::build(&toy_config());
        store.save_transfers(&table).unwrap();
        let loaded = store.load_transfers().unwrap().unwrap();
        assert_eq!(loaded.rows(), table.rows());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn transition_table_roundtrip() {
        let dir = scratch_dir("transition-roundtrip");
        let store = CheckpointStore::new(&dir, Variant::Original);
        let config = toy_config();
        let probs = ProbTable::new(&config).unwrap();
        let table = TransitionTable::build(&config, &probs);
        store.save_transitions(&table).unwrap();
        let loaded = store.load_transitions().unwrap().unwrap();
        for (pseudo, rows) in table.groups() {
            assert_eq!(loaded.groups().get(pseudo).unwrap(), rows);
        }
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn file_in_place_of_directory_is_fatal() {
        let dir = scratch_dir("path-collision");
        fs::create_dir_all(&dir).unwrap();
        // Occupy the variant directory's path with a plain file.
        fs::write(dir.join(Variant::Original.dir_name()), b"not a directory").unwrap();
        let store = CheckpointStore::new(&dir, Variant::Original);
        let config = toy_config();
        let value = ValueTable::new(&config);
        assert!(matches!(
            store.save_value(&value, 0),
            Err(Error::PathCollision { .. })
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = scratch_dir("temp-cleanup");
        let store = CheckpointStore::new(&dir, Variant::Original);
        let config = toy_config();
        store.save_value(&ValueTable::new(&config), 0).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.join("original"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }
}

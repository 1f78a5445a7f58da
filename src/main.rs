use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config_file::FromConfigFile;
use log::info;

use rustrental::{
    CheckpointStore, Config, PolicyIteration, ProbTable, Result, State, TransferTable,
    TransitionTable,
};

/// Command line argument parser.
#[derive(Parser, Debug)]
#[command(about = "Solve the Barto and Sutton Car Rental Problem", long_about = None)]
pub struct Args {
    /// Path to the rental configuration TOML file.
    config_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print rental and return probabilities.
    Probs,
    /// Build the transfer and transition tables and cache them to disk.
    Build,
    /// Solve for the optimal policy and print the greedy action grid.
    Solve,
    /// Solve, then print the converged value of one state.
    Value { a: u8, b: u8 },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::from_config_file(&args.config_path)
        .map_err(|e| rustrental::Error::Config(format!("cannot read config file: {e}")))?;
    config.validate()?;

    match &args.command {
        Commands::Probs => {
            let probs = ProbTable::new(&config)?;
            probs.show_probs();
        }
        Commands::Build => {
            let store = CheckpointStore::new(&config.data_dir, config.variant());
            let probs = ProbTable::new(&config)?;
            let transfers = TransferTable::build(&config);
            let transitions = TransitionTable::build(&config, &probs);
            store.save_transfers(&transfers)?;
            store.save_transitions(&transitions)?;
        }
        Commands::Solve => {
            let ((_, policy), transfers) = solve(&config)?;
            print_policy_grid(&config, &transfers, &policy)?;
        }
        Commands::Value { a, b } => {
            let ((value, _), _) = solve(&config)?;
            let state = State::new(*a, *b);
            println!("v{state} = {:.2}", value.get(state)?);
        }
    }
    Ok(())
}

/// Converged value and policy tables.
type Solved = (rustrental::ValueTable, rustrental::PolicyTable);

fn solve(config: &Config) -> Result<(Solved, TransferTable)> {
    let store = CheckpointStore::new(&config.data_dir, config.variant());
    let store_ref = config.use_disk_cache.then_some(&store);
    let (transfers, transitions) = get_tables(config, store_ref)?;

    let mut engine = PolicyIteration::new(config, &transfers, &transitions, store_ref)?;
    let cycles = engine.solve()?;
    info!("solved in {cycles} improvement passes");
    Ok(((engine.value().clone(), engine.policy().clone()), transfers))
}

/// Load the immutable model tables from the cache when allowed, build
/// them otherwise, and cache fresh builds for the next run.
fn get_tables(
    config: &Config, store: Option<&CheckpointStore>,
) -> Result<(TransferTable, TransitionTable)> {
    if config.load_cached_data {
        if let Some(store) = store {
            if let (Some(transfers), Some(transitions)) =
                (store.load_transfers()?, store.load_transitions()?)
            {
                info!("loaded cached transfer and transition tables");
                return Ok((transfers, transitions));
            }
        }
    }

    info!("building transfer and transition tables");
    let probs = ProbTable::new(config)?;
    let transfers = TransferTable::build(config);
    let transitions = TransitionTable::build(config, &probs);
    if config.use_disk_cache {
        if let Some(store) = store {
            store.save_transfers(&transfers)?;
            store.save_transitions(&transitions)?;
        }
    }
    Ok((transfers, transitions))
}

/// Print the greedy action per state as a grid: rows are cars at A,
/// columns cars at B.
fn print_policy_grid(
    config: &Config, transfers: &TransferTable, policy: &rustrental::PolicyTable,
) -> Result<()> {
    println!("\n=== Greedy policy (rows: cars at A, cols: cars at B) ===");
    print!("     ");
    for b in config.min_cars..=config.capacity_b {
        print!("{b:>4}");
    }
    println!();
    for a in config.min_cars..=config.capacity_a {
        print!("{a:>4} |");
        for b in config.min_cars..=config.capacity_b {
            let state = State::new(a, b);
            let actions = transfers.legal_actions(state)?;
            print!("{:>4}", policy.preferred_action(state, actions)?);
        }
        println!();
    }
    Ok(())
}

// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use leaselock::commands::config::ConfigCommand;
use leaselock::commands::hold::HoldCommand;
use leaselock::commands::simulate::SimulateCommand;
use leaselock::config::LeaseLockConfig;
use leaselock::error::{LeaseError, Result, format_error_with_color, get_exit_code};
use leaselock::logging;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "leaselock")]
#[command(author, version, about = "Leased distributed locks over one or many coordinators", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to ./leaselock.toml when present)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a lock, hold it, then release it
    #[command(visible_alias = "h")]
    Hold {
        /// Resource key to lock (e.g., "job-42")
        key: String,

        /// How long to hold the lock once acquired
        #[arg(long, value_name = "SECONDS", default_value_t = 5)]
        hold_secs: u64,

        /// Give up after waiting this long ("30", "500ms", "infinite")
        #[arg(long, value_name = "SECS")]
        wait: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run contending workers against in-process coordinators
    #[command(visible_alias = "sim")]
    Simulate {
        /// Number of contending workers
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Lock attempts per worker
        #[arg(short, long, default_value_t = 25)]
        rounds: usize,

        /// Resource key the workers contend on
        #[arg(long, default_value = "simulated-resource")]
        key: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn report(error: &LeaseError) -> ! {
    eprintln!(
        "{}",
        format_error_with_color(error, std::io::stderr().is_terminal())
    );
    std::process::exit(get_exit_code(error));
}

fn main() {
    let cli = Cli::parse();

    logging::setup_logger(cli.verbose);

    let config = match LeaseLockConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => report(&e),
    };

    let result: Result<()> = (|| match cli.command {
        Commands::Hold {
            key,
            hold_secs,
            wait,
            json,
        } => {
            let command = HoldCommand::new(&config)?;
            command.execute(&key, hold_secs, wait.as_deref(), json)
        }
        Commands::Simulate {
            workers,
            rounds,
            key,
        } => {
            let command = SimulateCommand::new(&config)?;
            command.execute(workers, rounds, &key)
        }
        Commands::Config => {
            let command = ConfigCommand::new(&config)?;
            command.execute()
        }
    })();

    if let Err(e) = result {
        report(&e);
    }
}

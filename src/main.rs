//   Copyright 2024 The PyMC Developers
//
//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::error;

use pymc_glm::analyses;
use pymc_glm::{SamplerSettings, Table};

/// Runs the worked GLM analyses and prints their reports as JSON.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    sampling: SamplingOpts,

    #[command(subcommand)]
    analysis: Analysis,
}

#[derive(Args, Debug, Clone, Copy)]
struct SamplingOpts {
    /// Base random seed; omit for a nondeterministic run.
    #[arg(global = true, long)]
    seed: Option<u64>,

    /// Retained draws per chain.
    #[arg(global = true, long, default_value_t = 1000)]
    draws: usize,

    /// Tuning iterations per chain.
    #[arg(global = true, long, default_value_t = 1000)]
    tune: usize,

    /// Number of chains.
    #[arg(global = true, long, default_value_t = 4)]
    chains: usize,
}

impl SamplingOpts {
    fn settings(&self) -> SamplerSettings {
        let settings = SamplerSettings::default()
            .draws(self.draws)
            .tune(self.tune)
            .chains(self.chains);
        match self.seed {
            Some(seed) => settings.seed(seed),
            None => settings,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct TemperatureFile {
    /// Delimited file: year followed by twelve monthly columns.
    file: PathBuf,

    /// Field separator.
    #[arg(long, default_value_t = ';')]
    separator: char,
}

impl TemperatureFile {
    fn read(&self) -> Result<Table, Box<dyn Error>> {
        let separator = u8::try_from(self.separator)
            .map_err(|_| format!("separator '{}' is not a single byte", self.separator))?;
        Ok(Table::from_delimited(&self.file, separator)?)
    }
}

#[derive(Subcommand, Debug, Clone)]
enum Analysis {
    /// Intercept-only Bernoulli model of ten coin flips.
    CoinFlips,
    /// Binomial model of two arms, refit on updated counts.
    BinomialTrials,
    /// Odds ratio of two success rates.
    TwoGroups,
    /// Linear trend of one month's temperature.
    Temperature {
        #[command(flatten)]
        input: TemperatureFile,
        /// Column position of the month to model.
        #[arg(long, default_value_t = 7)]
        month: usize,
    },
    /// Hierarchical comparison of the summer months.
    Summer {
        #[command(flatten)]
        input: TemperatureFile,
    },
    /// Gaussian against Student-t likelihood by LOO.
    Robust {
        #[command(flatten)]
        input: TemperatureFile,
        /// Column position of the month to model.
        #[arg(long, default_value_t = 7)]
        month: usize,
    },
}

fn run(cli: &Cli) -> Result<String, Box<dyn Error>> {
    let settings = cli.sampling.settings();
    let report = match &cli.analysis {
        Analysis::CoinFlips => serde_json::to_string_pretty(&analyses::coin_flips(&settings)?)?,
        Analysis::BinomialTrials => {
            serde_json::to_string_pretty(&analyses::binomial_trials(&settings)?)?
        }
        Analysis::TwoGroups => {
            serde_json::to_string_pretty(&analyses::two_group_comparison(&settings)?)?
        }
        Analysis::Temperature { input, month } => serde_json::to_string_pretty(
            &analyses::temperature_trend(&input.read()?, *month, &settings)?,
        )?,
        Analysis::Summer { input } => {
            serde_json::to_string_pretty(&analyses::summer_anova(&input.read()?, &settings)?)?
        }
        Analysis::Robust { input, month } => serde_json::to_string_pretty(
            &analyses::robust_comparison(&input.read()?, *month, &settings)?,
        )?,
    };
    Ok(report)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flattened_options_parse() {
        let cli = Cli::parse_from([
            "pymc-glm", "robust", "temps.csv", "--separator", ",", "--month", "8", "--seed", "3",
        ]);
        assert_eq!(cli.sampling.seed, Some(3));
        match cli.analysis {
            Analysis::Robust { input, month } => {
                assert_eq!(input.file, PathBuf::from("temps.csv"));
                assert_eq!(input.separator, ',');
                assert_eq!(month, 8);
            }
            other => panic!("unexpected analysis {:?}", other),
        }
    }
}

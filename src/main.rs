// CLASSIFICATION: COMMUNITY
// Filename: main.rs v2.0
// Date Modified: 2026-10-16
// Author: Lukas Bower

//! Entry point for the `plugin-harness` binary.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use plugin_harness::config::HarnessConfig;
use plugin_harness::ScenarioDriver;

#[derive(Parser)]
#[command(
    name = "plugin-harness",
    about = "Run declarative conformance scenarios against a monitoring plugin",
    version
)]
struct Cli {
    /// Plugin shared library; overrides the script's `plugin` key
    #[arg(long, value_name = "LIB")]
    plugin: Option<PathBuf>,
    /// Scenario script (repeatable)
    #[arg(long = "script", value_name = "YAML", required = true)]
    scripts: Vec<PathBuf>,
    /// Harness config file (TOML)
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,
    /// Parcel wait timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Print reports as JSON
    #[arg(long)]
    json: bool,
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = HarnessConfig::load(cli.config.as_deref()).context("loading harness config")?;
    if let Some(ms) = cli.timeout_ms {
        config.wait_timeout_ms = ms;
    }
    let driver = ScenarioDriver::new(config);
    let mut worst = 0;
    for script in &cli.scripts {
        let report = driver.run_file(script, cli.plugin.as_deref());
        if cli.json {
            let text = serde_json::to_string_pretty(&report).context("serializing report")?;
            println!("{text}");
        } else {
            println!("{report}");
        }
        worst = worst.max(report.exit_code());
    }
    Ok(u8::try_from(worst).unwrap_or(2))
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(2)
        }
    }
}

//! Issue-resolution and test-validation pipeline.
//!
//! `solver attempt` clones an issue's repository at its base commit, prepares
//! the environment, applies the gold patch (or a synthesized one) and runs
//! the narrowest test scope that can confirm the fix. The remaining commands
//! expose individual pipeline stages for inspection.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use solver::attempt::{AttemptOptions, run_attempt};
use solver::core::classifier::classify_text;
use solver::core::scope::{extract_files, extract_functions, plan_scopes};
use solver::core::types::TestScope;
use solver::exit_codes;
use solver::io::config::{SolverConfig, load_config, write_config};
use solver::io::issue::Issue;
use solver::io::probe::probe;
use solver::io::runner::SystemRunner;
use solver::logging;

#[derive(Parser)]
#[command(
    name = "solver",
    version,
    about = "Issue-resolution and test-validation pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one resolution attempt and print its verdict.
    Attempt {
        /// Issue file: a JSON object, or JSON Lines with `--index`.
        #[arg(long)]
        issue: PathBuf,
        /// Record to use from a `.jsonl` issue file.
        #[arg(long, default_value_t = 0)]
        index: usize,
        /// TOML config; defaults apply when omitted or missing.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Synthesize a patch from baseline failures instead of using the gold patch.
        #[arg(long)]
        autonomous: bool,
        /// Print the verdict as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the language profile of a working tree.
    Probe {
        dir: PathBuf,
        /// Test patch whose contents hint at the framework.
        #[arg(long)]
        test_patch: Option<PathBuf>,
    },
    /// Print test files, test functions and the scope plan of a diff.
    Scope { diff: PathBuf },
    /// Classify captured test output.
    Classify { output: PathBuf },
    /// Write a config file holding the defaults.
    InitConfig {
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Serialize)]
struct ScopeReport {
    files: Vec<String>,
    functions: BTreeMap<String, Vec<String>>,
    plan: Vec<TestScope>,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            exit(exit_codes::INVALID)
        }
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Attempt {
            issue,
            index,
            config,
            autonomous,
            json,
        } => cmd_attempt(&issue, index, config.as_deref(), autonomous, json),
        Command::Probe { dir, test_patch } => cmd_probe(&dir, test_patch.as_deref()),
        Command::Scope { diff } => cmd_scope(&diff),
        Command::Classify { output } => cmd_classify(&output),
        Command::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn cmd_attempt(
    issue_path: &Path,
    index: usize,
    config: Option<&Path>,
    autonomous: bool,
    json: bool,
) -> Result<i32> {
    let cfg = match config {
        Some(path) => load_config(path)?,
        None => SolverConfig::default(),
    };
    let issue = Issue::load(issue_path, index)?;
    let runner = SystemRunner::new(cfg.output_limit_bytes);
    let options = AttemptOptions {
        use_gold_patch: !autonomous,
    };

    let verdict = run_attempt(&issue, &cfg, &runner, &options);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&verdict).context("serialize verdict")?
        );
    } else {
        println!("{}", verdict.render_log());
        println!("RESULT: {}", if verdict.success { "PASS" } else { "FAIL" });
    }
    Ok(if verdict.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_probe(dir: &Path, test_patch: Option<&Path>) -> Result<i32> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }
    let patch = test_patch.map(read_text).transpose()?;
    let profile = probe(dir, patch.as_deref());
    print_json(&profile)?;
    Ok(exit_codes::OK)
}

fn cmd_scope(diff_path: &Path) -> Result<i32> {
    let diff = read_text(diff_path)?;
    let report = ScopeReport {
        files: extract_files(&diff),
        functions: extract_functions(&diff),
        plan: plan_scopes(Some(&diff)),
    };
    print_json(&report)?;
    Ok(exit_codes::OK)
}

fn cmd_classify(output_path: &Path) -> Result<i32> {
    let output = read_text(output_path)?;
    print_json(&classify_text(&output))?;
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} exists (use --force to overwrite)", path.display());
    }
    write_config(path, &SolverConfig::default())?;
    Ok(exit_codes::OK)
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_attempt_defaults_to_gold() {
        let cli = Cli::parse_from(["solver", "attempt", "--issue", "issue.json"]);
        match cli.command {
            Command::Attempt {
                index,
                autonomous,
                json,
                config,
                ..
            } => {
                assert_eq!(index, 0);
                assert!(!autonomous);
                assert!(!json);
                assert!(config.is_none());
            }
            _ => panic!("expected attempt"),
        }
    }

    #[test]
    fn parse_attempt_flags() {
        let cli = Cli::parse_from([
            "solver",
            "attempt",
            "--issue",
            "batch.jsonl",
            "--index",
            "3",
            "--autonomous",
            "--json",
        ]);
        assert!(matches!(
            cli.command,
            Command::Attempt {
                index: 3,
                autonomous: true,
                json: true,
                ..
            }
        ));
    }

    #[test]
    fn parse_init_config_force() {
        let cli = Cli::parse_from(["solver", "init-config", "solver.toml", "--force"]);
        assert!(matches!(cli.command, Command::InitConfig { force: true, .. }));
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("solver.toml");
        assert_eq!(cmd_init_config(&path, false).expect("first write"), exit_codes::OK);
        assert!(cmd_init_config(&path, false).is_err());
        assert_eq!(cmd_init_config(&path, true).expect("forced write"), exit_codes::OK);
        let cfg = load_config(&path).expect("load written config");
        assert_eq!(cfg, SolverConfig::default());
    }
}

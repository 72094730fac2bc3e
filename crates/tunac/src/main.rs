use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use tuna_contracts::{TUNAC_REPORT_SCHEMA_VERSION, TUNA_OPS_SCHEMA_VERSION};
use tunac::compile;
use tunac::diagnostics;
use tunac::fingerprint;
use tunac::logging;
use tunac::lower;
use tunac::ops::Op;
use tunac::program::{self, Program};

#[derive(Parser)]
#[command(name = "tunac")]
#[command(about = "Tuna back end: lowering, VM code generation and lock analysis.", long_about = None)]
struct Cli {
    /// Log filter (e.g. `debug`, `tunac=trace`); overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Replace global-object references with store operations.
    Lower {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compile every function to VM instructions.
    Build {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Report the locks each function needs to run concurrently.
    Warn {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        report_json: bool,
    },
}

#[derive(Debug, Serialize)]
struct ProcedureBundle {
    schema_version: &'static str,
    procedures: BTreeMap<String, Vec<Op>>,
    digests: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct TunacToolReport {
    schema_version: &'static str,
    command: &'static str,
    ok: bool,
    r#in: String,
    report: diagnostics::Report,
    exit_code: u8,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_with_level(cli.log_level.as_deref());

    match cli.cmd {
        Cmd::Lower { input, out } => {
            let program = read_program(&input)?;
            let lowered = lower::lower_program(&program)
                .map_err(|e| anyhow::anyhow!("lower failed: {e}"))?;
            write_json(out.as_deref(), &lowered)?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Build { input, out } => {
            let program = read_program(&input)?;
            let procedures = compile::compile_program(&program)
                .map_err(|e| anyhow::anyhow!("compile failed: {e}"))?;
            let mut digests = BTreeMap::new();
            for (name, ops) in &procedures {
                let digest = fingerprint::procedure_digest(ops)
                    .with_context(|| format!("digest procedure: {name}"))?;
                digests.insert(name.clone(), digest);
            }
            let bundle = ProcedureBundle {
                schema_version: TUNA_OPS_SCHEMA_VERSION,
                procedures,
                digests,
            };
            write_json(out.as_deref(), &bundle)?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Warn { input, report_json } => {
            let program = read_program(&input)?;
            let requirements = match compile::analyze_program(&program) {
                Ok(requirements) => requirements,
                Err(err) if report_json => {
                    let report = TunacToolReport {
                        schema_version: TUNAC_REPORT_SCHEMA_VERSION,
                        command: "warn",
                        ok: false,
                        r#in: input.display().to_string(),
                        report: compile::error_report(&err),
                        exit_code: 2,
                    };
                    print_json(&report)?;
                    return Ok(ExitCode::from(2));
                }
                Err(err) => anyhow::bail!("analysis failed: {err}"),
            };

            let needing_locks = requirements.values().filter(|r| !r.is_empty()).count();
            for (name, reqs) in requirements.iter().filter(|(_, r)| !r.is_empty()) {
                warn!(function = %name, locks = reqs.len(), "function needs locks");
            }
            let exit_code: u8 = if needing_locks > 0 { 1 } else { 0 };

            if report_json {
                let report = TunacToolReport {
                    schema_version: TUNAC_REPORT_SCHEMA_VERSION,
                    command: "warn",
                    ok: needing_locks == 0,
                    r#in: input.display().to_string(),
                    report: compile::lock_report(&requirements).with_meta(
                        "functions_checked",
                        serde_json::Value::from(requirements.len()),
                    ),
                    exit_code,
                };
                print_json(&report)?;
            } else {
                print!("{}", compile::render_lock_warnings(&requirements));
            }
            Ok(ExitCode::from(exit_code))
        }
    }
}

fn read_program(path: &Path) -> Result<Program> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read program: {}", path.display()))?;
    program::parse_program_json(&bytes)
        .map_err(|e| anyhow::anyhow!("parse program {}: {e}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn write_json(path: Option<&Path>, value: &impl Serialize) -> Result<()> {
    let out = serde_json::to_string_pretty(value)? + "\n";
    match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create output dir: {}", parent.display()))?;
            }
            std::fs::write(path, out.as_bytes())
                .with_context(|| format!("write: {}", path.display()))?;
            info!(path = %path.display(), "wrote output");
        }
        None => print!("{out}"),
    }
    Ok(())
}

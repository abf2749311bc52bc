//! spawnhook CLI: checks that hooks on the process-spawn entry points see
//! every call made while they are installed.

mod harness;
mod launcher;
mod report;
mod script;
mod shell_format;
mod verdict;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, error};
use spawnhook_agent::{EntryPoint, HookRegistry};
use spawnhook_intercept::{
    DispatchTable, FailingEngine, InterceptionEngine, RebindEngine, TableEngine,
};

use harness::{run_verification, Harness, Outcome};
use launcher::{PosixLauncher, SpawnRoute};
use script::Script;
use verdict::{VerdictMode, EXIT_FAULT, EXIT_PASS};

#[derive(Parser)]
#[command(name = "spawnhook")]
#[command(version, about = "Verify interception of posix_spawn and posix_spawnp", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install hooks, run a launch script, and report whether every call was counted
    Run {
        /// Launch script YAML [default: built-in script]
        #[arg(short, long, value_name = "FILE")]
        script: Option<PathBuf>,

        /// How the entry points are redirected
        #[arg(short, long, value_enum, default_value_t = EngineKind::Rebind)]
        engine: EngineKind,

        /// Pause before each launch and before each kill, overriding the script
        #[arg(long, value_name = "MS")]
        settle_ms: Option<u64>,

        /// How counts are compared, overriding the script
        #[arg(long, value_enum)]
        verdict: Option<VerdictMode>,

        /// Make installing this entry point fail
        #[arg(long, value_name = "ENTRY")]
        fail_attach: Option<EntryPoint>,
    },

    /// Print the built-in launch script
    Script,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineKind {
    /// Rewrite the import slots of every loaded module
    Rebind,
    /// Route launches through a dispatch table
    Table,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match run(cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAULT)
        }
    }
}

fn run(command: Commands) -> Result<u8> {
    match command {
        Commands::Run {
            script,
            engine,
            settle_ms,
            verdict,
            fail_attach,
        } => {
            let mut script = match script {
                Some(path) => Script::load(&path)?,
                None => Script::builtin(),
            };
            if let Some(ms) = settle_ms {
                script.settle_ms = ms;
            }
            let mode = verdict.unwrap_or(script.verdict);
            verify(&script, engine, mode, fail_attach)
        }
        Commands::Script => {
            print!("{}", Script::builtin().to_yaml()?);
            Ok(EXIT_PASS)
        }
    }
}

fn verify(
    script: &Script,
    kind: EngineKind,
    mode: VerdictMode,
    fail_attach: Option<EntryPoint>,
) -> Result<u8> {
    let (engine, launcher) = build_engine(kind)?;
    let engine: Box<dyn InterceptionEngine> = match fail_attach {
        Some(entry) => Box::new(FailingEngine::new(engine, entry.symbol())),
        None => engine,
    };
    debug!("Using {} engine, {} verdict", engine.name(), mode);

    let mut registry = HookRegistry::new(engine);
    let harness = Harness::new(launcher, script.settle());
    let outcome = run_verification(&mut registry, &harness, script, mode)
        .context("verification run aborted")?;

    match &outcome {
        Outcome::Completed(report) => print!("{}", report),
        Outcome::InstallFailed(e) => println!("Hook installation failed: {}", e),
    }
    Ok(outcome.exit_code())
}

fn build_engine(kind: EngineKind) -> Result<(Box<dyn InterceptionEngine>, PosixLauncher)> {
    match kind {
        EngineKind::Rebind => Ok((
            Box::new(RebindEngine::new()),
            PosixLauncher::new(SpawnRoute::Linked),
        )),
        EngineKind::Table => {
            let symbols: Vec<&str> = EntryPoint::ALL.iter().map(|e| e.symbol()).collect();
            let table = Arc::new(
                DispatchTable::resolve(&symbols).context("failed resolving spawn entry points")?,
            );
            Ok((
                Box::new(TableEngine::new(table.clone())),
                PosixLauncher::new(SpawnRoute::Table(table)),
            ))
        }
    }
}

/// Process-global lock for tests that publish interceptor dispatches or
/// rebind the spawn entry points.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::EXIT_INSTALL_FAILED;

    fn quick_script(yaml: &str) -> Script {
        Script::from_yaml(yaml).unwrap()
    }

    #[test]
    fn parses_run_options() {
        let cli = Cli::try_parse_from([
            "spawnhook",
            "-v",
            "run",
            "--engine",
            "table",
            "--settle-ms",
            "0",
            "--verdict",
            "aggregate",
            "--fail-attach",
            "posix_spawnp",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Run {
            engine,
            settle_ms,
            verdict,
            fail_attach,
            script,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(engine, EngineKind::Table);
        assert_eq!(settle_ms, Some(0));
        assert_eq!(verdict, Some(VerdictMode::Aggregate));
        assert_eq!(fail_attach, Some(EntryPoint::PosixSpawnp));
        assert!(script.is_none());
    }

    #[test]
    fn rejects_unknown_entry_point() {
        let parsed = Cli::try_parse_from(["spawnhook", "run", "--fail-attach", "CreateProcessW"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn table_engine_verifies_real_launches() {
        let _lock = lock_hook_tests();
        let script = quick_script(
            r#"
settle_ms: 0
operations:
  - entry: posix_spawn
    command: "sleep 5"
  - entry: posix_spawnp
    command: "true"
  - entry: posix_spawnp
    command: app_that_doesnt_exist
"#,
        );
        let code = verify(&script, EngineKind::Table, VerdictMode::PerEntry, None).unwrap();
        assert_eq!(code, EXIT_PASS);
    }

    #[test]
    fn injected_attach_failure_exits_with_install_code() {
        let _lock = lock_hook_tests();
        let script = quick_script(
            r#"
settle_ms: 0
operations:
  - entry: posix_spawn
    command: "true"
"#,
        );
        let code = verify(
            &script,
            EngineKind::Table,
            VerdictMode::PerEntry,
            Some(EntryPoint::PosixSpawn),
        )
        .unwrap();
        assert_eq!(code, EXIT_INSTALL_FAILED);
    }
}

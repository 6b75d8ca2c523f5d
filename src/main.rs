mod terminal_ui;

use clap::{Parser, Subcommand};
use second_thought::application::scheduler::DelayPolicy;
use second_thought::{
    run_until, ActivationOutcome, AppContext, AppSelection, AuthorizationStatus, InfraError,
    RunOptions, Scheme, TimingMode, Token,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use terminal_ui::TerminalChallengeUi;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "second-thought")]
#[command(about = "Put a typed challenge between you and the apps you open too often")]
#[command(version)]
struct Cli {
    /// Workspace holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true, env = "SECOND_THOUGHT_ROOT")]
    root: Option<PathBuf>,

    /// Shield authorization status reported to the engine
    #[arg(long, global = true, default_value = "approved")]
    authorization: AuthorizationStatus,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select the apps to monitor (tokens as issued by the app picker)
    Configure {
        #[arg(required = true)]
        tokens: Vec<String>,
    },
    /// Handle one activation trigger for a URL scheme
    Activate {
        scheme: String,
        /// Answer the challenge non-interactively
        #[arg(long)]
        response: Option<String>,
    },
    /// Fire pending timers until none are left
    Run {
        /// Keep running and pick up activations recorded by other processes
        #[arg(long, default_value_t = false)]
        follow: bool,
        /// Poll interval for --follow (seconds)
        #[arg(long, default_value_t = 5)]
        poll_seconds: u64,
    },
    /// Reconcile shield and timers from persisted state, then exit
    Restore,
    /// Print the current lifecycle state as JSON
    Status,
    /// Pin a scheme to a specific token
    Learn { scheme: String, token: String },
    /// Lift every block and cancel every timer
    UnblockAll,
    /// Forget the configuration, mappings and all lifecycle state
    Reset,
    /// Change the timing mode (default, random or dynamic)
    Mode { mode: TimingMode },
    /// Change the verification code length
    CodeLength { length: usize },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let root = match cli.root.clone() {
        Some(root) => root,
        None => match std::env::current_dir() {
            Ok(root) => root,
            Err(error) => {
                eprintln!("error: cannot resolve current directory: {error}");
                return ExitCode::FAILURE;
            }
        },
    };

    let mut context = match AppContext::open(&root, cli.authorization) {
        Ok(context) => context,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = init_tracing(&context.paths.logs_dir) {
        eprintln!("warning: file logging disabled: {error}");
    }

    match execute(&mut context, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "command failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logs_dir: &Path) -> Result<(), InfraError> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join("second-thought.log"))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(log_file)),
        )
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("logging: {error}")))
}

async fn execute(context: &mut AppContext, command: Command) -> Result<(), InfraError> {
    let lifecycle = &mut context.lifecycle;
    match command {
        Command::Configure { tokens } => {
            let tokens = tokens
                .into_iter()
                .map(Token::new)
                .collect::<Result<Vec<_>, _>>()
                .map_err(InfraError::InvalidInput)?;
            lifecycle.configure(AppSelection::from_tokens(tokens))?;
            println!("Monitoring {} app(s).", lifecycle.snapshot().selected_apps);
        }
        Command::Activate { scheme, response } => {
            let scheme = parse_scheme(&scheme)?;
            lifecycle.restore();
            let ui = TerminalChallengeUi::new(DelayPolicy::from_settings(lifecycle.settings()), response);
            match lifecycle.handle_activation(&scheme, &ui).await {
                ActivationOutcome::Debounced => println!("{scheme} opened (challenge passed moments ago)."),
                ActivationOutcome::Abandoned => println!("{scheme}: challenge cancelled."),
                ActivationOutcome::Unresolved => {
                    println!("{scheme}: challenge passed, but no app token is known for it.")
                }
                ActivationOutcome::Monitoring { deadline } => {
                    println!("{scheme} unblocked until {}.", deadline.to_rfc3339())
                }
            }
        }
        Command::Run {
            follow,
            poll_seconds,
        } => {
            let options = RunOptions {
                follow,
                poll_interval: Duration::from_secs(poll_seconds.max(1)),
            };
            info!(follow, poll_seconds, "event loop starting");
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let summary = run_until(lifecycle, options, shutdown).await;
            info!(
                fired = summary.fired,
                restores = summary.restores,
                interrupted = summary.interrupted,
                "event loop stopped"
            );
        }
        Command::Restore => {
            let report = lifecycle.restore();
            println!(
                "Restored: {} expired, {} rescheduled.",
                report.expired.len(),
                report.rescheduled.len()
            );
        }
        Command::Status => {
            lifecycle.restore();
            println!("{}", serde_json::to_string_pretty(&lifecycle.snapshot())?);
        }
        Command::Learn { scheme, token } => {
            let scheme = parse_scheme(&scheme)?;
            let token = Token::new(token).map_err(InfraError::InvalidInput)?;
            lifecycle.learn(scheme, token);
        }
        Command::UnblockAll => {
            lifecycle.restore();
            let released = lifecycle.unblock_all();
            println!("Released {released} blocked app(s).");
        }
        Command::Reset => {
            lifecycle.restore();
            lifecycle.reset_configuration()?;
            println!("Configuration reset.");
        }
        Command::Mode { mode } => {
            let settings = context.set_timing_mode(mode)?;
            println!("Timing mode set to {}.", settings.timing_mode.display_name());
        }
        Command::CodeLength { length } => {
            let settings = context.set_verification_code_length(length)?;
            println!(
                "Verification code length set to {}.",
                settings.verification_code_length
            );
        }
    }
    Ok(())
}

fn parse_scheme(raw: &str) -> Result<Scheme, InfraError> {
    Scheme::parse(raw).map_err(InfraError::InvalidInput)
}

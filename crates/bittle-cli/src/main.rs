use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bittle_core::action_set::ActionSet;
use bittle_core::automate::{Scheduler, SchedulerEvent};
use bittle_core::config::Settings;
use bittle_core::protocol::{list_ports, SerialTransport, Session};
use bittle_core::training::TrainingRepl;

/// Bittle - serial automation and training for the Petoi Bittle
#[derive(Parser, Debug)]
#[command(name = "bittle")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RUST_LOG    Log filter (overrides --log-level and the settings file)")]
pub struct Cli {
    /// Settings file (default: <config dir>/bittle/bittle.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Serial port of the robot (overrides the settings file)
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Perform random actions at random intervals until Ctrl-C
    Automate {
        /// Action-set JSON file (overrides the settings file)
        #[arg(short, long)]
        actions: Option<PathBuf>,

        /// Repetitions per take; zero or less performs one take and exits
        #[arg(long)]
        act_times: Option<i64>,

        /// Stop after this many takes
        #[arg(long)]
        max_cycles: Option<u64>,
    },

    /// Queue commands interactively and send them on `run`
    Train,

    /// List serial ports
    Ports,

    /// Validate an action-set file and print its actions
    CheckActions {
        /// Action-set JSON file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Settings::default_path);
    let settings = match &config_path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    init_logging(cli.log_level.as_deref().unwrap_or(&settings.logging.level));
    info!("bittle v{}", bittle_core::VERSION);
    if let Some(path) = &config_path {
        debug!(path = %path.display(), "settings path");
    }

    match cli.command.clone() {
        Command::Ports => run_ports(),
        Command::CheckActions { file } => run_check_actions(file),
        command => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            let result = runtime.block_on(run_session(&cli, command, settings));
            // The stdin reader may still be parked on a blocking thread
            runtime.shutdown_background();
            result
        }
    }
}

fn init_logging(level: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from(filter))
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn run_ports() -> Result<()> {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{:04x}:{:04x}] {} {}",
                port.name,
                vid,
                pid,
                port.manufacturer.unwrap_or_default(),
                port.product.unwrap_or_default()
            ),
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

fn run_check_actions(file: PathBuf) -> Result<()> {
    let actions = ActionSet::load(&file)
        .with_context(|| format!("Invalid action set {}", file.display()))?;
    print!("{}", actions.summarize());
    Ok(())
}

/// Pick the port: flag, then settings, then the first port discovered
fn resolve_port(cli: &Cli, settings: &Settings) -> Result<String> {
    if let Some(port) = cli.port.clone().or_else(|| settings.serial.port.clone()) {
        return Ok(port);
    }
    match list_ports().into_iter().next() {
        Some(port) => {
            warn!(port = %port.name, "no port configured, using the first one found");
            Ok(port.name)
        }
        None => bail!("No serial port found; pass --port or set serial.port in the settings file"),
    }
}

async fn run_session(cli: &Cli, command: Command, mut settings: Settings) -> Result<()> {
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, releasing the robot");
            signal_token.cancel();
        }
    });

    let port = resolve_port(cli, &settings)?;
    let codec = settings.codec()?;
    let mut session = Session::with_codec(
        SerialTransport::new(),
        settings.session_config(port.clone()),
        codec,
    )
    .with_cancellation(cancel.clone());

    match command {
        Command::Automate {
            actions,
            act_times,
            max_cycles,
        } => {
            if let Some(n) = act_times {
                settings.automate.act_times = n;
            }
            if max_cycles.is_some() {
                settings.automate.max_cycles = max_cycles;
            }
            let path = actions
                .or_else(|| settings.automate.actions.clone())
                .context("No action set given; pass --actions or set automate.actions")?;
            let config = settings.scheduler_config()?;
            let scheduler = Scheduler::load(&path, config)
                .with_context(|| format!("Invalid action set {}", path.display()))?;
            info!(path = %path.display(), actions = scheduler.actions().len(), "action set loaded");

            connect(&mut session, &port).await?;
            let result = automate(scheduler, &mut session).await;
            session.park().await;
            result
        }
        Command::Train => {
            connect(&mut session, &port).await?;
            let mut repl = TrainingRepl::new(settings.queue_limits(), io::stdout());
            repl.print_usage()?;
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            let summary = repl.run(input, &mut session).await;
            session.park().await;
            let summary = summary.context("Training prompt failed")?;
            info!(inputs = summary.inputs, runs = summary.runs, exit = ?summary.exit, "training finished");
            Ok(())
        }
        Command::Ports | Command::CheckActions { .. } => Ok(()),
    }
}

async fn connect(session: &mut Session<SerialTransport>, port: &str) -> Result<()> {
    println!("Connecting to {} ...", port);
    session
        .connect()
        .await
        .with_context(|| format!("Failed to connect to the robot on {}", port))?;
    println!("Connected.");
    Ok(())
}

async fn automate(mut scheduler: Scheduler, session: &mut Session<SerialTransport>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut out = io::stdout();
        while let Some(event) = rx.recv().await {
            let line = match event {
                SchedulerEvent::Waiting { cycle, minutes } => {
                    format!("#{}: next action in {} min", cycle, minutes)
                }
                SchedulerEvent::Dispatching {
                    cycle,
                    action,
                    repetition,
                } => format!("#{}: {} ({})", cycle, action, repetition),
                SchedulerEvent::Unacknowledged { token, outcome } => {
                    format!("  {} not acknowledged ({:?})", token, outcome)
                }
                SchedulerEvent::Reconnected { cause } => format!("Reconnected after: {}", cause),
                SchedulerEvent::Finished { cycles, reason } => {
                    format!("Stopped after {} take(s) ({:?})", cycles, reason)
                }
            };
            let _ = writeln!(out, "{}", line);
        }
    });

    scheduler = scheduler.with_events(tx);
    let result = scheduler.run(session).await;
    // Dropping the scheduler closes the event channel
    drop(scheduler);
    let _ = printer.await;

    let summary = result.context("Automation stopped")?;
    info!(
        cycles = summary.cycles,
        commands = summary.commands_sent,
        unacknowledged = summary.unacknowledged,
        reconnects = summary.reconnects,
        "automation finished"
    );
    Ok(())
}

//! Terminal front end for the desklight task board.
//!
//! # Responsibility
//! - Wire configuration, logging, gateway, push channel and runtime together.
//! - Read commands from stdin and print view changes as they happen.

mod input;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use desklight_core::push::{PushChannel, PushSettings, WsConnector};
use desklight_core::{
    default_log_level, init_logging, ClientConfig, Command, CommandOutcome, HttpGateway,
    LogTarget, Runtime, RuntimeHandle, SyncController, ViewSnapshot,
};
use input::{parse_line, Input, HELP};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const PUSH_EVENT_BUFFER: usize = 64;
const OUTCOME_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "desklight", version, about = "Terminal client for the desklight task board")]
struct Args {
    /// REST base URL (overrides DESKLIGHT_API_URL).
    #[arg(long)]
    api_url: Option<String>,

    /// STOMP-over-WebSocket endpoint (overrides DESKLIGHT_WS_URL).
    #[arg(long)]
    ws_url: Option<String>,

    /// trace|debug|info|warn|error
    #[arg(long, default_value_t = default_log_level().to_string())]
    log_level: String,

    /// Absolute directory for rotating log files; stderr when omitted.
    #[arg(long)]
    log_dir: Option<String>,

    /// Run without the push subscription.
    #[arg(long)]
    no_push: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let target = LogTarget::from_option(args.log_dir.as_deref()).map_err(anyhow::Error::msg)?;
    init_logging(&args.log_level, target).map_err(anyhow::Error::msg)?;

    let mut config = ClientConfig::from_env().context("invalid environment configuration")?;
    if let Some(url) = args.api_url.as_deref() {
        config = config.with_api_url(url).context("invalid --api-url")?;
    }
    if let Some(url) = args.ws_url.as_deref() {
        config = config.with_ws_url(url).context("invalid --ws-url")?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run(config, !args.no_push))
}

async fn run(config: ClientConfig, with_push: bool) -> Result<()> {
    let gateway = HttpGateway::from_config(&config).context("failed to build HTTP client")?;
    let controller =
        SyncController::with_notification_ttl(Arc::new(gateway), config.notification_ttl);
    let (mut runtime, mut handle) = Runtime::new(controller);

    let push = if with_push {
        let (events_tx, events_rx) = mpsc::channel(PUSH_EVENT_BUFFER);
        let push = PushChannel::spawn(WsConnector, PushSettings::from_config(&config), events_tx);
        runtime.attach_push(events_rx, push.state_changes());
        Some(push)
    } else {
        None
    };
    info!(
        "event=cli_start module=cli status=ok api_url={} ws_url={} push={}",
        config.api_url, config.ws_url, with_push
    );

    let loop_task = tokio::spawn(runtime.run());
    let mut view = handle.view();
    let mut shown: ViewSnapshot = view.borrow_and_update().clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tracker = OutcomeTracker::default();
    println!("connected to {}; type `help` for commands", config.api_url);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_line(&line) {
                    Ok(Input::Empty) => {}
                    Ok(Input::Help) => println!("{HELP}"),
                    Ok(Input::Quit) => break,
                    Ok(Input::ShowProjects) => {
                        println!("{}", render::render_projects(&shown.projects));
                    }
                    Ok(Input::ShowTasks) => println!("{}", render::render_tasks(&shown)),
                    Ok(Input::Run(command)) => {
                        tracker.sent(&command);
                        handle.send(command).await.context("runtime stopped")?;
                    }
                    Err(err) => println!("{err}"),
                }
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                for line in render::render_changes(&shown, &current) {
                    println!("{line}");
                }
                shown = current;
            }
            Some(outcome) = handle.next_outcome() => {
                tracker.received();
                print_outcome(&outcome);
            }
        }
    }

    drain_outcomes(&mut handle, &mut tracker).await;

    let _ = handle.send(Command::Shutdown).await;
    if let Err(err) = loop_task.await {
        warn!("event=cli_stop module=cli status=error error={err}");
    }
    if let Some(push) = push {
        push.close();
        push.join().await;
    }
    info!("event=cli_stop module=cli status=ok");
    Ok(())
}

/// Counts commands whose outcome has not been printed yet.
#[derive(Debug, Default)]
struct OutcomeTracker {
    pending: usize,
}

impl OutcomeTracker {
    fn sent(&mut self, command: &Command) {
        if command.reports_outcome() {
            self.pending += 1;
        }
    }

    fn received(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    fn pending(&self) -> usize {
        self.pending
    }
}

/// Prints outcomes still owed for sent commands, giving up after a timeout.
async fn drain_outcomes(handle: &mut RuntimeHandle, tracker: &mut OutcomeTracker) {
    let deadline = tokio::time::sleep(OUTCOME_DRAIN_TIMEOUT);
    tokio::pin!(deadline);
    while tracker.pending() > 0 {
        tokio::select! {
            outcome = handle.next_outcome() => match outcome {
                Some(outcome) => {
                    tracker.received();
                    print_outcome(&outcome);
                }
                None => break,
            },
            _ = &mut deadline => {
                warn!(
                    "event=cli_drain module=cli status=timeout pending={}",
                    tracker.pending()
                );
                break;
            }
        }
    }
}

fn print_outcome(outcome: &CommandOutcome) {
    match &outcome.result {
        Ok(()) => println!("ok: {}", outcome.command.replace('_', " ")),
        Err(err) => println!("failed: {}: {err}", outcome.command.replace('_', " ")),
    }
}

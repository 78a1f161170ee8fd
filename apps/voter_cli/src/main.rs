mod config;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use ballot_core::{
    ControllerEvent, HttpLedgerGateway, LedgerGateway, MissingLedgerGateway, VotingController,
    VotingError,
};
use clap::{Parser, Subcommand};
use shared::domain::{Address, CandidateId};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "voter-cli", about = "Register, vote and follow the live tally")]
struct Args {
    #[arg(long)]
    ledger_url: Option<String>,
    #[arg(long)]
    events_url: Option<String>,
    /// Operator address; defaults to the ledger's first account.
    #[arg(long)]
    operator: Option<String>,
    #[arg(long)]
    poll_interval_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Status,
    Candidates,
    Tally,
    Register {
        #[arg(long)]
        uid: String,
    },
    Vote {
        #[arg(long)]
        candidate: u64,
    },
    Delegate {
        #[arg(long)]
        to: String,
    },
    /// Print state changes until Ctrl-C.
    Watch,
}

impl Command {
    fn reads_ledger(&self) -> bool {
        matches!(
            self,
            Command::Status | Command::Candidates | Command::Tally | Command::Watch
        )
    }
}

impl Args {
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(v) = &self.ledger_url {
            settings.ledger_url = v.clone();
        }
        if let Some(v) = &self.events_url {
            settings.events_url = Some(v.clone());
        }
        if let Some(v) = &self.operator {
            settings.operator_address = Some(v.clone());
        }
        if let Some(v) = self.poll_interval_secs {
            settings.poll_interval_secs = v;
        }
    }
}

fn build_gateway(settings: &Settings) -> Result<Arc<dyn LedgerGateway>> {
    if !settings.has_ledger() {
        warn!("no ledger url configured, running read-only");
        return Ok(Arc::new(MissingLedgerGateway));
    }
    let (ledger_url, events_url) = settings.ledger_urls()?;
    let gateway = HttpLedgerGateway::new(&ledger_url, &events_url, settings.request_timeout())
        .context("failed to build ledger gateway")?;
    info!(ledger_url = %ledger_url, events_url = %events_url, "using http ledger gateway");
    Ok(Arc::new(gateway))
}

/// Starts the controller. When startup fails and the command only reads, one
/// direct refresh fills the roster and tallies instead.
async fn start_controller(controller: &VotingController, reads: bool) -> Result<(), VotingError> {
    let Err(err) = controller.start().await else {
        return Ok(());
    };
    warn!("controller started without ledger access: {err}");
    if reads {
        controller.refresh().await?;
    }
    Ok(())
}

fn hint(err: &VotingError) -> Option<&'static str> {
    match err {
        VotingError::ProviderUnavailable(_) => Some("check that the ledger endpoint is reachable"),
        VotingError::InvalidTransition { .. } => Some("run `voter-cli status` to see what is allowed"),
        VotingError::AlreadyPending(_) => Some("wait for the pending action to settle"),
        _ if err.is_retryable() => Some("the request can be retried"),
        _ => None,
    }
}

fn report(err: &VotingError) -> ExitCode {
    eprintln!("error: {err}");
    if let Some(hint) = hint(err) {
        eprintln!("hint: {hint}");
    }
    ExitCode::FAILURE
}

fn print_status(controller: &VotingController) {
    match controller.session() {
        Some(session) => {
            println!("address:  {}", session.address);
            println!("status:   {:?}", session.status);
            if let Some(target) = session.delegate_target {
                println!("delegate: {target}");
            }
            if session.status.is_terminal() {
                println!("ballot:   cast, no further actions");
            }
        }
        None => println!("no active voter session"),
    }
    if !controller.mutations_enabled() {
        println!("actions:  disabled");
    }
}

fn print_candidates(controller: &VotingController) {
    let snapshot = controller.get_tally_snapshot();
    for candidate in controller.get_candidates().iter() {
        let votes = snapshot
            .votes(candidate.id)
            .map(|votes| votes.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>4}  {:<24} {:<16} {votes}",
            candidate.id, candidate.name, candidate.party
        );
    }
}

fn print_tally(controller: &VotingController) {
    let snapshot = controller.get_tally_snapshot();
    println!("version {} ({} votes)", snapshot.version(), snapshot.total_votes());
    for (candidate_id, votes) in snapshot.counts() {
        println!("{candidate_id:>4}  {votes}");
    }
}

async fn watch(controller: &VotingController) {
    let mut events = controller.on_state_changed();
    print_tally(controller);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ControllerEvent::TallyUpdated { .. }) => print_tally(controller),
                Ok(ControllerEvent::SessionChanged(session)) => {
                    println!("session: {} is {:?}", session.address, session.status);
                }
                Ok(ControllerEvent::PushSourceLost) => {
                    println!("live updates lost, refreshing by polling only");
                }
                Ok(other) => println!("{other:?}"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "watch: dropped state-change events");
                    print_tally(controller);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    args.apply_to(&mut settings);

    let controller = VotingController::new(build_gateway(&settings)?, settings.controller_config()?);
    if let Err(err) = start_controller(&controller, args.command.reads_ledger()).await {
        controller.stop();
        return Ok(report(&err));
    }

    let outcome = match args.command {
        Command::Status => {
            print_status(&controller);
            ExitCode::SUCCESS
        }
        Command::Candidates => {
            print_candidates(&controller);
            ExitCode::SUCCESS
        }
        Command::Tally => {
            print_tally(&controller);
            ExitCode::SUCCESS
        }
        Command::Register { uid } => match controller.register(uid.into_bytes()).await {
            Ok(receipt) => {
                println!("registered (tx {})", receipt.receipt.tx_hash);
                ExitCode::SUCCESS
            }
            Err(err) => report(&err),
        },
        Command::Vote { candidate } => match controller.cast_vote(CandidateId(candidate)).await {
            Ok(receipt) => {
                println!("vote cast for {candidate} (tx {})", receipt.receipt.tx_hash);
                print_tally(&controller);
                ExitCode::SUCCESS
            }
            Err(err) => report(&err),
        },
        Command::Delegate { to } => {
            let target = Address::parse(&to).with_context(|| format!("invalid --to address '{to}'"))?;
            match controller.delegate(target.clone()).await {
                Ok(receipt) => {
                    println!("delegated to {target} (tx {})", receipt.receipt.tx_hash);
                    ExitCode::SUCCESS
                }
                Err(err) => report(&err),
            }
        }
        Command::Watch => {
            watch(&controller).await;
            ExitCode::SUCCESS
        }
    };

    controller.stop();
    Ok(outcome)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

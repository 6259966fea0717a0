//! `conductor` command-line entry point.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use conductor::controller::{Controller, Services};
use conductor::core::ledger::Ledger;
use conductor::core::types::Phase;
use conductor::exit_codes;
use conductor::io::config::{ConductorConfig, ConfigSources, load_config};
use conductor::io::git::Git;
use conductor::io::init::{ConductorPaths, InitOptions, init_conductor};
use conductor::io::interrupt::{InterruptFlag, install_ctrl_c};
use conductor::io::launcher::CommandLauncher;
use conductor::io::ledger_store::load_ledger;
use conductor::io::picker::{Picker, StdinPicker};
use conductor::io::review::GhReview;
use conductor::io::tracker::{BacklogFile, LabelRules};
use conductor::logging;
use conductor::looping::{LoopOptions, LoopStop, TickReport, run_loop};
use conductor::recovery::prune_stale;
use conductor::retry::{Retry, RetryPolicy};
use conductor::schedule::rank_untracked;
use conductor::ticker::IntervalTicker;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Run tracker tasks through isolated workers until their review requests merge"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.conductor/` with a default config and an empty backlog.
    Init {
        /// Overwrite an existing `.conductor/config.toml`.
        #[arg(short, long)]
        force: bool,
    },
    /// Prune stale state, then schedule and reconcile until done.
    Run(RunArgs),
    /// Print the tracked tasks.
    Status {
        /// Print the raw ledger document.
        #[arg(long)]
        json: bool,
    },
    /// Drop ledger entries whose work is gone or finished.
    Prune,
    /// Print untracked candidates in priority order.
    Rank,
    /// Ask a running controller to stop scheduling and exit once idle.
    Stop,
}

#[derive(Debug, Clone, Default, clap::Args)]
struct RunArgs {
    /// Maximum number of concurrently active tasks.
    #[arg(long)]
    cap: Option<usize>,
    /// Choose each batch interactively.
    #[arg(long)]
    manual: bool,
    /// Start workers in planning mode.
    #[arg(long)]
    plan: bool,
    /// Keep polling when the backlog runs dry.
    #[arg(long)]
    wait: bool,
    /// Run a single tick and exit.
    #[arg(long)]
    once: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut ConductorConfig) -> Result<()> {
        if let Some(cap) = self.cap {
            config.cap = cap;
        }
        config.planning |= self.plan;
        config.keep_waiting |= self.wait;
        config.validate()?;
        Ok(())
    }
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
    std::process::exit(exit_codes::OK);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve working directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run(args) => cmd_run(&root, &args),
        Command::Status { json } => cmd_status(&root, json),
        Command::Prune => cmd_prune(&root),
        Command::Rank => cmd_rank(&root),
        Command::Stop => cmd_stop(&root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let paths = init_conductor(root, &InitOptions { force })?;
    println!("initialized {}", paths.conductor_dir.display());
    Ok(())
}

/// Paths and merged config for an initialized repository.
fn load(root: &Path) -> Result<(ConductorPaths, ConductorConfig)> {
    let paths = ConductorPaths::new(root);
    if !paths.conductor_dir.is_dir() {
        bail!(
            "{} not found; run `conductor init` first",
            paths.conductor_dir.display()
        );
    }
    let config = load_config(&ConfigSources::for_root(root))?;
    Ok((paths, config))
}

/// Production adapters for one repository.
struct Adapters {
    tasks: BacklogFile,
    review: GhReview,
    vcs: Git,
    launcher: CommandLauncher,
}

impl Adapters {
    fn connect(root: &Path, paths: &ConductorPaths, config: &ConductorConfig) -> Result<Self> {
        let vcs = Git::new(root);
        vcs.ensure_repository()?;
        let review = GhReview::new(
            config.review.command.clone(),
            root,
            Duration::from_secs(config.review.timeout_secs),
        );
        review.ensure_available()?;
        Ok(Self {
            tasks: BacklogFile::new(paths.backlog(config), LabelRules::from(&config.tracker)),
            review,
            vcs,
            launcher: CommandLauncher::new(config.worker.command.clone(), paths.logs_dir.clone()),
        })
    }

    fn services(&self) -> Services<'_> {
        Services {
            tasks: &self.tasks,
            review: &self.review,
            vcs: &self.vcs,
            launcher: &self.launcher,
        }
    }
}

fn cmd_run(root: &Path, args: &RunArgs) -> Result<()> {
    let (paths, mut config) = load(root)?;
    args.apply(&mut config)?;
    let adapters = Adapters::connect(root, &paths, &config)?;
    let mut ctl = Controller::open(config, paths, adapters.services())?;
    let now = ctl.now();
    ctl.ledger.begin_session(now)?;
    info!(
        session_id = %ctl.ledger.current().session_id,
        cap = ctl.config.cap,
        planning = ctl.config.planning,
        "session started"
    );

    let pruned = prune_stale(&mut ctl);
    if pruned.changed() {
        println!(
            "pruned: {} cleaned, {} detached",
            pruned.cleaned.len(),
            pruned.detached.len()
        );
    }

    let interrupt = InterruptFlag::new();
    install_ctrl_c(interrupt.clone())?;
    let mut ticker = IntervalTicker::new(
        Duration::from_secs(ctl.config.poll_interval_secs),
        interrupt,
    );
    let stdin_picker = args.manual.then(StdinPicker::new);
    let picker = stdin_picker.as_ref().map(|p| p as &dyn Picker);

    let outcome = run_loop(
        &mut ctl,
        &mut ticker,
        picker,
        LoopOptions { once: args.once },
        print_tick,
    )?;
    match &outcome.stop {
        LoopStop::StopRequested => println!("stop requested; no active tasks remain"),
        LoopStop::Exhausted => println!("no candidates left and no active tasks"),
        LoopStop::Interrupted { reverted } => {
            println!("interrupted; reverted {} task(s)", reverted.len());
        }
        LoopStop::Once => {}
    }
    info!(
        ticks = outcome.ticks,
        launched = outcome.launched,
        stop = ?outcome.stop,
        "controller finished"
    );
    Ok(())
}

fn print_tick(report: &TickReport) {
    for t in &report.reconcile.transitions {
        println!("{}: {} -> {} ({})", t.id, t.from, t.to, t.status);
    }
    for (id, reason) in &report.reconcile.failed {
        println!("{id}: not advanced: {reason}");
    }
    if let Some(schedule) = &report.schedule {
        for id in &schedule.launched {
            println!("{id}: launched");
        }
        for (id, reason) in &schedule.failed {
            println!("{id}: launch failed: {reason}");
        }
        for rejection in &schedule.rejected {
            println!("rejected: {rejection}");
        }
    }
}

fn cmd_status(root: &Path, json: bool) -> Result<()> {
    let paths = ConductorPaths::new(root);
    if !paths.ledger_path.exists() {
        println!("no ledger at {}", paths.ledger_path.display());
        return Ok(());
    }
    let ledger = load_ledger(&paths.ledger_path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
        return Ok(());
    }
    print!("{}", render_status(&ledger));
    Ok(())
}

fn render_status(ledger: &Ledger) -> String {
    let mut out = format!(
        "session {} (started {})\n",
        ledger.session_id,
        ledger.started_at.to_rfc3339()
    );
    if ledger.tasks.is_empty() {
        out.push_str("no tracked tasks\n");
        return out;
    }
    for record in ledger.tasks.values() {
        let review = record
            .review
            .as_ref()
            .map(|r| format!("  {}", r.url))
            .unwrap_or_default();
        out.push_str(&format!(
            "  {:<12} {:<16} {}  {}{}\n",
            record.id,
            record.phase.as_str(),
            record.branch,
            record.status,
            review
        ));
    }
    let phases = [
        Phase::Selected,
        Phase::Planning,
        Phase::Executing,
        Phase::AwaitingReview,
        Phase::Merged,
    ];
    let summary: Vec<String> = phases
        .iter()
        .filter_map(|&phase| {
            let ids = ledger.ids_in(phase);
            (!ids.is_empty()).then(|| format!("{}={}", phase, ids.len()))
        })
        .collect();
    out.push_str(&format!("active: {}\n", summary.join(" ")));
    out
}

fn cmd_prune(root: &Path) -> Result<()> {
    let (paths, config) = load(root)?;
    let adapters = Adapters::connect(root, &paths, &config)?;
    let mut ctl = Controller::open(config, paths, adapters.services())?;
    let report = prune_stale(&mut ctl);
    println!(
        "cleaned {}, detached {}, kept {}, failed {}",
        report.cleaned.len(),
        report.detached.len(),
        report.kept.len(),
        report.failed.len()
    );
    for (id, reason) in &report.failed {
        println!("  {id}: {reason}");
    }
    Ok(())
}

fn cmd_rank(root: &Path) -> Result<()> {
    let (paths, config) = load(root)?;
    let tasks = BacklogFile::new(paths.backlog(&config), LabelRules::from(&config.tracker));
    let ledger = if paths.ledger_path.exists() {
        load_ledger(&paths.ledger_path)?
    } else {
        Ledger::new("unsaved", Utc::now())
    };
    let retry = Retry::new(RetryPolicy::from(&config.retry));
    let ranked = rank_untracked(&tasks, &config, &ledger, &retry)?;
    if ranked.is_empty() {
        println!("no candidates");
    }
    for scored in &ranked {
        println!(
            "{:>8.1}  {}  {}",
            scored.score, scored.candidate.id, scored.candidate.title
        );
    }
    Ok(())
}

fn cmd_stop(root: &Path) -> Result<()> {
    let paths = ConductorPaths::new(root);
    paths.request_stop()?;
    println!("stop requested: {}", paths.stop_path.display());
    Ok(())
}

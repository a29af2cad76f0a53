use clap::{Parser, Subcommand};

use entire::commands::{agent, hooks_cmd, query_cmd, rewind_cmd, sessions_cmd};
use entire::commands::agent::AgentHookPayload;
use entire::git::repository::Repository;
use entire::hooks::install;
use entire::utils::debug_log;

#[derive(Parser)]
#[command(name = "entire")]
#[command(about = "Checkpoint, attribute, and rewind AI coding agent work", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the git hooks into this repository
    Init,
    /// Remove the git hooks and restore any backups
    Uninstall,
    /// Git hook entry points (invoked by the installed hook scripts)
    Hooks {
        #[command(subcommand)]
        kind: HookKind,
    },
    /// Agent lifecycle events (invoked by agent-side hooks, payload on stdin)
    Agent {
        #[command(subcommand)]
        event: AgentEvent,
    },
    /// List condensed checkpoints
    Checkpoints {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one checkpoint's metadata, transcript, or attribution
    Show {
        id: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        transcript: bool,
        #[arg(long)]
        attribution: bool,
    },
    /// Rewind the working tree to a checkpoint or commit
    Rewind {
        /// Checkpoint id or commit-ish; omit with --list to enumerate targets
        target: Option<String>,
        #[arg(long)]
        list: bool,
        #[arg(long)]
        limit: Option<usize>,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Inspect or end agent sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum HookKind {
    /// `entire hooks git <event> [args...]`
    Git {
        event: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AgentEvent {
    TurnStart,
    Save,
    TurnEnd,
    SessionEnd,
}

#[derive(Subcommand)]
enum SessionAction {
    List,
    End { session_id: String },
    Cleanup,
}

fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Init => report(install_hooks()),
        Commands::Uninstall => report(uninstall_hooks()),
        Commands::Hooks {
            kind: HookKind::Git { event, args },
        } => hooks_cmd::run(&event, &args),
        Commands::Agent { event } => run_agent_event(event),
        Commands::Checkpoints { limit } => report(query_cmd::checkpoints(limit)),
        Commands::Show {
            id,
            session,
            transcript,
            attribution,
        } => report(query_cmd::show(&id, session.as_deref(), transcript, attribution)),
        Commands::Rewind {
            target,
            list,
            limit,
            yes,
        } => {
            if list || target.is_none() {
                report(query_cmd::rewind_points(limit))
            } else {
                report(rewind_cmd::run(target.as_deref().unwrap_or_default(), yes))
            }
        }
        Commands::Sessions { action } => match action {
            SessionAction::List => report(sessions_cmd::list()),
            SessionAction::End { session_id } => report(sessions_cmd::end(&session_id)),
            SessionAction::Cleanup => report(sessions_cmd::cleanup()),
        },
    };

    std::process::exit(exit_code);
}

fn install_hooks() -> Result<(), entire::error::EntireError> {
    let repo = Repository::discover()?;
    install::install(&repo)?;
    println!("Installed entire hooks into {}", repo.common_dir().join("hooks").display());
    Ok(())
}

fn uninstall_hooks() -> Result<(), entire::error::EntireError> {
    let repo = Repository::discover()?;
    install::uninstall(&repo)?;
    println!("Removed entire hooks.");
    Ok(())
}

/// Agent events are fired from inside the agent's tool pipeline; like git
/// hooks they must never break the agent, so failures are logged and exit 0.
fn run_agent_event(event: AgentEvent) -> i32 {
    let result = (|| {
        let repo = Repository::discover()?;
        entire::config::Settings::load_for_worktree(repo.workdir());
        let payload = AgentHookPayload::from_stdin()?;
        match event {
            AgentEvent::TurnStart => agent::turn_start(&repo, &payload),
            AgentEvent::Save => agent::save_changes(&repo, &payload),
            AgentEvent::TurnEnd => agent::turn_end(&repo, &payload),
            AgentEvent::SessionEnd => agent::session_end(&repo, &payload),
        }
    })();

    if let Err(e) = result {
        debug_log(&format!("agent event failed: {}", e));
    }
    0
}

fn report(result: Result<(), entire::error::EntireError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    }
}

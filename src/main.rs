use clap::{Parser, Subcommand};
use inbox_planner::application::bootstrap::bootstrap_workspace;
use inbox_planner::application::commands::{
    analysis_history_impl, analyze_email_impl, analyze_recent_emails_impl, analyze_text_impl,
    approve_event_candidate_impl, approve_task_candidate_impl, authenticate_google_impl,
    complete_todo_impl, delete_analysis_history_impl, delete_event_impl, delete_todo_impl,
    list_candidates_impl, list_events_impl, list_todos_impl, reject_event_candidate_impl,
    reject_task_candidate_impl, AppState,
};
use inbox_planner::infrastructure::error::InfraError;
use inbox_planner::infrastructure::logging::init_logging;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "inbox-planner", version, about = "Turn email into task and event candidates")]
struct Cli {
    /// Workspace holding config/, state/ and logs/.
    #[arg(long, global = true, env = "INBOX_PLANNER_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// User id; defaults to `userId` in config/app.json.
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace layout and default config files.
    Bootstrap,

    /// Check the stored Gmail token, or exchange an authorization code.
    Auth {
        #[arg(long)]
        code: Option<String>,
    },

    /// Analyze text without fetching or persisting anything.
    AnalyzeText {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        sender: String,
        /// Email body; read from stdin when omitted.
        #[arg(long)]
        body: Option<String>,
    },

    /// Fetch one Gmail message, analyze it, and store confident candidates.
    AnalyzeEmail { email_id: String },

    /// Analyze recent inbox messages that were not analyzed before.
    AnalyzeRecent {
        #[arg(long)]
        limit: Option<u32>,
    },

    /// List pending task and event candidates.
    Candidates {
        #[arg(long)]
        limit: Option<u32>,
    },

    Approve {
        #[command(subcommand)]
        target: CandidateTarget,
    },

    Reject {
        #[command(subcommand)]
        target: CandidateTarget,
    },

    Todos {
        /// Include completed todos.
        #[arg(long)]
        all: bool,
    },

    CompleteTodo { todo_id: String },

    DeleteTodo { todo_id: String },

    Events,

    DeleteEvent { event_id: String },

    /// Show analysis history, newest first.
    History {
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Forget an analyzed email so the next batch picks it up again.
    DeleteHistory { email_id: String },
}

#[derive(Subcommand)]
enum CandidateTarget {
    Task { candidate_id: String },
    Event { candidate_id: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), InfraError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_stdin() -> Result<String, InfraError> {
    Ok(std::io::read_to_string(std::io::stdin())?)
}

async fn run(state: &AppState, user: Option<String>, command: Commands) -> Result<(), InfraError> {
    match command {
        Commands::Bootstrap => print_json(&serde_json::json!({
            "configDir": state.config_dir(),
            "databasePath": state.database_path(),
            "logsDir": state.logs_dir(),
            "extractionMode": state.extraction_mode(),
        })),
        Commands::Auth { code } => print_json(&authenticate_google_impl(state, user, code).await?),
        Commands::AnalyzeText {
            subject,
            sender,
            body,
        } => {
            let body = match body {
                Some(body) => body,
                None => read_stdin()?,
            };
            print_json(&analyze_text_impl(state, body, sender, subject).await?)
        }
        Commands::AnalyzeEmail { email_id } => {
            print_json(&analyze_email_impl(state, user, email_id).await?)
        }
        Commands::AnalyzeRecent { limit } => {
            print_json(&analyze_recent_emails_impl(state, user, limit).await?)
        }
        Commands::Candidates { limit } => print_json(&list_candidates_impl(state, user, limit)?),
        Commands::Approve { target } => match target {
            CandidateTarget::Task { candidate_id } => {
                print_json(&approve_task_candidate_impl(state, user, candidate_id)?)
            }
            CandidateTarget::Event { candidate_id } => {
                print_json(&approve_event_candidate_impl(state, user, candidate_id)?)
            }
        },
        Commands::Reject { target } => match target {
            CandidateTarget::Task { candidate_id } => {
                print_json(&reject_task_candidate_impl(state, user, candidate_id)?)
            }
            CandidateTarget::Event { candidate_id } => {
                print_json(&reject_event_candidate_impl(state, user, candidate_id)?)
            }
        },
        Commands::Todos { all } => print_json(&list_todos_impl(state, user, all)?),
        Commands::CompleteTodo { todo_id } => print_json(&complete_todo_impl(state, user, todo_id)?),
        Commands::DeleteTodo { todo_id } => print_json(&delete_todo_impl(state, user, todo_id)?),
        Commands::Events => print_json(&list_events_impl(state, user)?),
        Commands::DeleteEvent { event_id } => print_json(&delete_event_impl(state, user, event_id)?),
        Commands::History { limit } => print_json(&analysis_history_impl(state, user, limit)?),
        Commands::DeleteHistory { email_id } => {
            print_json(&delete_analysis_history_impl(state, user, email_id)?)
        }
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Bootstrap => "bootstrap",
        Commands::Auth { .. } => "authenticate_google",
        Commands::AnalyzeText { .. } => "analyze_text",
        Commands::AnalyzeEmail { .. } => "analyze_email",
        Commands::AnalyzeRecent { .. } => "analyze_recent_emails",
        Commands::Candidates { .. } => "list_candidates",
        Commands::Approve { .. } => "approve_candidate",
        Commands::Reject { .. } => "reject_candidate",
        Commands::Todos { .. } => "list_todos",
        Commands::CompleteTodo { .. } => "complete_todo",
        Commands::DeleteTodo { .. } => "delete_todo",
        Commands::Events => "list_events",
        Commands::DeleteEvent { .. } => "delete_event",
        Commands::History { .. } => "analysis_history",
        Commands::DeleteHistory { .. } => "delete_analysis_history",
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(path) => path,
            Err(error) => {
                eprintln!("failed to resolve workspace: {error}");
                return ExitCode::FAILURE;
            }
        },
    };

    // Bootstrap first so the logs directory exists before logging starts.
    let bootstrap = match bootstrap_workspace(&workspace_root) {
        Ok(result) => result,
        Err(error) => {
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(error) = init_logging(&bootstrap.logs_dir) {
        eprintln!("failed to initialize logging: {error}");
    }

    let state = match AppState::new(workspace_root) {
        Ok(state) => state,
        Err(error) => {
            tracing::error!(%error, "failed to initialize app state");
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };

    let name = command_name(&cli.command);
    match run(&state, cli.user, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", state.command_error(name, &error));
            ExitCode::FAILURE
        }
    }
}

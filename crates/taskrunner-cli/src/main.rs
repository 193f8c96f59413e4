//! Taskrunner CLI: create, advance and inspect flow tasks.
//!
//! Every command opens the SQLite database directly and drives the same
//! core engine the HTTP server uses, so a task created here can be advanced
//! by a server sharing the file and vice versa.

mod commands;

use clap::{Parser, Subcommand};

/// Deterministic flow task runner
#[derive(Parser, Debug)]
#[command(name = "taskrunner", version, about = "Deterministic flow task runner")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "TASKRUNNER_DB_PATH", default_value = "taskrunner.db", global = true)]
    db: String,

    /// Optional YAML runner configuration
    #[arg(long, env = "TASKRUNNER_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3220)]
        port: u16,
    },

    /// Create a task for a registered flow
    Create {
        /// Flow name (see `taskrunner flows`)
        #[arg(long)]
        flow: String,
        /// Initial input as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,
    },

    /// Execute the next node of a task
    Advance {
        /// Task ID
        #[arg(long)]
        id: String,
    },

    /// Advance a task until it finishes or the step budget is spent
    Run {
        /// Task ID
        #[arg(long)]
        id: String,
        /// Maximum number of advances
        #[arg(long, default_value_t = 64)]
        max_steps: usize,
    },

    /// Get a task by ID
    Get {
        /// Task ID
        #[arg(long)]
        id: String,
    },

    /// List all tasks
    List,

    /// Show a task with its steps, tool calls, snapshots and audit entries
    Show {
        /// Task ID
        #[arg(long)]
        id: String,
    },

    /// List registered flows
    Flows,

    /// List registered tools and the allowlist
    Tools,

    /// Dry-run an input against a flow without creating a task
    Validate {
        /// Flow name
        #[arg(long)]
        flow: String,
        /// Input as a JSON object
        #[arg(long, default_value = "{}")]
        input: String,
    },

    /// Print counters and row counts by status
    Metrics,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON only.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskrunner_core=warn,taskrunner_server=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = execute(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<(), String> {
    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        return Ok(());
    };

    let db = cli.db;
    let config = cli.config;
    let state = || commands::init_state(&db, config.as_deref());

    match command {
        Commands::Server { host, port } => {
            commands::server::run(host, port, db.clone(), config.clone()).await
        }
        Commands::Create { flow, input } => commands::task::create(&state()?, &flow, &input).await,
        Commands::Advance { id } => commands::task::advance(&state()?, &id).await,
        Commands::Run { id, max_steps } => commands::task::run(&state()?, &id, max_steps).await,
        Commands::Get { id } => commands::task::get(&state()?, &id).await,
        Commands::List => commands::task::list(&state()?).await,
        Commands::Show { id } => commands::task::show(&state()?, &id).await,
        Commands::Flows => commands::catalog::flows(&state()?),
        Commands::Tools => commands::catalog::tools(&state()?),
        Commands::Validate { flow, input } => {
            commands::catalog::validate(&state()?, &flow, &input).await
        }
        Commands::Metrics => commands::metrics::show(&state()?).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_with_global_db() {
        let cli = Cli::try_parse_from([
            "taskrunner",
            "create",
            "--flow",
            "echo_add",
            "--input",
            r#"{"text":"hi"}"#,
            "--db",
            "/tmp/t.db",
        ])
        .unwrap();
        assert_eq!(cli.db, "/tmp/t.db");
        match cli.command {
            Some(Commands::Create { flow, input }) => {
                assert_eq!(flow, "echo_add");
                assert_eq!(input, r#"{"text":"hi"}"#);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["taskrunner", "run", "--id", "abc"]).unwrap();
        match cli.command {
            Some(Commands::Run { id, max_steps }) => {
                assert_eq!(id, "abc");
                assert_eq!(max_steps, 64);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_server_and_rejects_unknown() {
        let cli = Cli::try_parse_from(["taskrunner", "server", "--port", "9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Server { port: 9000, .. })
        ));
        assert!(Cli::try_parse_from(["taskrunner", "advance"]).is_err());
        assert!(Cli::try_parse_from(["taskrunner", "frobnicate"]).is_err());
    }
}

//! AgentFlow CLI - provision templates and agents, trigger and inspect runs.
//!
//! Reuses the same core domain logic (agentflow-core) and server bootstrap
//! (agentflow-server) as the HTTP deployment.

use agentflow_cli::commands;
use clap::{Parser, Subcommand};

/// AgentFlow CLI - Multi-step workflow orchestration for tenant agents
#[derive(Parser)]
#[command(name = "agentflow", version, about = "AgentFlow CLI - workflow orchestration for tenant agents")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "AGENTFLOW_DB_PATH", default_value = "agentflow.db")]
    db: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the AgentFlow HTTP server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3210)]
        port: u16,
        /// Number of workflow steps executed concurrently
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },

    /// Provision workflow templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Manage tenant agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Trigger and inspect workflow runs
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Import a template from a YAML file
    Import {
        /// Path to the template YAML file
        file: String,
        /// Owning tenant; omit to publish a system template
        #[arg(long)]
        tenant_id: Option<String>,
    },
    /// List templates visible to a tenant
    List {
        #[arg(long, env = "AGENTFLOW_TENANT_ID")]
        tenant_id: String,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Register an agent for a tenant
    Create {
        #[arg(long, env = "AGENTFLOW_TENANT_ID")]
        tenant_id: String,
        /// Agent name
        #[arg(long)]
        name: String,
        /// Agent ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// List a tenant's agents
    List {
        #[arg(long, env = "AGENTFLOW_TENANT_ID")]
        tenant_id: String,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Trigger a workflow run against a set of agents
    Trigger {
        /// Template ID
        template_id: String,
        /// Agent IDs (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        agent_ids: Vec<String>,
        #[arg(long, env = "AGENTFLOW_TENANT_ID")]
        tenant_id: String,
        #[arg(long, env = "AGENTFLOW_USER_ID")]
        user_id: String,
        /// Run the steps in this process and wait for the run to finish.
        /// Without it the run stays pending until an engine starts.
        #[arg(long)]
        wait: bool,
    },
    /// List a tenant's runs, newest first
    List {
        #[arg(long, env = "AGENTFLOW_TENANT_ID")]
        tenant_id: String,
        /// pending, running, completed or failed
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Cursor from a previous page's nextCursor
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Show one run with its template's steps
    Get {
        /// Run ID
        id: String,
        #[arg(long, env = "AGENTFLOW_TENANT_ID")]
        tenant_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentflow_core=warn,agentflow_server=warn,agentflow_cli=info".into()),
        )
        .init();

    let result = if let Some(command) = cli.command {
        match command {
            Commands::Server {
                host,
                port,
                workers,
            } => commands::server::run(host, port, cli.db, workers).await,

            Commands::Template { action } => {
                let state = commands::init_state(&cli.db);
                match action {
                    TemplateAction::Import { file, tenant_id } => {
                        commands::template::import(&state, &file, tenant_id.as_deref()).await
                    }
                    TemplateAction::List { tenant_id } => {
                        commands::template::list(&state, &tenant_id).await
                    }
                }
            }

            Commands::Agent { action } => {
                let state = commands::init_state(&cli.db);
                match action {
                    AgentAction::Create {
                        tenant_id,
                        name,
                        id,
                    } => commands::agent::create(&state, &tenant_id, &name, id.as_deref()).await,
                    AgentAction::List { tenant_id } => {
                        commands::agent::list(&state, &tenant_id).await
                    }
                }
            }

            Commands::Workflow { action } => match action {
                WorkflowAction::Trigger {
                    template_id,
                    agent_ids,
                    tenant_id,
                    user_id,
                    wait,
                } => {
                    // Only a waiting trigger runs steps; otherwise the run is
                    // left pending for the next engine to start.
                    let state = if wait {
                        commands::init_engine(&cli.db).await
                    } else {
                        commands::init_state(&cli.db)
                    };
                    commands::workflow::trigger(
                        &state,
                        &template_id,
                        agent_ids,
                        &tenant_id,
                        &user_id,
                        wait,
                    )
                    .await
                }
                WorkflowAction::List {
                    tenant_id,
                    status,
                    limit,
                    cursor,
                } => {
                    let state = commands::init_state(&cli.db);
                    commands::workflow::list(&state, &tenant_id, status.as_deref(), limit, cursor)
                        .await
                }
                WorkflowAction::Get { id, tenant_id } => {
                    let state = commands::init_state(&cli.db);
                    commands::workflow::get(&state, &id, &tenant_id).await
                }
            },
        }
    } else {
        // No subcommand - show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

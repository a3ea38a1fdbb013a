use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "maestro")]
#[command(author, version, about = "Multi-agent orchestration and planning engine", long_about = None)]
pub struct Cli {
    /// JSON file holding the agent configurations to register.
    #[arg(long, default_value = "agents.json", global = true)]
    pub agents_file: String,

    /// Directory for terminal task snapshots. Omit to keep them in memory.
    #[arg(long, global = true)]
    pub archive_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the agents file and list the configured agents
    Agents,

    /// Run a goal to completion under a single agent
    Run {
        /// Agent id from the agents file
        #[arg(short, long)]
        agent: String,

        #[arg(long, default_value = "task-1")]
        task_id: String,

        goal: String,
    },

    /// Run a goal across several agents under a coordination strategy
    Collaborate {
        /// Comma-separated agent ids; the first is the coordinator when
        /// the strategy is hierarchical
        #[arg(short, long, value_delimiter = ',')]
        agents: Vec<String>,

        /// parallel, sequential, or hierarchical
        #[arg(short, long, default_value = "parallel")]
        strategy: String,

        #[arg(long, default_value = "task-1")]
        task_id: String,

        /// Sequential only: keep going past a failed participant
        #[arg(long)]
        continue_on_failure: bool,

        goal: String,
    },

    /// Inspect an archived task snapshot (requires --archive-dir)
    State {
        #[arg(long)]
        task_id: String,
    },

    /// List the built-in capabilities agents can reference
    Capabilities,
}

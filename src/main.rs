use anyhow::{Context, Result};
use clap::Parser;
use maestro::archive::{FilesystemArchive, InMemoryArchive, StateArchive};
use maestro::cli::{Cli, Commands};
use maestro::collaboration::{CollaborationOptions, CoordinationStrategy};
use maestro::gateway::builtin::builtin_registry;
use maestro::gateway::openai::OpenAiGateway;
use maestro::{utils, AgentConfig, Engine, Settings, TaskStatus};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Agents => handle_agents(&cli.agents_file).await,
        Commands::Run {
            agent,
            task_id,
            goal,
        } => {
            let engine = build_engine(&cli.agents_file, cli.archive_dir.as_deref()).await?;
            handle_run(&engine, &agent, &task_id, &goal).await
        }
        Commands::Collaborate {
            agents,
            strategy,
            task_id,
            continue_on_failure,
            goal,
        } => {
            let engine = build_engine(&cli.agents_file, cli.archive_dir.as_deref()).await?;
            handle_collaborate(&engine, agents, &strategy, &task_id, continue_on_failure, &goal)
                .await
        }
        Commands::State { task_id } => handle_state(cli.archive_dir.as_deref(), &task_id).await,
        Commands::Capabilities => {
            println!("{}", builtin_registry().describe());
            Ok(())
        }
    }
}

async fn load_agents(path: &str) -> Result<Vec<AgentConfig>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read agents file {}", path))?;
    let configs: Vec<AgentConfig> =
        serde_json::from_str(&raw).with_context(|| format!("invalid agents file {}", path))?;
    Ok(configs)
}

async fn build_engine(agents_file: &str, archive_dir: Option<&str>) -> Result<Engine> {
    let settings = Settings::new()?;
    let api_key = Settings::api_key()?;

    let model = Arc::new(OpenAiGateway::new(api_key, settings.clone()));
    let tools = Arc::new(builtin_registry());
    let archive: Arc<dyn StateArchive> = match archive_dir {
        Some(dir) => Arc::new(FilesystemArchive::new(dir)),
        None => Arc::new(InMemoryArchive::new()),
    };

    let engine = Engine::new(settings, model, tools, archive);
    for config in load_agents(agents_file).await? {
        engine.register_agent(config).await?;
    }
    Ok(engine)
}

async fn handle_agents(agents_file: &str) -> Result<()> {
    let configs = load_agents(agents_file).await?;
    utils::print_header("Configured Agents");
    for config in &configs {
        config.validate()?;
        println!(
            "{}  [{:?}]  tools: {}",
            config.id,
            config.planning_strategy,
            if config.capabilities.is_empty() {
                "none".to_string()
            } else {
                config.capabilities.join(", ")
            }
        );
    }
    utils::print_success(&format!("{} agents, all valid", configs.len()));
    Ok(())
}

async fn handle_run(engine: &Engine, agent: &str, task_id: &str, goal: &str) -> Result<()> {
    utils::print_header(&format!("Running '{}' under agent '{}'", task_id, agent));
    let result = engine.run(agent, task_id, goal).await?;

    match result.status {
        TaskStatus::Completed => utils::print_success(&format!(
            "completed in {} steps:\n{}",
            result.steps_taken, result.output
        )),
        TaskStatus::Aborted => utils::print_warning(&format!(
            "{} after {} steps",
            result.output, result.steps_taken
        )),
        _ => utils::print_error(&result.output),
    }

    let metric = engine
        .get_performance(agent, chrono::Duration::minutes(60))
        .await;
    utils::print_info(&format!(
        "model calls: {}  tool calls: {}  tokens: {}  quality: {:.2}",
        metric.invocation_count, metric.tool_call_count, metric.tokens_used, metric.quality_score
    ));
    Ok(())
}

async fn handle_state(archive_dir: Option<&str>, task_id: &str) -> Result<()> {
    let dir = archive_dir.context("state inspection needs --archive-dir")?;
    let archive = FilesystemArchive::new(dir);
    let snapshot = archive
        .load(task_id)
        .await?
        .with_context(|| format!("no archived snapshot for task '{}'", task_id))?;

    utils::print_header(&format!("Task '{}'", task_id));
    println!(
        "agent: {}  status: {}  steps: {}",
        snapshot.current.agent_id,
        utils::status_badge(snapshot.current.status),
        snapshot.current.iteration_count
    );
    for step in &snapshot.current.step_history {
        let action = step
            .action
            .as_ref()
            .map(|a| format!(" [{}]", a.tool))
            .unwrap_or_default();
        println!("  {}. {}{}", step.iteration + 1, step.thought, action);
    }
    if !snapshot.predecessors.is_empty() {
        utils::print_info(&format!(
            "handed off through: {}",
            snapshot
                .predecessors
                .iter()
                .map(|p| p.agent_id.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        ));
    }
    Ok(())
}

async fn handle_collaborate(
    engine: &Engine,
    agents: Vec<String>,
    strategy: &str,
    task_id: &str,
    continue_on_failure: bool,
    goal: &str,
) -> Result<()> {
    let strategy: CoordinationStrategy = strategy.parse()?;
    utils::print_header(&format!(
        "Collaboration '{}' ({:?}, {} agents)",
        task_id,
        strategy,
        agents.len()
    ));

    let options = CollaborationOptions {
        continue_on_failure,
        session_timeout: None,
    };
    let session = engine
        .collaborate(&agents, task_id, goal, strategy, options)
        .await?;

    for participant in &session.participants {
        println!(
            "  {}  {}  ({} steps)",
            participant.agent_id,
            utils::status_badge(participant.status),
            participant.steps_taken
        );
    }
    match session.status {
        maestro::collaboration::SessionStatus::Completed => {
            utils::print_success(&format!("session completed:\n{}", session.output))
        }
        other => utils::print_warning(&format!("session ended {:?}:\n{}", other, session.output)),
    }
    Ok(())
}

//! agent-factory: build LLM agents from a goal.
//!
//! Commands:
//!
//!   agent-factory build <goal>     design, generate and review a set of agents
//!   agent-factory validate <file>  run one artifact in the sandbox and score it
//!   agent-factory history          list past builds
//!   agent-factory ping             check the API credential
//!
//! Requires ANTHROPIC_API_KEY environment variable (or --api-key).

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use agent_factory::config::{FactoryConfig, Overrides};
use agent_factory::designer::DesignError;
use agent_factory::factory::{
    BuildMode, BuildRequest, BuildResult, BuildStatus, Factory, PlanApprover, PlanDecision,
};
use agent_factory::history::History;
use agent_factory::llm::{LlmBackend, LlmClient, Role};
use agent_factory::output;
use agent_factory::plan::Plan;
use agent_factory::sandbox::ProcessSandbox;
use agent_factory::validator::{Validator, derive_test_case};
use agent_factory::workspace::FsArtifactSink;

#[derive(Parser)]
#[command(name = "agent-factory", version, about = "Design, generate, review and validate LLM agents")]
struct Cli {
    /// Config file (default: ~/.config/agent-factory/factory.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Claude model to use
    #[arg(long, global = true)]
    model: Option<String>,

    /// Base directory for build workspaces
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Build ledger database path
    #[arg(long, global = true)]
    history_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build agents for a goal
    Build {
        /// What the agents should do
        #[arg(required = true, num_args = 1..)]
        goal: Vec<String>,

        /// debug: show every step and ask before continuing
        #[arg(long, value_enum)]
        mode: Option<BuildMode>,

        /// Review retries per sub-agent
        #[arg(long)]
        max_retries: Option<u32>,

        /// Run the validator on every artifact after a successful build
        #[arg(long)]
        validate: bool,

        /// Interpreter for validation runs
        #[arg(long)]
        interpreter: Option<String>,
    },
    /// Validate an existing artifact
    Validate {
        file: PathBuf,

        /// Test input sent to the agent
        #[arg(long)]
        input: String,

        /// Evaluation criterion (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,

        /// Interpreter for the sandboxed run
        #[arg(long)]
        interpreter: Option<String>,
    },
    /// List recorded builds
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Check that the API key works
    Ping,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Use JSON logs when FACTORY_LOG_JSON=1, human-readable otherwise.
    // Logs go to stderr; stdout carries reports.
    let json_logs = std::env::var("FACTORY_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("agent_factory=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let (mode, max_retries, interpreter) = match &cli.command {
        Command::Build {
            mode,
            max_retries,
            interpreter,
            ..
        } => (*mode, *max_retries, interpreter.clone()),
        Command::Validate { interpreter, .. } => (None, None, interpreter.clone()),
        _ => (None, None, None),
    };
    let config = FactoryConfig::load(cli.config.as_deref())?.merge(Overrides {
        workspace_base: cli.workspace.clone(),
        model: cli.model.clone(),
        max_retries,
        mode,
        history_db: cli.history_db.clone(),
        interpreter,
    });

    let llm: Arc<dyn LlmBackend> = Arc::new(
        LlmClient::new(cli.api_key.clone())
            .with_model(&config.model)
            .with_max_tokens(config.max_tokens)
            .with_retry(config.retry.clone()),
    );

    match cli.command {
        Command::Build { goal, validate, .. } => {
            let goal = goal.join(" ");
            build(&config, llm, &goal, validate).await
        }
        Command::Validate {
            file,
            input,
            criteria,
            ..
        } => {
            let code = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let validator = validator(&config, llm);
            let report = validator.validate(&code, &input, &criteria).await;
            let name = file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            println!("{}", output::format_report(&name, &report));
            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::History { limit } => {
            let history = History::open(&config.history_db_path())?;
            for r in history.recent(limit)? {
                println!(
                    "{}  {:<9} {:<9} {}/{}  {}",
                    r.created_at, r.status, r.mode, r.artifacts, r.subagents, r.goal
                );
                if let Some(detail) = r.detail {
                    println!("    {detail}");
                }
                if let Some(ws) = r.workspace {
                    println!("    {ws}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Ping => {
            let reply = llm
                .invoke(Role::Designer, "Reply with the single word OK.", "ping")
                .await?;
            println!("API key OK ({}): {}", config.model, reply.trim());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validator(config: &FactoryConfig, llm: Arc<dyn LlmBackend>) -> Validator {
    Validator::new(
        Arc::new(ProcessSandbox::new(config.sandbox.clone())),
        llm,
    )
}

async fn build(
    config: &FactoryConfig,
    llm: Arc<dyn LlmBackend>,
    goal: &str,
    validate: bool,
) -> Result<ExitCode> {
    let sink = Arc::new(FsArtifactSink::new(&config.workspace_base));
    let factory = Factory::with_llm(llm.clone(), sink)
        .with_resources(config.resources.clone())
        .with_max_plan_revisions(config.max_plan_revisions);

    let debug = config.mode == BuildMode::Debug;
    let mut request = BuildRequest::new(goal)
        .mode(config.mode)
        .max_retries(config.max_retries)
        .observer(move |step: &str, payload: &serde_json::Value| {
            println!("{}", output::format_step(step, payload));
            if debug
                && step == "review:start"
                && let (Some(name), Some(code)) = (payload["name"].as_str(), payload["code"].as_str())
            {
                println!("{}", output::code(&format!("{name}.py"), code, 40));
            }
            if debug && step != "build:complete" {
                confirm("Continue?")
            } else {
                true
            }
        });
    if debug {
        request = request.approver(CliApprover);
    }

    tracing::info!(
        goal,
        mode = %config.mode,
        max_retries = config.max_retries,
        workspace = %config.workspace_base.display(),
        "Starting build"
    );
    let result = factory.build(request).await;
    println!("{}", output::format_result(&result));

    match History::open(&config.history_db_path()).and_then(|h| h.record(&result)) {
        Ok(()) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to record build history"),
    }

    if validate && result.status.is_success() {
        validate_artifacts(config, llm, &result).await;
    }

    Ok(match result.status {
        BuildStatus::Success => ExitCode::SUCCESS,
        BuildStatus::Failure(_) => ExitCode::from(1),
        BuildStatus::Cancelled { .. } => ExitCode::from(2),
    })
}

async fn validate_artifacts(config: &FactoryConfig, llm: Arc<dyn LlmBackend>, result: &BuildResult) {
    let Some(plan) = &result.plan else {
        return;
    };
    let validator = validator(config, llm);
    for spec in &plan.subagents {
        let Some(artifact) = result.artifacts.get(&spec.name) else {
            continue;
        };
        let case = derive_test_case(spec, Some(plan));
        let report = validator
            .validate(&artifact.code, &case.input, &case.criteria)
            .await;
        println!("{}", output::format_report(&spec.name, &report));
    }
}

/// Ask a yes/no question on the terminal. Empty answer means yes.
fn confirm(question: &str) -> bool {
    let answer = ask(&format!("{question} [Y/n] "));
    !matches!(answer.to_ascii_lowercase().as_str(), "n" | "no")
}

/// Prompt on stdout and read one trimmed line from stdin. The read runs via
/// `block_in_place` so a waiting prompt never stalls a runtime worker.
fn ask(prompt: &str) -> String {
    tokio::task::block_in_place(|| read_answer(prompt, &mut std::io::stdin().lock()))
}

fn read_answer(prompt: &str, input: &mut impl BufRead) -> String {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(_) => line.trim().to_string(),
        Err(_) => String::new(),
    }
}

fn plan_decision(answer: String) -> PlanDecision {
    match answer.to_ascii_lowercase().as_str() {
        "" | "a" | "approve" | "y" | "yes" => PlanDecision::Approve,
        "r" | "reject" | "n" | "no" => PlanDecision::Reject,
        _ => PlanDecision::Revise(answer),
    }
}

/// Plan approval on the terminal.
struct CliApprover;

#[async_trait]
impl PlanApprover for CliApprover {
    async fn review_plan(&self, plan: &Plan, revision: u32) -> PlanDecision {
        println!("{}", output::format_plan(plan));
        let question = format!(
            "Plan revision {revision}: [a]pprove, [r]eject, or type feedback to revise: "
        );
        plan_decision(ask(&question))
    }

    async fn on_design_error(&self, error: &DesignError) -> Option<String> {
        println!("[designer] ❌ {error}");
        let answer = ask("Type feedback to try again, or press enter to give up: ");
        if answer.is_empty() { None } else { Some(answer) }
    }
}

//! Conductor CLI: start, resume and inspect conversations in a project.
//!
//! Events of the running turn are printed to stdout. Input requests are
//! answered from stdin; for approvals, `y`, `yes` or an empty line approve and
//! anything else rejects. Closing stdin while input is pending leaves the
//! conversation suspended, to be continued later with `conductor resume`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use conductor::agents::planner::PROJECT_PLAN_SCHEMA;
use conductor::core::invariants::validate_plan;
use conductor::core::types::{
    ApprovalPayload, InterruptKind, InterruptRequest, InterruptResume, ProjectPlan,
};
use conductor::engine::{Engine, RunContext, TurnOutcome};
use conductor::error::ErrorKind;
use conductor::events::{Envelope, Event, EventBus};
use conductor::exit_codes;
use conductor::io::init::{InitOptions, init_conductor};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Human-approved agentic coding assistant"
)]
struct Cli {
    /// Project root containing `.conductor/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Print events as JSON lines instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.conductor/` with a default config.
    Init {
        /// Overwrite existing conductor-owned files.
        #[arg(short, long)]
        force: bool,
    },
    /// Start a conversation and drive its first turn.
    Run {
        /// The request for the assistant.
        prompt: String,
    },
    /// Continue a conversation: resume a suspended turn, or start a new turn
    /// when a prompt is given.
    Resume {
        conversation_id: String,
        prompt: Option<String>,
    },
    /// Print the persisted state of a conversation.
    Status { conversation_id: String },
    /// Check a project plan JSON file against the schema and plan invariants.
    ValidatePlan { path: PathBuf },
}

#[tokio::main]
async fn main() {
    conductor::logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    // Exit explicitly: a pending stdin read would otherwise hold the runtime open.
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => {
            let paths = init_conductor(&cli.root, &InitOptions { force })?;
            println!("initialized {}", paths.conductor_dir.display());
            Ok(exit_codes::OK)
        }
        Command::Run { prompt } => {
            let engine = open_engine(&cli.root)?;
            let receiver = engine.bus().subscribe();
            let conversation_id = engine.start(&prompt)?;
            eprintln!("conversation {conversation_id}");
            drive(&engine, &conversation_id, receiver, cli.json).await
        }
        Command::Resume {
            conversation_id,
            prompt,
        } => {
            let engine = open_engine(&cli.root)?;
            let receiver = engine.bus().subscribe();
            if let Some(prompt) = prompt {
                engine.send(&conversation_id, &prompt)?;
            }
            drive(&engine, &conversation_id, receiver, cli.json).await
        }
        Command::Status { conversation_id } => {
            let engine = open_engine(&cli.root)?;
            let record = engine
                .record(&conversation_id)?
                .ok_or_else(|| anyhow!("unknown conversation {conversation_id}"))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("status: {:?}", record.status);
                println!("turn: {}", record.turn);
                println!("stage: {:?}", record.stage);
                if let Some(classification) = &record.classification {
                    println!("route: {}", classification.route.as_str());
                }
                if let Some(pending) = &record.pending {
                    println!("waiting: {:?} for {}", pending.request.kind(), pending.frame);
                }
                if let Some(err) = &record.error {
                    println!("error: {err}");
                }
            }
            Ok(exit_codes::OK)
        }
        Command::ValidatePlan { path } => validate_plan_file(&path),
    }
}

fn open_engine(root: &Path) -> Result<Engine> {
    let ctx = RunContext::for_project(root, EventBus::new())
        .with_context(|| format!("open project at {}", root.display()))?;
    Ok(Engine::new(ctx))
}

/// Drive the conversation's turn, echoing events and answering input requests
/// from stdin. Returns the exit code.
async fn drive(
    engine: &Engine,
    conversation_id: &str,
    mut receiver: tokio::sync::broadcast::Receiver<Envelope>,
    json: bool,
) -> Result<i32> {
    let record = engine
        .record(conversation_id)?
        .ok_or_else(|| anyhow!("unknown conversation {conversation_id}"))?;
    if !record.is_resumable() {
        eprintln!("turn {} already finished: {:?}", record.turn, record.status);
        return Ok(match record.error {
            Some(err) if err.kind == ErrorKind::Cancelled => exit_codes::CANCELLED,
            Some(_) => exit_codes::FAILED,
            None => exit_codes::OK,
        });
    }

    let cancel = CancellationToken::new();
    let runner = {
        let engine = engine.clone();
        let conversation_id = conversation_id.to_string();
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(&conversation_id, &cancel).await })
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut queue: VecDeque<Envelope> = engine.bus().backlog(conversation_id).into();
    let mut last_seq = 0;
    loop {
        let envelope = match queue.pop_front() {
            Some(envelope) => envelope,
            None => tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    continue;
                }
                received = receiver.recv() => match received {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            },
        };
        if envelope.conversation_id != conversation_id || envelope.seq <= last_seq {
            continue;
        }
        last_seq = envelope.seq;
        print_event(&envelope, json);

        match &envelope.event {
            Event::InputRequested { request, .. } => {
                let Some(line) = read_answer(&mut stdin, &cancel).await? else {
                    eprintln!(
                        "input closed; conversation {conversation_id} is suspended \
                         (conductor resume {conversation_id})"
                    );
                    return Ok(exit_codes::CANCELLED);
                };
                let value = answer_value(request.kind(), &line);
                if let Err(err) = engine.bus().answer(conversation_id, request.kind(), value) {
                    eprintln!("{err}");
                }
            }
            event if event.is_terminal() => break,
            _ => {}
        }
    }

    let outcome = runner.await.context("turn task panicked")??;
    Ok(match outcome {
        TurnOutcome::Completed => exit_codes::OK,
        TurnOutcome::Failed(err) if err.kind == ErrorKind::Cancelled => exit_codes::CANCELLED,
        TurnOutcome::Failed(_) => exit_codes::FAILED,
    })
}

/// Next stdin line, or `None` on EOF. Ctrl-C cancels the turn instead.
async fn read_answer(
    stdin: &mut Lines<BufReader<Stdin>>,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    eprint!("> ");
    tokio::select! {
        line = stdin.next_line() => Ok(line.context("read stdin")?),
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Ok(Some(String::new()))
        }
    }
}

fn answer_value(kind: InterruptKind, line: &str) -> String {
    let line = line.trim();
    match kind {
        InterruptKind::Approval
            if matches!(line.to_ascii_lowercase().as_str(), "" | "y" | "yes") =>
        {
            InterruptResume::APPROVED.to_string()
        }
        _ => line.to_string(),
    }
}

fn print_event(envelope: &Envelope, json: bool) {
    if json {
        match serde_json::to_string(envelope) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("cannot serialize event: {err}"),
        }
        return;
    }
    match &envelope.event {
        Event::TurnStarted { turn, request } => println!("== turn {turn}: {request}"),
        Event::Classified { route, reasoning } => {
            println!("route: {} ({reasoning})", route.as_str());
        }
        Event::ContextCollected { round, bundle } => {
            println!("context round {round}: {}", bundle.retrieval_summary);
        }
        Event::ChatReply { text } => println!("{text}"),
        Event::PlanProposed { plan, revision } => {
            println!("plan (revision {revision}): {}", plan.strategy);
        }
        Event::StepStarted { step, index, total } => {
            println!("step {}/{total} [{}]: {}", index + 1, step.task_id, step.description);
        }
        Event::TaskStarted { frame, description } => println!("task {frame}: {description}"),
        Event::ProposalGenerated { attempt, plan, .. } => {
            println!("proposal {attempt}: {} ({} operations)", plan.summary, plan.operations.len());
        }
        Event::Evaluated { attempt, evaluation, .. } => {
            println!("evaluation {attempt}: {:?}: {}", evaluation.grade, evaluation.feedback);
        }
        Event::InputRequested { request, .. } => match request {
            InterruptRequest::Approval(ApprovalPayload::Steps(steps)) => {
                for (index, step) in steps.iter().enumerate() {
                    println!("  {}. [{}] {}", index + 1, step.task_id, step.description);
                }
                println!("approve plan? [Y/feedback]");
            }
            InterruptRequest::Approval(ApprovalPayload::Operations(previews)) => {
                for preview in previews {
                    println!(
                        "--- {:?} {}",
                        preview.operation_type,
                        preview.file_path.as_deref().unwrap_or("-")
                    );
                    print!("{}", preview.diff);
                }
                println!("apply changes? [Y/n]");
            }
            InterruptRequest::FreeTextFeedback => println!("what should change?"),
        },
        Event::InputAnswered { .. } => {}
        Event::OperationApplied {
            index,
            file_path,
            operation_type,
            ..
        } => println!(
            "applied #{index} {operation_type:?} {}",
            file_path.as_deref().unwrap_or("-")
        ),
        Event::TaskCompleted { summary, .. } => println!("done: {summary}"),
        Event::TurnCompleted { turn } => println!("== turn {turn} completed"),
        Event::TurnFailed { kind, message } => println!("== turn failed ({kind}): {message}"),
    }
}

fn validate_plan_file(path: &Path) -> Result<i32> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw).context("parse plan json")?;
    let schema: Value = serde_json::from_str(PROJECT_PLAN_SCHEMA).context("parse plan schema")?;
    let validator = jsonschema::validator_for(&schema).context("compile plan schema")?;

    let mut errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if errors.is_empty() {
        let plan: ProjectPlan = serde_json::from_value(value).context("decode plan")?;
        errors = validate_plan(&plan);
    }

    if errors.is_empty() {
        println!("ok");
        return Ok(exit_codes::OK);
    }
    for err in &errors {
        eprintln!("{err}");
    }
    Ok(exit_codes::INVALID)
}

use anyhow::Result;
use clap::Args;
use futures::StreamExt;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, Write};
use tracing::warn;

use crate::agent::{
    ConversationDriver, FeedbackAction, Message, ToolOutput, TurnCollector, TurnEvent, TurnRequest,
    extract_tool_detail, system_prompt_for,
};
use crate::config::Config;
use crate::preview::build_bundle;
use crate::session::{Phase, ProjectSession};
use crate::store::{NewProject, Store};

use super::project::{generate_slug, write_files};

const HELP_TEXT: &str = "\
Commands:
  /variants             List the current variants
  /select <ID>          Select a variant
  /approve <ID>         Approve a variant for the full build
  /iterate <ID>         Select a variant and start refining it
  /feedback <ID> <text> Leave a comment on a variant
  /submit               Send all collected feedback to the designer
  /preview <ID>         Write a variant's preview bundle to disk
  /phase                Show the current phase
  /help                 Show this help
  /quit                 Exit";

#[derive(Args)]
pub struct ChatArgs {
    /// Project ID to resume (created if it does not exist)
    #[arg(short, long)]
    pub project: Option<String>,

    /// Name for a new project
    #[arg(short, long, default_value = "Untitled Project")]
    pub name: String,

    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,
}

enum CommandResult {
    Continue,
    Quit,
    SendMessage(String),
    Error(String),
}

pub async fn run(args: ChatArgs, mut config: Config) -> Result<()> {
    if let Some(model) = args.model {
        config.agent.default_model = model;
    }

    let store = Store::open(&config.database_path())?;
    let project = match &args.project {
        Some(id) => store.get_or_create_project(id, &args.name)?,
        None => store.create_project(&NewProject::named(&args.name))?,
    };
    let mut session = store.load_session(&project.id)?;
    let driver = ConversationDriver::from_config(&config)?;

    println!(
        "Design IDE v{} | Project: {} ({}) | Model: {}",
        env!("CARGO_PKG_VERSION"),
        session.name(),
        session.project_id(),
        config.agent.default_model
    );
    println!(
        "Phase: {} - {}",
        session.phase().label(),
        session.phase().description()
    );
    if !session.transcript().is_empty() {
        println!("Resumed with {} messages", session.transcript().len());
    }
    println!("Type /help for commands, /quit to exit\n");

    let history_path = config.paths.chat_history();
    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    loop {
        let readline = rl.readline("You: ");

        let input = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                break; // Ctrl+D
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let _ = rl.add_history_entry(input);

        let message = if input.starts_with('/') {
            match handle_command(input, &mut session, &store, &config) {
                CommandResult::Continue => continue,
                CommandResult::Quit => break,
                CommandResult::SendMessage(msg) => msg,
                CommandResult::Error(e) => {
                    eprintln!("Error: {}\n", e);
                    continue;
                }
            }
        } else {
            input.to_string()
        };

        if let Err(e) = send_message(&driver, &store, &mut session, &message).await {
            eprintln!("\nError: {}\n", e);
        }
    }

    if let Err(e) = rl.save_history(&history_path) {
        warn!("Failed to save chat history: {}", e);
    }

    println!("Goodbye!");
    Ok(())
}

/// Run one designer turn and persist it once it finishes.
///
/// The user message joins the transcript only together with the completed
/// turn; a failed turn leaves session and store untouched.
async fn send_message(
    driver: &ConversationDriver,
    store: &Store,
    session: &mut ProjectSession,
    text: &str,
) -> Result<()> {
    let user_message = Message::user(text);
    let mut messages = session.transcript().to_vec();
    messages.push(user_message.clone());

    let request = TurnRequest {
        project_id: session.project_id().to_string(),
        system_prompt: system_prompt_for(driver.tools(), session.phase(), Some(session.name())),
        messages,
    };

    let mut stdout = io::stdout();
    print!("\nDesigner: ");
    stdout.flush()?;

    let mut stream = driver.run_turn(request);
    let mut collector = TurnCollector::new();
    let mut completed = None;

    while let Some(event) = stream.next().await {
        let event = event?;
        render_event(&event, &mut stdout)?;
        if let Some(turn) = collector.push(&event) {
            completed = Some(turn);
            break;
        }
    }
    println!("\n");

    let Some(turn) = completed else {
        anyhow::bail!("Turn ended without completing");
    };

    session.push_message(user_message.clone());
    let outcome = session.apply_turn(&turn);

    let mut new_messages = vec![user_message];
    new_messages.extend(turn.messages.iter().cloned());
    store.save_turn(session, &outcome, &new_messages)?;

    if let Some(phase) = outcome.phase {
        println!("Phase: {} - {}\n", phase.label(), phase.description());
    }
    if let Some(question) = session.pending_question() {
        print_question_options(question);
    }

    Ok(())
}

fn render_event(event: &TurnEvent, stdout: &mut io::Stdout) -> Result<()> {
    match event {
        TurnEvent::Text(text) => {
            print!("{}", text);
            stdout.flush()?;
        }
        TurnEvent::ToolCall(call) => match extract_tool_detail(&call.name, &call.arguments) {
            Some(detail) => println!("\n[{}: {}]", call.name, detail),
            None => println!("\n[{}]", call.name),
        },
        TurnEvent::ToolResult { output, .. } => println!("  {}", describe_output(output)),
        TurnEvent::ToolRejected { name, error, .. } => {
            eprintln!("  {} rejected: {}", name, error)
        }
        TurnEvent::StepFinished(_) | TurnEvent::Finished { .. } => {}
    }
    Ok(())
}

fn describe_output(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Question(q) => format!("Question: {}", q.question),
        ToolOutput::Variant(v) => format!(
            "Variant {} ready: {} ({})",
            v.id,
            v.name,
            v.focus_area.as_str()
        ),
        ToolOutput::FeedbackProcessed(f) => match (f.action, &f.approved_variant_id) {
            (FeedbackAction::Approve, Some(id)) => format!("Variant {} approved", id),
            (FeedbackAction::Approve, None) => "Design approved".to_string(),
            _ => "Feedback processed".to_string(),
        },
        ToolOutput::BuildComplete(b) => format!(
            "Build complete: {} ({} files)",
            b.project_name,
            b.features.len()
        ),
        ToolOutput::ExportReady(e) => format!(
            "Export ready: {} ({} files)",
            e.project_name,
            e.files.len()
        ),
    }
}

fn print_question_options(question: &crate::agent::AskQuestion) {
    if let Some(options) = &question.options {
        for (i, option) in options.iter().enumerate() {
            println!("  {}. {}", i + 1, option.label);
        }
        if question.allow_freeform {
            println!("  (or answer in your own words)");
        }
        println!();
    }
}

fn handle_command(
    input: &str,
    session: &mut ProjectSession,
    store: &Store,
    config: &Config,
) -> CommandResult {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let cmd = parts[0];
    let variant_arg = parts.get(1).map(|id| id.to_uppercase());

    match cmd {
        "/quit" | "/exit" | "/q" => CommandResult::Quit,

        "/help" | "/h" | "/?" => {
            println!("\n{}\n", HELP_TEXT);
            CommandResult::Continue
        }

        "/phase" => {
            let phase = session.phase();
            println!("\n{} - {}\n", phase.label(), phase.description());
            CommandResult::Continue
        }

        "/variants" => {
            print_variants(session);
            CommandResult::Continue
        }

        "/select" => {
            let Some(id) = variant_arg else {
                return CommandResult::Error("Usage: /select <ID>".into());
            };
            if session.variants().get(&id).is_none() {
                return CommandResult::Error(format!("No variant {}", id));
            }
            session.variants_mut().select(&id);
            println!("\nSelected variant {}\n", id);
            CommandResult::Continue
        }

        "/approve" => {
            let Some(id) = variant_arg else {
                return CommandResult::Error("Usage: /approve <ID>".into());
            };
            if let Err(e) = store.approve_variant(session.project_id(), &id) {
                return CommandResult::Error(e.to_string());
            }
            session.variants_mut().approve(&id);
            println!("\nApproved variant {}\n", id);
            CommandResult::Continue
        }

        "/iterate" => {
            let Some(id) = variant_arg else {
                return CommandResult::Error("Usage: /iterate <ID>".into());
            };
            if session.variants().get(&id).is_none() {
                return CommandResult::Error(format!("No variant {}", id));
            }
            if let Err(e) = store.update_project_phase(session.project_id(), Phase::Iterate) {
                return CommandResult::Error(e.to_string());
            }
            let phase = session.begin_iteration(&id);
            println!("\nRefining variant {} ({})\n", id, phase.label());
            CommandResult::Continue
        }

        "/feedback" => {
            let Some(id) = variant_arg else {
                return CommandResult::Error("Usage: /feedback <ID> <comment>".into());
            };
            let comment = parts[2..].join(" ");
            if comment.is_empty() {
                return CommandResult::Error("Usage: /feedback <ID> <comment>".into());
            }
            if session.variants().get(&id).is_none() {
                return CommandResult::Error(format!("No variant {}", id));
            }
            let item = session.variants_mut().add_feedback(&id, &comment, None).clone();
            if let Err(e) = store.create_feedback(session.project_id(), &item) {
                session.variants_mut().remove_feedback(&item.id);
                return CommandResult::Error(e.to_string());
            }
            let count = session.variants().feedback().len();
            println!("\nNoted ({} comment(s) pending, /submit to send)\n", count);
            CommandResult::Continue
        }

        "/submit" => {
            let pending = session.variants().feedback().to_vec();
            let Some(text) = session.submit_feedback() else {
                return CommandResult::Error("No feedback to submit".into());
            };
            if let Err(e) = store.clear_feedback(session.project_id()) {
                for item in pending {
                    session.variants_mut().push_feedback(item);
                }
                return CommandResult::Error(e.to_string());
            }
            CommandResult::SendMessage(text)
        }

        "/preview" => {
            let Some(id) = variant_arg else {
                return CommandResult::Error("Usage: /preview <ID>".into());
            };
            let Some(variant) = session.variants().get(&id) else {
                return CommandResult::Error(format!("No variant {}", id));
            };
            let bundle = build_bundle(&variant.code, &config.preview);
            let dir = config
                .paths
                .export_dir
                .join(generate_slug(session.name()))
                .join(format!("preview-{}", id.to_lowercase()));
            match write_files(
                &dir,
                bundle
                    .files
                    .iter()
                    .map(|(path, file)| (path.as_str(), file.code.as_str())),
            ) {
                Ok(n) => {
                    println!(
                        "\nWrote {} preview files for variant {} to {}\n",
                        n,
                        id,
                        dir.display()
                    );
                    CommandResult::Continue
                }
                Err(e) => CommandResult::Error(e.to_string()),
            }
        }

        _ => CommandResult::Error(format!(
            "Unknown command: {}. Type /help for commands.",
            cmd
        )),
    }
}

fn print_variants(session: &ProjectSession) {
    let store = session.variants();
    if store.variants().is_empty() {
        println!("\nNo variants yet.\n");
        return;
    }

    println!();
    for variant in store.variants() {
        let selected = store.selected_variant_id() == Some(variant.id.as_str());
        let marker = match (variant.is_approved, selected) {
            (true, _) => "*",
            (false, true) => ">",
            _ => " ",
        };
        let comments = store.feedback_for(variant.id.as_str()).count();
        print!(
            " {} {} {} ({})",
            marker,
            variant.id,
            variant.name,
            variant.focus_area.as_str()
        );
        if comments > 0 {
            print!(" [{} comment(s)]", comments);
        }
        println!();
        println!("     {}", variant.description);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ProcessFeedback;

    fn feedback(action: FeedbackAction, approved: Option<&str>) -> ToolOutput {
        ToolOutput::FeedbackProcessed(ProcessFeedback {
            action,
            selected_elements: None,
            overall_direction: None,
            approved_variant_id: approved.map(|id| id.to_string()),
        })
    }

    #[test]
    fn only_approve_reports_approval() {
        assert_eq!(
            describe_output(&feedback(FeedbackAction::Approve, Some("C"))),
            "Variant C approved"
        );
        assert_eq!(
            describe_output(&feedback(FeedbackAction::Synthesize, Some("C"))),
            "Feedback processed"
        );
        assert_eq!(
            describe_output(&feedback(FeedbackAction::Iterate, Some("B"))),
            "Feedback processed"
        );
    }
}

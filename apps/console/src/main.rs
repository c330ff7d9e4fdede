mod commands;
mod prompts;

use std::path::Path;
use std::sync::Arc;

use agenthub_config::load as load_config;
use agenthub_export::{report_title, rows_from_csv, ReportKind};
use agenthub_history::{HistoryError, MessageRole};
use agenthub_runtime::{telemetry, ClientServices};
use agenthub_session::{Feature, SessionState};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::commands::{parse, Command, HELP};
use crate::prompts::{ask, stdin_lines, ConsoleConsent, ConsoleSignIn, SharedLines};

#[derive(Parser)]
#[command(name = "agenthub")]
#[command(about = "Agent Hub client (console by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive console (default)
    Console,
    /// Print the effective configuration as JSON
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => run_console().await,
        Commands::ShowConfig => show_config(),
    }
}

fn show_config() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;
    let rendered =
        serde_json::to_string_pretty(&config).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

async fn run_console() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    info!("starting interactive console");

    let config = load_config().context("failed to load configuration")?;
    let lines = stdin_lines();

    let services = ClientServices::initialise(
        &config,
        Arc::new(ConsoleSignIn::new(lines.clone())),
        Arc::new(ConsoleConsent::new(lines.clone())),
    )
    .await
    .context("failed to initialise client services")?;

    println!("Agent Hub Interactive Console");
    println!("Type commands like '/help', '/login', '/history', '/quit'");
    println!("Use Ctrl+C or '/quit' to exit");
    println!("---");

    let state = services.session.wait_until_settled().await;
    print_session(&state);

    tokio::select! {
        result = command_loop(&services, &lines) => result?,
        _ = agenthub_runtime::shutdown_signal() => {}
    }

    println!("Goodbye!");
    Ok(())
}

async fn command_loop(services: &ClientServices, lines: &SharedLines) -> anyhow::Result<()> {
    loop {
        let Some(line) = ask(lines, "> ").await? else {
            break; // EOF
        };
        if line.is_empty() {
            continue;
        }

        let command = match parse(&line) {
            Ok(command) => command,
            Err(error) => {
                println!("{error}");
                continue;
            }
        };

        if command == Command::Quit {
            break;
        }
        if let Err(error) = run_command(services, command).await {
            println!("error: {error:#}");
        }
    }
    Ok(())
}

async fn run_command(services: &ClientServices, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Help => println!("{HELP}"),
        Command::Login => {
            let role = services.session.login().await?;
            println!("Signed in as {role}");
        }
        Command::Logout => {
            services.session.logout().await;
            println!("Signed out");
        }
        Command::WhoAmI => print_session(&services.session.state()),
        Command::History => {
            services.history.refresh().await?;
            let sessions = services.history.sessions();
            if sessions.is_empty() {
                println!("No conversations found");
            } else {
                println!("Conversations:");
                for session in sessions {
                    let kind = match session.kind {
                        agenthub_history::SessionKind::Chat => "chat",
                        agenthub_history::SessionKind::Analytics => "analytics",
                    };
                    println!("  {}: {} ({kind})", session.id, session.title);
                }
            }
        }
        Command::Open(id) => match services.history.open(&id).await {
            Ok(session) => {
                println!("== {} ==", session.title);
                for message in session.messages {
                    let speaker = match message.role {
                        MessageRole::User => "you",
                        MessageRole::Bot => "bot",
                    };
                    println!("[{speaker}] {}", message.content);
                }
            }
            Err(HistoryError::NotFound(_)) => println!("No conversation {id}"),
            Err(error) => return Err(error.into()),
        },
        Command::Delete(id) => {
            services.history.delete(&id).await?;
            println!("Deleted {id}");
        }
        Command::ExportDoc { file, title } => {
            require_export(&services.session.state())?;
            let content = read_file(&file).await?;
            let title =
                title.unwrap_or_else(|| report_title(ReportKind::Report, &chrono::Local::now()));
            let link = services.export.create_document(&title, &content).await?;
            println!("Document created: {link}");
        }
        Command::ExportSheet { file, title } => {
            require_export(&services.session.state())?;
            let rows = rows_from_csv(&read_file(&file).await?);
            let title =
                title.unwrap_or_else(|| report_title(ReportKind::Data, &chrono::Local::now()));
            let link = services.export.create_spreadsheet(&title, &rows).await?;
            println!("Spreadsheet created: {link}");
        }
        Command::Quit => {}
    }
    Ok(())
}

fn require_export(state: &SessionState) -> anyhow::Result<()> {
    match state.role() {
        Some(role) if state.is_authorized() && role.permits(Feature::Analytics) => Ok(()),
        Some(role) => anyhow::bail!("role {role} cannot export analytics"),
        None => anyhow::bail!("sign in with /login before exporting"),
    }
}

async fn read_file(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn print_session(state: &SessionState) {
    match (state.identity(), state.role()) {
        (Some(identity), Some(role)) => {
            let features: Vec<&str> = [
                (Feature::Chat, "chat"),
                (Feature::Analytics, "analytics"),
                (Feature::UserAdmin, "user admin"),
                (Feature::KnowledgeAdmin, "knowledge admin"),
            ]
            .into_iter()
            .filter(|(feature, _)| role.permits(*feature))
            .map(|(_, label)| label)
            .collect();
            let name = identity.display_name.as_deref().unwrap_or(&identity.email);
            println!("{name} <{}> as {role}: {}", identity.email, features.join(", "));
        }
        (Some(identity), None) => println!("{} is waiting for a role", identity.email),
        _ => println!("Not signed in"),
    }
}

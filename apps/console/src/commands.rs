use std::path::PathBuf;

use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Login,
    Logout,
    WhoAmI,
    History,
    Open(String),
    Delete(String),
    ExportDoc { file: PathBuf, title: Option<String> },
    ExportSheet { file: PathBuf, title: Option<String> },
    Quit,
}

pub const HELP: &str = "\
Available commands:
  /help, /h                      - Show this help
  /login, /l                     - Sign in and synchronise the role
  /logout                        - Sign out locally, then at the provider and server
  /whoami, /w                    - Show identity, role and permitted features
  /history, /hi                  - Refresh and list past conversations
  /open <id>, /o <id>            - Print a past conversation
  /delete <id>, /d <id>          - Delete a past conversation
  /export-doc <file> [title]     - Export a text file as a document
  /export-sheet <file> [title]   - Export a CSV file as a spreadsheet
  /quit, /exit, /q               - Exit console";

pub fn parse(line: &str) -> Result<Command> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        bail!("empty command");
    };
    let rest: Vec<&str> = parts.collect();
    let title = || (rest.len() > 1).then(|| rest[1..].join(" "));

    let command = match name.trim_start_matches('/') {
        "help" | "h" => Command::Help,
        "login" | "l" => Command::Login,
        "logout" => Command::Logout,
        "whoami" | "w" => Command::WhoAmI,
        "history" | "hi" => Command::History,
        "open" | "o" => Command::Open(single_argument(name, &rest)?),
        "delete" | "d" => Command::Delete(single_argument(name, &rest)?),
        "export-doc" => Command::ExportDoc {
            file: file_argument(name, &rest)?,
            title: title(),
        },
        "export-sheet" => Command::ExportSheet {
            file: file_argument(name, &rest)?,
            title: title(),
        },
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command '{other}', try /help"),
    };

    Ok(command)
}

fn single_argument(name: &str, rest: &[&str]) -> Result<String> {
    match rest {
        [id] => Ok((*id).to_owned()),
        _ => bail!("usage: {name} <id>"),
    }
}

fn file_argument(name: &str, rest: &[&str]) -> Result<PathBuf> {
    match rest.first() {
        Some(file) => Ok(PathBuf::from(file)),
        None => bail!("usage: {name} <file> [title]"),
    }
}

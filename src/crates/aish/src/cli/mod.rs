//! The `aish` command-line surface
//!
//! ```text
//! aish <ci> "<message>"
//! aish forward <ci> <terminal> [--json] | aish forward list | aish unforward <ci>
//! aish terma list | whoami | inbox [new|prompt|keep] [pop|read|push ...] [--remove]
//! aish terma <terminal> "<msg>" | aish terma @<purpose> "<msg>" | aish terma broadcast "<msg>"
//! aish prompt <ci> "<msg>"
//! aish team-chat "<msg>"
//! aish sunset <ci> | aish sunrise <ci>
//! aish help [component]
//! ```
//!
//! A missing message with piped stdin reads stdin to EOF.

use crate::help;
use crate::inbox::InboxKind;
use crate::shell::{MessageShell, SendOutcome};
use crate::team_chat::ChatOutcome;
use crate::{AishError, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::Path;
use tabled::{Table, Tabled};
use tokio::io::AsyncReadExt;

/// aish - the tekton message shell
#[derive(Parser, Debug)]
#[command(name = "aish")]
#[command(version, about = "Unified CI message shell", long_about = None)]
#[command(disable_help_subcommand = true)]
pub struct AishArgs {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: AishCommand,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum AishCommand {
    /// Print documentation paths
    Help {
        /// Component to look up
        component: Option<String>,
    },
    /// Create a forward, or list them with `forward list`
    Forward {
        /// CI to forward (or the literal `list`)
        ci: String,
        /// Terminal receiving the forwarded messages
        terminal: Option<String>,
        /// Wrap forwarded messages in the JSON envelope
        #[arg(long)]
        json: bool,
    },
    /// Remove a forward
    Unforward {
        /// CI to stop forwarding
        ci: String,
    },
    /// Inter-terminal messaging
    Terma {
        #[command(subcommand)]
        action: TermaAction,
    },
    /// Send a high-priority message
    Prompt {
        /// Target CI
        ci: String,
        /// Message (stdin when omitted)
        message: Option<String>,
    },
    /// Broadcast to all greek-chorus CIs
    #[command(name = "team-chat")]
    TeamChat {
        /// Message (stdin when omitted)
        message: Option<String>,
    },
    /// Flag a CI for the sunset protocol
    Sunset {
        /// Target CI
        ci: String,
    },
    /// Wake a CI and restore its captured context
    Sunrise {
        /// Target CI
        ci: String,
    },
    /// `aish <ci> "<message>"` - route a message to a CI
    #[command(external_subcommand)]
    Send(Vec<String>),
}

/// `aish terma ...` subcommands
#[derive(Subcommand, Debug)]
pub enum TermaAction {
    /// List live terminals
    List,
    /// Show this terminal's identity
    Whoami,
    /// Inspect or mutate inboxes: `inbox [new|prompt|keep] [pop|read|push <msg>]`
    Inbox {
        /// Inbox name, operation, and operands
        args: Vec<String>,
        /// Make `read` destructive
        #[arg(long)]
        remove: bool,
    },
    /// Broadcast to every other terminal
    Broadcast {
        /// Message (stdin when omitted)
        message: Option<String>,
    },
    /// `aish terma <terminal|@purpose> "<msg>"`
    #[command(external_subcommand)]
    Send(Vec<String>),
}

/// Read the message from the argument or piped stdin
async fn message_or_stdin(message: Option<String>) -> Result<String> {
    if let Some(message) = message {
        return Ok(message);
    }
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .map_err(|e| AishError::Usage(format!("Failed to read stdin: {}", e)))?;
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Err(AishError::StdinEmpty);
    }
    Ok(trimmed.to_string())
}

#[derive(Tabled)]
struct TerminalRow {
    #[tabled(rename = "terminal")]
    name: String,
    #[tabled(rename = "purposes")]
    purposes: String,
    #[tabled(rename = "new")]
    new: usize,
    #[tabled(rename = "prompt")]
    prompt: usize,
    #[tabled(rename = "keep")]
    keep: usize,
}

#[derive(Tabled)]
struct ForwardRow {
    #[tabled(rename = "ci")]
    ci: String,
    #[tabled(rename = "terminal")]
    terminal: String,
    #[tabled(rename = "json")]
    json: bool,
}

/// Execute a parsed command against a shell; returns the rendered output
pub async fn dispatch(shell: &MessageShell, root: &Path, command: AishCommand) -> Result<String> {
    match command {
        AishCommand::Help { component } => {
            let path = match component {
                Some(component) => help::component_help(root, &component),
                None => help::shell_help(root),
            };
            Ok(path.display().to_string())
        }

        AishCommand::Forward { ci, terminal, json } => {
            if ci == "list" {
                let rows: Vec<ForwardRow> = shell
                    .forward_list()
                    .await
                    .into_iter()
                    .map(|(ci, terminal, json)| ForwardRow { ci, terminal, json })
                    .collect();
                if rows.is_empty() {
                    return Ok("no forwards".to_string());
                }
                return Ok(Table::new(rows).to_string());
            }
            let terminal =
                terminal.ok_or_else(|| AishError::Usage("forward needs <ci> <terminal>".to_string()))?;
            shell.forward(&ci, &terminal, json).await?;
            Ok(format!("{} {} -> {}", "forwarded".green(), ci, terminal))
        }

        AishCommand::Unforward { ci } => {
            shell.unforward(&ci).await?;
            Ok(format!("{} {}", "unforwarded".green(), ci))
        }

        AishCommand::Terma { action } => dispatch_terma(shell, action).await,

        AishCommand::Prompt { ci, message } => {
            let message = message_or_stdin(message).await?;
            match shell.prompt(&ci, &message).await? {
                SendOutcome::Delivered(delivery) => {
                    Ok(format!("prompt delivered to {} ({})", delivery.terminal, delivery.inbox))
                }
                SendOutcome::Response(reply) => Ok(reply.to_string()),
            }
        }

        AishCommand::TeamChat { message } => {
            let message = message_or_stdin(message).await?;
            let results = shell.team_chat(&message).await?;
            if results.is_empty() {
                return Ok("no greek-chorus CIs reachable".to_string());
            }
            let mut out = String::new();
            for result in results {
                let line = match result.outcome {
                    ChatOutcome::Replied { reply } => {
                        format!("{}: {}", result.ci.green(), reply)
                    }
                    ChatOutcome::Timeout => format!("{}: {}", result.ci.yellow(), "timeout"),
                    ChatOutcome::Failed { code, .. } => {
                        format!("{}: {} ({})", result.ci.red(), "failed", code)
                    }
                };
                out.push_str(&line);
                out.push('\n');
            }
            Ok(out.trim_end().to_string())
        }

        AishCommand::Sunset { ci } => {
            shell.sunset(&ci).await?;
            Ok(format!("{} flagged for sunset", ci))
        }

        AishCommand::Sunrise { ci } => match shell.sunrise(&ci).await? {
            Some(bundle) => {
                let mut out = format!("{} awake; context restored\n", ci);
                if !bundle.delta.is_empty() {
                    out.push_str("while you rested:\n");
                    for line in bundle.delta {
                        out.push_str(&format!("- {}\n", line));
                    }
                }
                Ok(out.trim_end().to_string())
            }
            None => Ok(format!("{} was already awake", ci)),
        },

        AishCommand::Send(tokens) => {
            let mut tokens = tokens.into_iter();
            let ci = tokens
                .next()
                .ok_or_else(|| AishError::Usage("aish <ci> \"<message>\"".to_string()))?;
            let second = tokens.next();
            // `aish <component> help` prints the doc path, never a message.
            if second.as_deref() == Some("help") {
                return Ok(help::component_help(root, &ci).display().to_string());
            }
            let message = message_or_stdin(second).await?;
            match shell.send(&ci, &message).await? {
                SendOutcome::Delivered(delivery) => {
                    let mut out = format!("delivered to {} ({})", delivery.terminal, delivery.inbox);
                    if delivery.evicted {
                        out.push_str(&format!("\n{}: inbox full, oldest message evicted", "warning".yellow()));
                    }
                    Ok(out)
                }
                SendOutcome::Response(reply) => Ok(reply.to_string()),
            }
        }
    }
}

async fn dispatch_terma(shell: &MessageShell, action: TermaAction) -> Result<String> {
    use crate::inbox::InboxMessage;

    match action {
        TermaAction::List => {
            let rows: Vec<TerminalRow> = shell
                .terminals()
                .list()
                .into_iter()
                .map(|session| TerminalRow {
                    name: session.name,
                    purposes: session.purposes.join(","),
                    new: session.inboxes.new.len(),
                    prompt: session.inboxes.prompt.len(),
                    keep: session.inboxes.keep.len(),
                })
                .collect();
            if rows.is_empty() {
                return Ok("no terminals".to_string());
            }
            Ok(Table::new(rows).to_string())
        }

        TermaAction::Whoami => Ok(shell.sender().to_string()),

        TermaAction::Inbox { args, remove } => {
            let me = shell.sender().to_string();
            let mut args = args.into_iter();
            let kind = match args.next() {
                Some(name) => InboxKind::parse(&name)
                    .ok_or_else(|| AishError::Usage(format!("Unknown inbox: {}", name)))?,
                None => {
                    // Summary across all three inboxes.
                    let session = shell
                        .terminals()
                        .get(&me)
                        .ok_or_else(|| AishError::UnknownTerminal(me.clone()))?;
                    return Ok(format!(
                        "new: {}  prompt: {}  keep: {}",
                        session.inboxes.new.len(),
                        session.inboxes.prompt.len(),
                        session.inboxes.keep.len()
                    ));
                }
            };

            match args.next().as_deref() {
                Some("pop") => match shell.terminals().pop(&me, kind)? {
                    Some(message) => Ok(serde_json::to_string(&message)?),
                    None => Ok("empty".to_string()),
                },
                Some("push") => {
                    let body = args.collect::<Vec<_>>().join(" ");
                    if body.is_empty() {
                        return Err(AishError::Usage("inbox push needs a message".to_string()));
                    }
                    shell.terminals().deliver(
                        &me,
                        InboxKind::Keep,
                        InboxMessage::new(&me, "push", serde_json::json!(body)),
                    )?;
                    Ok("kept".to_string())
                }
                Some("read") | None => {
                    let messages = shell.terminals().read(&me, kind, remove)?;
                    Ok(serde_json::to_string_pretty(&messages)?)
                }
                Some(other) => Err(AishError::Usage(format!("Unknown inbox operation: {}", other))),
            }
        }

        TermaAction::Broadcast { message } => {
            let message = message_or_stdin(message).await?;
            let deliveries = shell.terminals().broadcast(
                shell.sender(),
                InboxKind::New,
                &InboxMessage::new(shell.sender(), "broadcast", serde_json::json!(message)),
            );
            Ok(format!("broadcast to {} terminals", deliveries.len()))
        }

        TermaAction::Send(tokens) => {
            let mut tokens = tokens.into_iter();
            let target = tokens
                .next()
                .ok_or_else(|| AishError::Usage("terma <terminal|@purpose> \"<msg>\"".to_string()))?;
            let message = message_or_stdin(tokens.next()).await?;
            let body = InboxMessage::new(shell.sender(), "direct", serde_json::json!(message));

            if let Some(purpose) = target.strip_prefix('@') {
                let deliveries =
                    shell
                        .terminals()
                        .deliver_to_purpose(purpose, InboxKind::New, &body);
                if deliveries.is_empty() {
                    return Err(AishError::UnknownTerminal(format!("@{}", purpose)));
                }
                Ok(format!("delivered to {} terminals", deliveries.len()))
            } else {
                let delivery = shell.terminals().deliver(&target, InboxKind::New, body)?;
                Ok(format!("delivered to {} ({})", delivery.terminal, delivery.inbox))
            }
        }
    }
}

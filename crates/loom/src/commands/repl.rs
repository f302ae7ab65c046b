//! REPL (Read-Eval-Print Loop) implementation for interactive chat.

use std::sync::Arc;

use anyhow::Result;
use console::{Style, Term, style};
use loom_chat::{ChatError, ChatService};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

use super::render::{self, print_dim, print_error};

/// REPL state and configuration.
pub struct Repl {
    service: Arc<ChatService>,
    editor: Editor<(), DefaultHistory>,
    term: Term,
    verbose: bool,
}

/// A parsed input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Message(&'a str),
    Command { name: &'a str, args: Vec<&'a str> },
}

/// Classify one line: `/name args...` is a command, anything else a message.
pub fn parse_line(line: &str) -> Option<Input<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.strip_prefix('/') {
        Some(rest) => {
            let mut parts = rest.split_whitespace();
            let name = parts.next().unwrap_or("");
            Some(Input::Command {
                name,
                args: parts.collect(),
            })
        }
        None => Some(Input::Message(line)),
    }
}

impl Repl {
    /// Create a new REPL instance.
    pub fn new(service: Arc<ChatService>, verbose: bool) -> Result<Self> {
        let config = Config::builder()
            .history_ignore_space(true)
            .auto_add_history(true)
            .build();

        let editor = Editor::with_config(config)?;

        Ok(Self {
            service,
            editor,
            term: Term::stdout(),
            verbose,
        })
    }

    /// Run the REPL loop.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let prompt = self.format_prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => match parse_line(&line) {
                    None => continue,
                    Some(Input::Command { name, args }) => {
                        match self.handle_slash_command(name, &args).await {
                            Ok(ControlFlow::Continue) => continue,
                            Ok(ControlFlow::Exit) => break,
                            Err(e) => print_error(&format!("Command error: {}", e)),
                        }
                    }
                    Some(Input::Message(text)) => self.send_message(text).await,
                },
                Err(ReadlineError::Interrupted) => {
                    println!();
                    print_dim("(Interrupted - type /quit to exit)");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(e) => {
                    print_error(&format!("Input error: {}", e));
                    break;
                }
            }
        }

        print_dim("Goodbye!");
        Ok(())
    }

    async fn send_message(&self, text: &str) {
        print_dim("thinking...");
        match self.service.send_message(text).await {
            Ok(result) => {
                render::print_turn(&result, self.verbose);
                println!();
            }
            Err(e) => {
                print_error(&e.to_string());
                if e.is_circuit_open() {
                    print_dim("The provider is failing; try /switch to another one.");
                } else if matches!(e, ChatError::Timeout { .. }) {
                    print_dim("Your message is kept; send a follow-up to retry.");
                }
            }
        }
    }

    /// Handle a slash command.
    async fn handle_slash_command(&mut self, cmd: &str, args: &[&str]) -> Result<ControlFlow> {
        match cmd {
            "quit" | "q" | "exit" => {
                return Ok(ControlFlow::Exit);
            }
            "help" | "h" | "?" => {
                self.print_help();
            }
            "clear" | "cls" => {
                self.term.clear_screen()?;
            }
            "llm" => {
                render::print_providers(&self.service.list_providers());
            }
            "switch" if !args.is_empty() => {
                let model = args.get(1).copied();
                let active = self.service.switch_provider(args[0], model).await?;
                let green = Style::new().green();
                println!("{} Now using {}", green.apply_to("✓"), style(active).cyan());
            }
            "refresh" => {
                for (provider, result) in self.service.refresh_models().await {
                    match result {
                        Ok(count) => println!("  {} {} models", style(provider).cyan(), count),
                        Err(e) => print_error(&format!("{}: {}", provider, e)),
                    }
                }
                for (server, result) in self.service.refresh_servers().await {
                    match result {
                        Ok(count) => println!("  {} {} tools", style(server).cyan(), count),
                        Err(e) => print_error(&format!("{}: {}", server, e)),
                    }
                }
            }
            "tools" => {
                render::print_tools(&self.service.list_tools());
            }
            "resources" => {
                render::print_resources(&self.service.list_resources());
            }
            "prompts" => {
                render::print_prompts(&self.service.list_prompts());
            }
            "status" => {
                render::print_status(&self.service.get_status());
            }
            "reconnect" if !args.is_empty() => {
                self.service.reconnect_server(args[0]).await?;
                let green = Style::new().green();
                println!("{} Reconnected {}", green.apply_to("✓"), args[0]);
            }
            "" => {
                print_dim("Type /help for available commands");
            }
            _ => {
                print_error(&format!("Unknown command: /{}", cmd));
                print_dim("Type /help for available commands");
            }
        }

        Ok(ControlFlow::Continue)
    }

    pub fn print_welcome(&self, servers_connected: usize, servers_configured: usize) {
        let dim = Style::new().dim();
        println!();
        println!("{}", style("Loom Chat").bold().cyan());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!(
            "{}",
            dim.apply_to(format!(
                "Using {} · {}/{} tool servers connected",
                self.service.active_model(),
                servers_connected,
                servers_configured
            ))
        );
        println!(
            "{}",
            dim.apply_to("Use /help for commands, Ctrl+D to exit.")
        );
        println!();
    }

    fn print_help(&self) {
        let dim = Style::new().dim();
        println!();
        println!("{}", style("Available Commands").bold());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!("  {}  - List providers and models", style("/llm").cyan());
        println!(
            "  {}  - Switch provider",
            style("/switch <provider> [model]").cyan()
        );
        println!("  {}  - Refresh models and tool catalogs", style("/refresh").cyan());
        println!("  {}  - List tools", style("/tools").cyan());
        println!("  {}  - List resources", style("/resources").cyan());
        println!("  {}  - List prompts", style("/prompts").cyan());
        println!("  {}  - Show session and health", style("/status").cyan());
        println!("  {}  - Restart a tool server", style("/reconnect <server>").cyan());
        println!("  {}  - Clear the screen", style("/clear").cyan());
        println!("  {}  - Exit the REPL", style("/quit, /q").cyan());
        println!();
    }

    fn format_prompt(&self) -> String {
        format!("{} ", style("loom>").cyan().bold())
    }
}

/// Control flow for the REPL.
pub enum ControlFlow {
    Continue,
    Exit,
}

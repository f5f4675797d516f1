use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::DefaultEditor;
use tracing::{info, warn};

use super::display::{display_catalog, display_status};
use crate::error::Error;
use crate::runtime::ChatRuntime;
use crate::session::{ModelCatalog, Phase};

const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const BRIGHT_CYAN: &str = "\x1b[96m";
const RESET: &str = "\x1b[0m";

fn print_help() {
    println!("\n{CYAN}lmchat commands{RESET}");
    println!("{BRIGHT_CYAN}{}{RESET}", "=".repeat(60));
    println!("{GREEN}/help{RESET}              - Show this help message");
    println!("{GREEN}/models{RESET}            - List models in the catalog");
    println!("{GREEN}/use <number|id>{RESET}   - Load a model, replacing the current one");
    println!("{GREEN}/status{RESET}            - Show the session state");
    println!("{GREEN}/reset{RESET}             - Unload the model and forget the selection");
    println!("{GREEN}/clear{RESET}             - Clear the conversation");
    println!("{GREEN}/exit, /quit, /bye{RESET} - Exit the chat");
    println!("Anything else is sent to the loaded model.");
    println!();
}

/// Loads `model_id`, rendering progress reports as a bar.
pub async fn initialize_with_progress(
    runtime: &ChatRuntime,
    catalog: &ModelCatalog,
    model_id: &str,
) -> bool {
    let pb = ProgressBar::new(100);
    let template = "  {prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {wide_msg}";
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_prefix(catalog.display_name(model_id).to_string());
    pb.enable_steady_tick(Duration::from_millis(120));

    let _sub = {
        let pb = pb.clone();
        let observed = runtime.clone();
        runtime.subscribe(move || {
            let session = observed.session();
            if session.phase == Phase::Initializing {
                pb.set_position((session.progress * 100.0).round() as u64);
                if let Some(text) = session.progress_text {
                    pb.set_message(text);
                }
            }
        })
    };

    match runtime.initialize(model_id).await {
        Ok(()) => {
            pb.set_position(100);
            pb.finish_with_message("ready");
            println!(
                "{} {}",
                "Model loaded:".green().bold(),
                catalog.display_name(model_id).yellow()
            );
            true
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            println!("{} {}", "Error:".red().bold(), e);
            false
        }
    }
}

/// Sends `text` and prints the reply as it streams in.
async fn stream_reply(runtime: &ChatRuntime, text: &str) {
    let pending = match runtime.begin(text) {
        Ok(pending) => pending,
        Err(Error::EngineNotReady) => {
            println!("{}", "No model loaded. Use /models and /use <number> first.".yellow());
            return;
        }
        Err(e) => {
            println!("{} {}", "Error:".red().bold(), e);
            return;
        }
    };

    let message_id = pending.message_id().to_string();
    let printed = Arc::new(Mutex::new(0usize));
    print!("{} ", "[assistant]".bright_cyan().bold());
    let _ = std::io::stdout().flush();

    let _sub = {
        let observed = runtime.clone();
        let printed = Arc::clone(&printed);
        runtime.subscribe(move || {
            let messages = observed.messages();
            let Some(reply) = messages.iter().find(|m| m.id == message_id) else {
                return;
            };
            let mut printed = printed.lock().unwrap_or_else(|e| e.into_inner());
            if reply.content.len() > *printed {
                print!("{}", &reply.content[*printed..]);
                let _ = std::io::stdout().flush();
                *printed = reply.content.len();
            }
        })
    };

    let result = pending.run().await;
    println!();
    match result {
        Ok(_) => {}
        Err(Error::Interrupted { .. }) => println!("{}", "(reply interrupted)".yellow()),
        Err(e) => println!("{} {}", "Error:".red().bold(), e),
    }
}

/// Interactive chat loop against an in-process runtime.
pub async fn chat_loop(runtime: ChatRuntime, catalog: ModelCatalog) -> anyhow::Result<()> {
    println!("Starting chat session");
    print_help();

    let mut rl = DefaultEditor::new()?;

    loop {
        let prompt = if runtime.session().is_ready() { "[you] > " } else { "> " };
        let input = match rl.readline(prompt) {
            Ok(input) => input,
            Err(_) => {
                println!("Goodbye!");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(trimmed);

        let (command, argument) = match trimmed.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (trimmed, ""),
        };

        match command.to_lowercase().as_str() {
            "/exit" | "/quit" | "/bye" => {
                println!("Goodbye!");
                break;
            }
            "/help" => print_help(),
            "/models" => display_catalog(&catalog, Some(&runtime.session())),
            "/status" => display_status(&catalog, &runtime.session()),
            "/use" => {
                if argument.is_empty() {
                    println!("Usage: /use <number|id>");
                    continue;
                }
                match catalog.resolve(argument) {
                    Some(entry) => {
                        let id = entry.id.clone();
                        info!("Switching to model {}", id);
                        initialize_with_progress(&runtime, &catalog, &id).await;
                    }
                    None => println!("{} {}", "Unknown model:".red(), argument),
                }
            }
            "/reset" => {
                runtime.reset().await;
                println!("Model unloaded. Use /use <number> to load one.");
            }
            "/clear" => {
                runtime.clear();
                print!("\x1B[2J\x1B[1;1H");
                let _ = std::io::stdout().flush();
            }
            other if other.starts_with('/') => {
                warn!("Unknown command {}", other);
                println!("Unknown command {}. Type /help for the list.", other);
            }
            _ => stream_reply(&runtime, &input).await,
        }
    }
    Ok(())
}

use actionflow::config::FlowConfig;
use actionflow::plan::{Counters, PlanBuilder};
use actionflow::handlers::EventBindings;
use actionflow::{LIBRARY_NAME, VERSION as LIB_VERSION};
use anyhow::Result;
use colored::Colorize;
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    let rule = "-".repeat(72);
    println!("{}", format!("{} flowshell", LIBRARY_NAME).cyan().bold());
    println!("{}", rule.dimmed());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!(
        "{}",
        "\n    This software is provided 'as is', without warranty of any kind.\n    Distributed under the MIT OR Apache-2.0 license. Use at your own risk.\n"
            .dimmed()
    );
    println!("{}", rule.dimmed());
}

/// Everything a shell session needs to build and run plans.
struct Session {
    config: Arc<FlowConfig>,
    builder: Arc<PlanBuilder>,
}

impl Session {
    fn new(config: FlowConfig, counters: Counters, bindings: EventBindings) -> Self {
        let builder = PlanBuilder::new(counters, bindings).with_timer(config.timer());
        Self {
            config: Arc::new(config),
            builder: Arc::new(builder),
        }
    }

    /// Replaces the configuration, keeping the live counters and bindings.
    fn reload(&mut self, path: &Path) -> Result<()> {
        let config = FlowConfig::load(Some(path))?;
        let counters = self.builder.counters().clone();
        for (name, value) in &config.counters {
            counters.set(name, *value);
        }
        *self = Session::new(config, counters, self.builder.bindings().clone());
        Ok(())
    }

    /// Starts a plan on its own task and reports how it ended.
    fn start(&self, name: &str) -> Result<()> {
        let operand = self.builder.build(self.config.plan(name)?)?;
        println!("--> Started plan '{}'.", name);
        let name = name.to_string();
        let plan = tokio::spawn(async move {
            let started = Instant::now();
            actionflow::run(operand)?.await;
            Ok::<Duration, actionflow::ActionError>(started.elapsed())
        });
        tokio::spawn(async move {
            match plan.await {
                Ok(Ok(elapsed)) => println!("\n<-- [PLAN] '{}' completed in {:?}\n>> ", name, elapsed),
                Ok(Err(err)) => println!("\n<-- [PLAN] '{}' failed: {}\n>> ", name, err),
                Err(err) if err.is_panic() => {
                    println!("\n<-- [PLAN] '{}' aborted: the plan raised an error.\n>> ", name)
                }
                Err(err) => println!("\n<-- [PLAN] '{}' stopped: {}\n>> ", name, err),
            }
        });
        Ok(())
    }

    fn trigger(&self, selector: &str, event: &str) {
        let bindings = self.builder.bindings().clone();
        match catch_unwind(AssertUnwindSafe(|| bindings.trigger(selector, event, None))) {
            Ok(count) => println!("--> '{}' on '{}' reached {} handler(s).", event, selector, count),
            Err(_) => println!("--> '{}' on '{}' resumed a plan that raised an error.", event, selector),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = FlowConfig::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .with_target(config.log.with_target)
        .init();

    let counters = Counters::new(config.counters.clone());
    let mut session = Session::new(config, counters, EventBindings::new());

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandHighlighter));

    println!("{} is ready. Type 'help' for commands or 'exit' to quit.", "flowshell".cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();
                match args.as_slice() {
                    ["plans"] => {
                        println!("Plans:");
                        for name in session.config.plans.keys() {
                            println!("  {}", name);
                        }
                    }
                    ["run", name] => {
                        if let Err(err) = session.start(name) {
                            println!("Error: {}", err);
                        }
                    }
                    ["run", ..] => println!("Usage: run <PLAN>"),
                    ["trigger", selector, event] => session.trigger(selector, event),
                    ["trigger", ..] => println!("Usage: trigger <SELECTOR> <EVENT>"),
                    ["bindings"] => {
                        println!("Active Bindings:");
                        for binding in session.builder.bindings().bindings() {
                            let state = if binding.fired { "fired" } else { "waiting" };
                            println!(
                                "  {:?}: '{}' on '{}' ({})",
                                binding.id, binding.event, binding.selector, state
                            );
                        }
                    }
                    ["counters"] => {
                        println!("Counters:");
                        for (name, value) in session.builder.counters().snapshot() {
                            println!("  {} = {}", name, value);
                        }
                    }
                    ["load", path] => match session.reload(Path::new(path)) {
                        Ok(()) => println!("--> Loaded {} plan(s) from '{}'.", session.config.plans.len(), path),
                        Err(err) => println!("Error: {}", err),
                    },
                    ["load", ..] => println!("Usage: load <PATH>"),
                    ["help"] => {
                        println!("Available commands:");
                        println!("  plans                  - Lists the configured plans.");
                        println!("  run <PLAN>             - Starts a plan in the background.");
                        println!("  trigger <SEL> <EVENT>  - Raises an event for bound handlers.");
                        println!("  bindings               - Shows live event bindings.");
                        println!("  counters               - Shows plan counters.");
                        println!("  load <PATH>            - Loads plans from a config file.");
                        println!("  exit                   - Quits the shell.");
                    }
                    ["exit"] => break,
                    [] => {}
                    _ => println!("Unknown command: '{}'. Type 'help'.", line),
                }
            }
            Err(_) => {
                println!("Exiting flowshell...");
                break;
            }
        }
    }

    Ok(())
}

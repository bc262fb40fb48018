//! Interactive session over one long-lived router, so prefetched and
//! previously shown data is served from the cache.

use super::{modules, prefetch, show, ui};
use crate::core::gateway::{ProviderGateway, SYMBOL_PARAM};
use crate::core::period::RangePreset;
use crate::core::router::{COMPARE_PARAM, ModuleDescriptor, ModuleRouter, RANGE_PARAM, UserInputs};
use anyhow::Result;
use console::Term;
use tracing::{debug, info};

const PROMPT: &str = "finchart> ";

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardCommand {
    List,
    Help,
    Prefetch,
    /// Drops every cached result.
    Refresh,
    Quit,
    Show { label: String, inputs: UserInputs },
    Unknown(String),
}

pub fn help() -> String {
    let lines = [
        "<module> [SYMBOL] [RANGE] [A,B,..] [key=value ..]",
        "    show a module, by number or by part of its label",
        "    RANGE is one of 1M 3M 6M 1Y 2Y 5Y; A,B,.. replaces the comparison set",
        "list | prefetch | refresh | help | quit",
    ];
    format!(
        "{}\n{}",
        ui::style_text("Commands", ui::StyleType::Label),
        lines.join("\n")
    )
}

// A module by 1-based number, exact label, or a label fragment that
// matches exactly one module.
fn find_module<'a>(token: &str, modules: &'a [ModuleDescriptor]) -> Option<&'a ModuleDescriptor> {
    if let Ok(index) = token.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| modules.get(i));
    }
    if let Some(module) = modules.iter().find(|m| m.label == token) {
        return Some(module);
    }
    let needle = token.to_lowercase();
    let mut matches = modules
        .iter()
        .filter(|m| m.label.to_lowercase().contains(&needle));
    match (matches.next(), matches.next()) {
        (Some(module), None) => Some(module),
        _ => None,
    }
}

/// Parses one input line. Blank lines yield `None`.
pub fn parse_command(line: &str, modules: &[ModuleDescriptor]) -> Option<DashboardCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let command = match line.to_lowercase().as_str() {
        "q" | "quit" | "exit" => DashboardCommand::Quit,
        "l" | "list" => DashboardCommand::List,
        "h" | "help" | "?" => DashboardCommand::Help,
        "p" | "prefetch" => DashboardCommand::Prefetch,
        "r" | "refresh" => DashboardCommand::Refresh,
        _ => {
            if let Some(module) = modules.iter().find(|m| m.label == line) {
                return Some(DashboardCommand::Show {
                    label: module.label.clone(),
                    inputs: UserInputs::new(),
                });
            }
            let mut tokens = line.split_whitespace();
            let module = tokens.next().and_then(|token| find_module(token, modules));
            let Some(module) = module else {
                return Some(DashboardCommand::Unknown(line.to_string()));
            };

            let mut inputs = UserInputs::new();
            for token in tokens {
                let (key, value) = match token.split_once('=') {
                    Some((key, value)) => (key, value),
                    None if token.parse::<RangePreset>().is_ok() => (RANGE_PARAM, token),
                    None if token.contains(',') => (COMPARE_PARAM, token),
                    None => (SYMBOL_PARAM, token),
                };
                inputs.insert(key.to_string(), value.to_string());
            }
            DashboardCommand::Show {
                label: module.label.clone(),
                inputs,
            }
        }
    };
    Some(command)
}

/// Runs one command against the shared router and returns its output.
pub async fn handle<G: ProviderGateway>(
    router: &ModuleRouter<G>,
    command: DashboardCommand,
    options: &show::ShowOptions,
) -> String {
    match command {
        DashboardCommand::List => modules::render_modules(router.modules()),
        DashboardCommand::Help => help(),
        DashboardCommand::Prefetch => prefetch::prefetch(router).await,
        DashboardCommand::Refresh => {
            router.cache().clear().await;
            ui::style_text("Cache cleared", ui::StyleType::Subtle)
        }
        DashboardCommand::Quit => String::new(),
        DashboardCommand::Show { label, inputs } => {
            debug!(%label, ?inputs, "Dashboard show");
            match show::view(router, &label, &inputs, options).await {
                Ok(output) => output,
                Err(e) => ui::style_text(&format!("Error: {e}"), ui::StyleType::Error),
            }
        }
        DashboardCommand::Unknown(input) => ui::style_text(
            &format!("Unknown command or module: {input} (type 'help')"),
            ui::StyleType::Error,
        ),
    }
}

// `None` at end of input.
async fn read_line(term: Term) -> Result<Option<String>> {
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
        if term.is_term() {
            return term.read_line().map(Some);
        }
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    })
    .await??;
    Ok(line)
}

/// Reads commands until `quit` or end of input.
pub async fn run<G: ProviderGateway>(
    router: &ModuleRouter<G>,
    options: &show::ShowOptions,
    prefetch_first: bool,
) -> Result<()> {
    let term = Term::stdout();
    if prefetch_first {
        term.write_line(&prefetch::prefetch(router).await)?;
    }
    term.write_line(&modules::render_modules(router.modules()))?;
    term.write_line(&help())?;

    loop {
        term.write_str(PROMPT)?;
        let Some(line) = read_line(term.clone()).await? else {
            break;
        };
        let Some(command) = parse_command(&line, router.modules()) else {
            continue;
        };
        if command == DashboardCommand::Quit {
            break;
        }
        term.write_line(&handle(router, command, options).await)?;
    }

    info!(cached = router.cache().len().await, "Dashboard closed");
    Ok(())
}

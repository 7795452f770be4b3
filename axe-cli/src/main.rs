//! Axe: an interactive coding agent for the terminal.

mod config;
mod context;
mod git;
mod pricing;

use anyhow::{Context as _, Result};
use axe_client::ModelPool;
use axe_core::agent::Agent;
use axe_core::input::expand_at_files;
use axe_mcp::McpClient;
use axe_store::{HistoryStore, PermissionStore};
use axe_tools::{Registry, RegistryOpts};
use clap::Parser;
use config::Config;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

const SYSTEM_PROMPT_HEADER: &str = "You are Axe, a coding agent. You help users build software by reading, writing, and editing code files, executing commands, and searching codebases.

Rules:
- For complex tasks (multi-file changes, refactoring, new features), use the think tool FIRST to plan your approach step by step
- Be concise and direct
- Write clean, idiomatic code
- When modifying files, use edit_file for surgical changes, write_file for new files
- If a tool call fails, read the error carefully, fix the issue, and retry
- After modifying code files, check build results in the tool output and fix any errors before moving on
- Explain what you're doing briefly before doing it

Project context:
";

#[derive(Parser)]
#[command(name = "axe", version, about = "An interactive coding agent", disable_help_subcommand = true)]
struct Cli {
    /// Non-interactive mode: print only the response, auto-allow all tools
    #[arg(short, long)]
    print: bool,

    /// Resume the most recent conversation for this project
    #[arg(long)]
    resume: bool,

    /// List recent conversations and exit
    #[arg(long)]
    list: bool,

    /// Prompt (omit for interactive mode); `init` writes a starter config
    prompt: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run()) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if cli.prompt.first().map(String::as_str) == Some("init") {
        let path = Config::init()?;
        println!("Config created at {}", path.display());
        println!("Edit it to add your API key.");
        return Ok(());
    }

    let project_dir = std::env::current_dir().context("current dir")?;
    let history = HistoryStore::for_project(&project_dir.to_string_lossy());

    if cli.list {
        println!("Recent conversations:");
        for line in history.list_recent(10).await? {
            println!("{line}");
        }
        return Ok(());
    }

    let config = Config::load(&project_dir)?;
    let perms = Arc::new(Mutex::new(PermissionStore::load_default()));

    let opts = if cli.print {
        RegistryOpts {
            confirm: Some(Arc::new(|_: &str| true)),
            confirm_overwrite: Some(Arc::new(|_: &str, _, _| true)),
            confirm_edit: Some(Arc::new(|_: &str, _: &str, _: &str| true)),
        }
    } else {
        interactive_opts(Arc::clone(&perms))
    };
    let mut registry = Registry::new(opts);

    // External tool servers register their tools like built-ins.
    let mut servers: Vec<Arc<McpClient>> = Vec::new();
    for (name, server) in &config.mcp_servers {
        match McpClient::spawn(&server.command, &server.args).await {
            Ok(client) => {
                let client = Arc::new(client);
                match client.tools().await {
                    Ok(tools) => {
                        for tool in tools {
                            registry.register(Arc::new(tool));
                        }
                        servers.push(client);
                    }
                    Err(e) => tracing::warn!("tool server {name}: {e}"),
                }
            }
            Err(e) => tracing::warn!("tool server {name} failed: {e}"),
        }
    }

    if config.auto_verify {
        registry.set_post_exec_hook(Arc::new(verify_hook));
    }

    let registry = Arc::new(registry);
    let pool = Arc::new(ModelPool::new(
        &config.provider_configs(),
        registry.definitions(),
    ));

    let system = format!(
        "{SYSTEM_PROMPT_HEADER}{}",
        context::collect(&project_dir)
    );
    let mut agent = Agent::new(pool.clone(), registry.clone(), system);

    let mut save_path: PathBuf;
    if cli.resume {
        let (path, messages) = history.load_latest().await?;
        println!("Resumed previous conversation ({} messages)", messages.len());
        agent.set_messages(messages);
        save_path = path;
    } else {
        save_path = history.new_file_path().await?;
    }

    if cli.print {
        agent.on_text_delta(|text| {
            print!("{text}");
            let _ = std::io::stdout().flush();
        });
    } else {
        agent.on_text_delta(|text| {
            print!("{text}");
            let _ = std::io::stdout().flush();
        });
        agent.on_block_done(|| println!());
        agent.on_tool(|name, input| println!("\n> {name} {input}"));
        let usage_pool = Arc::clone(&pool);
        agent.on_usage(move |round_in, round_out, total_in, total_out| {
            let model = usage_pool.model_name();
            let round_cost = pricing::cost(&model, round_in, round_out);
            let total_cost = pricing::cost(&model, total_in, total_out);
            if total_cost > 0.0 {
                println!(
                    "round: {} in / {} out (${round_cost:.4}) | total: {} in / {} out (${total_cost:.4})",
                    fmt_tokens(round_in), fmt_tokens(round_out),
                    fmt_tokens(total_in), fmt_tokens(total_out),
                );
            } else {
                println!(
                    "round: {} in / {} out | total: {} in / {} out",
                    fmt_tokens(round_in), fmt_tokens(round_out),
                    fmt_tokens(total_in), fmt_tokens(total_out),
                );
            }
        });
        agent.on_compact(|before, after| {
            println!("context compacted: ~{}k -> ~{}k tokens", before / 1000, after / 1000);
        });
    }

    let finish_turn = |agent: &Agent, prompt: &str| {
        let messages = agent.messages().to_vec();
        let dir = project_dir.clone();
        let prompt = prompt.to_string();
        let auto_commit = config.auto_commit;
        async move {
            if auto_commit && git::is_repo(&dir).await && git::has_changes(&dir).await {
                if let Some(hash) = git::auto_commit(&dir, &prompt).await {
                    println!("auto-commit: {hash}");
                }
            }
            messages
        }
    };

    // Single-shot mode.
    if !cli.prompt.is_empty() {
        let prompt = expand_at_files(&cli.prompt.join(" "));
        let outcome = agent.run(&prompt).await;
        let messages = finish_turn(&agent, &prompt).await;
        if !messages.is_empty() {
            history.save_to(&save_path, &messages).await?;
        }
        shutdown_servers(&servers).await;
        outcome?;
        return Ok(());
    }

    // Interactive mode.
    println!("Axe v{} - coding agent", env!("CARGO_PKG_VERSION"));
    println!("    Type your request. /help for commands.");
    println!();

    loop {
        let Some(input) = read_line("> ") else {
            // EOF: save and leave like /exit.
            let messages = agent.messages().to_vec();
            if !messages.is_empty() {
                history.save_to(&save_path, &messages).await?;
            }
            shutdown_servers(&servers).await;
            return Ok(());
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            if command == "exit" || command == "quit" {
                let messages = agent.messages().to_vec();
                if !messages.is_empty() {
                    history.save_to(&save_path, &messages).await?;
                }
                shutdown_servers(&servers).await;
                println!("bye");
                return Ok(());
            }
            handle_slash_command(command, &mut agent, &pool, &history, &mut save_path).await;
            continue;
        }

        let prompt = expand_at_files(input);
        if let Err(e) = agent.run(&prompt).await {
            eprintln!("error: {e}");
        }
        let messages = finish_turn(&agent, &prompt).await;
        if !messages.is_empty() {
            if let Err(e) = history.save_to(&save_path, &messages).await {
                eprintln!("save history: {e}");
            }
        }
        println!();
    }
}

fn interactive_opts(perms: Arc<Mutex<PermissionStore>>) -> RegistryOpts {
    let confirm_perms = Arc::clone(&perms);
    let overwrite_perms = Arc::clone(&perms);
    let edit_perms = perms;

    RegistryOpts {
        confirm: Some(Arc::new(move |cmd: &str| {
            if let Some(allowed) = check_rule(&confirm_perms, "execute_command", cmd) {
                if allowed {
                    println!("\nexecute: {cmd} (auto-allowed)");
                }
                return allowed;
            }
            println!("\nexecute: {cmd}");
            match read_line("Allow? [y/N/A(lways)] ").unwrap_or_default().to_lowercase().as_str() {
                "a" | "always" => {
                    let prefix = cmd.split_whitespace().next().unwrap_or(cmd).to_string();
                    remember_allow(&confirm_perms, "execute_command", &prefix);
                    println!("  remembered: always allow {prefix} commands");
                    true
                }
                "y" => true,
                _ => false,
            }
        })),
        confirm_overwrite: Some(Arc::new(move |path: &str, old_lines, new_lines| {
            if let Some(allowed) = check_rule(&overwrite_perms, "write_file", path) {
                if allowed {
                    println!("\noverwrite {path} ({old_lines} -> {new_lines} lines) (auto-allowed)");
                }
                return allowed;
            }
            println!("\noverwrite {path} ({old_lines} -> {new_lines} lines)");
            match read_line("Allow? [y/N/A(lways)] ").unwrap_or_default().to_lowercase().as_str() {
                "a" | "always" => {
                    remember_allow(&overwrite_perms, "write_file", "*");
                    println!("  remembered: always allow file writes");
                    true
                }
                "y" => true,
                _ => false,
            }
        })),
        confirm_edit: Some(Arc::new(move |path: &str, _old: &str, _new: &str| {
            if let Some(allowed) = check_rule(&edit_perms, "edit_file", path) {
                if allowed {
                    println!("\nedit {path} (auto-allowed)");
                }
                return allowed;
            }
            println!("\nedit {path}");
            match read_line("Allow? [y/N/A(lways)] ").unwrap_or_default().to_lowercase().as_str() {
                "a" | "always" => {
                    remember_allow(&edit_perms, "edit_file", "*");
                    println!("  remembered: always allow file edits");
                    true
                }
                "y" => true,
                _ => false,
            }
        })),
    }
}

fn check_rule(perms: &Arc<Mutex<PermissionStore>>, tool: &str, value: &str) -> Option<bool> {
    let store = perms.lock().ok()?;
    match store.check(tool, value) {
        (allowed, true) => Some(allowed),
        (_, false) => None,
    }
}

fn remember_allow(perms: &Arc<Mutex<PermissionStore>>, tool: &str, pattern: &str) {
    if let Ok(mut store) = perms.lock() {
        if let Err(e) = store.add_allow(tool, pattern) {
            eprintln!("save permissions: {e}");
        }
    }
}

async fn handle_slash_command(
    command: &str,
    agent: &mut Agent,
    pool: &Arc<ModelPool>,
    history: &HistoryStore,
    save_path: &mut PathBuf,
) {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let rest: Vec<&str> = parts.collect();

    match name {
        "clear" => {
            agent.reset();
            println!("context cleared, starting fresh");
        }
        "model" => match rest.first() {
            Some(wanted) => {
                if pool.switch_model(wanted) {
                    println!("switched model to {wanted}");
                } else {
                    println!("model not found: {wanted}");
                    println!("available: {}", pool.list_models().join(", "));
                }
            }
            None => {
                println!("current model: {}", pool.model_name());
                println!("available: {}", pool.list_models().join(", "));
            }
        },
        "list" => match history.list_recent(10).await {
            Ok(lines) => {
                println!("Recent conversations:");
                for line in lines {
                    println!("{line}");
                }
                println!("  use /resume <n> to restore one");
            }
            Err(e) => eprintln!("error: {e}"),
        },
        "resume" => {
            let index = rest.first().and_then(|s| s.parse::<usize>().ok());
            let loaded = match index {
                Some(i) => history.load_by_index(i).await,
                None => history.load_latest().await,
            };
            match loaded {
                Ok((path, messages)) => {
                    println!("resumed conversation ({} messages)", messages.len());
                    agent.set_messages(messages);
                    *save_path = path;
                }
                Err(e) => eprintln!("error: {e}"),
            }
        }
        "compact" => {
            let hint = (!rest.is_empty()).then(|| rest.join(" "));
            match agent.compact(hint.as_deref()).await {
                Ok(()) => println!("conversation context compacted"),
                Err(e) => eprintln!("error: {e}"),
            }
        }
        "cost" => {
            let (total_in, total_out) = agent.total_usage();
            let cost = pricing::cost(&pool.model_name(), total_in, total_out);
            println!(
                "total: {} in / {} out | ${cost:.4}",
                fmt_tokens(total_in),
                fmt_tokens(total_out)
            );
        }
        "budget" => match rest.first() {
            Some(&"off") => {
                agent.clear_budget();
                println!("budget limit removed");
            }
            Some(value) => match value.parse::<f64>() {
                Ok(limit) if limit > 0.0 => {
                    let pool = Arc::clone(pool);
                    agent.set_budget(limit, move |input, output| {
                        pricing::cost(&pool.model_name(), input, output)
                    });
                    println!("budget set to ${limit:.2}");
                }
                _ => println!("usage: /budget <usd amount> or /budget off"),
            },
            None => println!("usage: /budget <usd amount> or /budget off"),
        },
        "fork" => {
            if agent.messages().is_empty() {
                println!("nothing to fork yet");
            } else {
                match history.new_file_path().await {
                    Ok(path) => match history.save_to(&path, agent.messages()).await {
                        Ok(()) => {
                            *save_path = path.clone();
                            println!(
                                "conversation forked to {}",
                                path.file_name().unwrap_or_default().to_string_lossy()
                            );
                        }
                        Err(e) => eprintln!("error: {e}"),
                    },
                    Err(e) => eprintln!("error: {e}"),
                }
            }
        }
        "undo" => {
            let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if !git::is_repo(&dir).await {
                println!("not a git repository");
            } else if !git::has_commits(&dir).await {
                println!("no commits to undo");
            } else {
                match git::undo(&dir).await {
                    Some(subject) => println!("undid: {subject}"),
                    None => eprintln!("error: git undo failed"),
                }
            }
        }
        "search" => {
            if rest.is_empty() {
                println!("usage: /search <keyword>");
            } else {
                let keyword = rest.join(" ");
                match history.search(&keyword, 10).await {
                    Ok(results) if results.is_empty() => {
                        println!("no conversations mention \"{keyword}\"");
                    }
                    Ok(results) => {
                        println!("results for \"{keyword}\":");
                        for line in results {
                            println!("{line}");
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
        }
        "help" => {
            println!("Commands:");
            println!("  /clear           clear conversation context");
            println!("  /compact [hint]  compress conversation context");
            println!("  /fork            branch the current conversation");
            println!("  /list            show recent conversations");
            println!("  /resume [n]      restore a conversation");
            println!("  /model [name]    show or switch models");
            println!("  /search <kw>     search conversation history");
            println!("  /undo            undo the last git commit");
            println!("  /budget <$|off>  set or clear a cost ceiling");
            println!("  /cost            show cumulative usage and cost");
            println!("  /exit            quit");
            println!("  Tip: reference images by path, files with @path");
        }
        other => println!("unknown command: /{other} (see /help)"),
    }
}

/// Post-exec build check: after a Rust file is written or edited, run
/// `cargo check` from the owning package root and report the outcome.
fn verify_hook(name: &str, input: &serde_json::Value, _result: &str) -> String {
    if name != "write_file" && name != "edit_file" {
        return String::new();
    }
    let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
        return String::new();
    };
    if !path.ends_with(".rs") {
        return String::new();
    }
    let Some(root) = find_package_root(Path::new(path)) else {
        return String::new();
    };
    match std::process::Command::new("cargo")
        .args(["check", "-q"])
        .current_dir(&root)
        .output()
    {
        Ok(output) if output.status.success() => "[auto-verify] cargo check OK".to_string(),
        Ok(output) => format!(
            "[auto-verify] cargo check FAILED:\n{}",
            String::from_utf8_lossy(&output.stderr)
        ),
        Err(_) => String::new(),
    }
}

fn find_package_root(path: &Path) -> Option<PathBuf> {
    let mut dir = path.parent()?;
    loop {
        if dir.join("Cargo.toml").exists() {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

/// Prompt and read one line; `None` on EOF.
fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

async fn shutdown_servers(servers: &[Arc<McpClient>]) {
    for server in servers {
        server.close().await;
    }
}

fn fmt_tokens(n: u64) -> String {
    if n >= 1000 {
        format!("{:.1}k", n as f64 / 1000.0)
    } else {
        n.to_string()
    }
}

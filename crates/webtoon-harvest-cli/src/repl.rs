//! Interactive session for webtoon-harvest.
//!
//! Launch with `webtoon-harvest repl` (or no subcommand). Type `/help` for
//! available commands, Tab for completion.
//!
//! The session owns the uploads root: every session folder is deleted when it
//! starts and again when it ends, whether by `/exit`, EOF, Ctrl+C during a
//! running command, or an error unwinding out of the loop.

use std::future::Future;
use std::path::{Path, PathBuf};

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use tokio::runtime::Runtime;

use webtoon_harvest::{HarvestConfig, HarvestError, Harvester, SessionManager, StrategyKind};

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/extract", "Extract page images: /extract <url> [markup|structural]"),
    ("/latest", "Show the latest session folder"),
    ("/sessions", "List session folders and totals"),
    ("/prune", "Delete all session folders but the latest"),
    ("/pack", "Write a bundle: /pack [file.zip]"),
    ("/unpack", "Restore a bundle: /unpack <file.zip>"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit and clear session folders"),
];

const DEFAULT_BUNDLE: &str = "project_backup.zip";

const STRATEGIES: &[&str] = &["markup", "structural"];

/// Completion candidates for the text left of the cursor, with the byte
/// offset they replace from. Bundle names are looked up in `cwd`.
fn completions(input: &str, cwd: &Path) -> (usize, Vec<Pair>) {
    let Some((cmd, rest)) = input.split_once(' ') else {
        let pairs = COMMANDS
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(input))
            .map(|(cmd, desc)| Pair {
                display: format!("{cmd:<16} {desc}"),
                replacement: format!("{cmd} "),
            })
            .collect();
        return (0, pairs);
    };

    let word_start = input.rfind(' ').map_or(0, |i| i + 1);
    let partial = &input[word_start..];
    let words: Vec<String> = match cmd {
        "/pack" | "/unpack" if !rest.contains(' ') => bundles_in(cwd),
        "/extract" if rest.split(' ').count() == 2 => {
            STRATEGIES.iter().map(|s| s.to_string()).collect()
        }
        _ => Vec::new(),
    };
    let pairs = words
        .into_iter()
        .filter(|w| w.starts_with(partial))
        .map(|w| Pair {
            display: w.clone(),
            replacement: w,
        })
        .collect();
    (word_start, pairs)
}

fn bundles_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|e| e == "zip"))
        .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// Tab completion over commands, bundle files and strategy names.
struct HarvestHelper;

impl Completer for HarvestHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        Ok(completions(&line[..pos], Path::new(".")))
    }
}

impl Hinter for HarvestHelper {
    type Hint = String;
}
impl Highlighter for HarvestHelper {}
impl Validator for HarvestHelper {}
impl Helper for HarvestHelper {}

/// Clears every session folder when dropped.
struct UploadsLifecycle {
    sessions: SessionManager,
}

impl UploadsLifecycle {
    fn start(sessions: SessionManager) -> Self {
        match sessions.cleanup_all() {
            Ok(report) if report.deleted_folders > 0 => tracing::info!(
                "Startup cleanup removed {} stale session folders",
                report.deleted_folders
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!("Startup cleanup failed: {e}"),
        }
        Self { sessions }
    }
}

impl Drop for UploadsLifecycle {
    fn drop(&mut self) {
        match self.sessions.cleanup_all() {
            Ok(report) => tracing::info!(
                "Shutdown cleanup removed {} session folders ({} files)",
                report.deleted_folders,
                report.deleted_files
            ),
            Err(e) => tracing::warn!("Shutdown cleanup failed: {e}"),
        }
    }
}

/// What the loop should do after a command.
enum Flow {
    Continue,
    Shutdown,
}

/// Run the interactive REPL.
pub fn run(config: HarvestConfig, runtime: &Runtime) -> anyhow::Result<()> {
    let harvester = Harvester::new(config)?;
    let _lifecycle = UploadsLifecycle::start(harvester.sessions().clone());

    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mwebtoon-harvest v{}\x1b[0m \x1b[90m\u{2014} page extraction and project bundles\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<HarvestHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(rl_config)?;
    rl.set_helper(Some(HarvestHelper));

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = PathBuf::from(&home).join(".webtoon_harvest_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mharvest>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
                let args = args.trim();

                let flow = match cmd {
                    "exit" | "quit" => Flow::Shutdown,
                    "help" | "h" | "?" => {
                        cmd_help();
                        Flow::Continue
                    }
                    "clear" | "cls" => {
                        eprint!("\x1b[2J\x1b[H");
                        Flow::Continue
                    }
                    "extract" => cmd_extract(args, &harvester, runtime),
                    "latest" => {
                        cmd_latest(harvester.sessions());
                        Flow::Continue
                    }
                    "sessions" => {
                        cmd_sessions(harvester.sessions());
                        Flow::Continue
                    }
                    "prune" => {
                        cmd_prune(harvester.sessions());
                        Flow::Continue
                    }
                    "pack" => {
                        cmd_pack(args, &harvester);
                        Flow::Continue
                    }
                    "unpack" => {
                        cmd_unpack(args, &harvester);
                        Flow::Continue
                    }
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                        Flow::Continue
                    }
                };

                if let Flow::Shutdown = flow {
                    eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = std::fs::create_dir_all(hist_path.parent().unwrap_or(std::path::Path::new(".")));
    let _ = rl.save_history(&hist_path);

    Ok(())
}

/// Drive a future to completion unless Ctrl+C arrives first.
fn run_interruptible<F: Future>(runtime: &Runtime, fut: F) -> Option<F::Output> {
    runtime.block_on(async {
        tokio::select! {
            out = fut => Some(out),
            _ = tokio::signal::ctrl_c() => None,
        }
    })
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completion works for commands, strategies and .zip files.");
    eprintln!();
}

fn cmd_extract(args: &str, harvester: &Harvester, runtime: &Runtime) -> Flow {
    let mut parts = args.split_whitespace();
    let Some(url) = parts.next() else {
        eprintln!("  Usage: /extract <url> [markup|structural]");
        return Flow::Continue;
    };
    let kind = match parts.next().map(str::parse::<StrategyKind>).transpose() {
        Ok(kind) => kind.unwrap_or_default(),
        Err(e) => {
            eprintln!("  {e}");
            return Flow::Continue;
        }
    };

    match run_interruptible(runtime, harvester.extract(url, kind)) {
        None => {
            eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Extraction interrupted, shutting down.");
            Flow::Shutdown
        }
        Some(Ok(outcome)) => {
            eprintln!();
            eprintln!("  Session: {}", outcome.session.folder_path.display());
            for asset in &outcome.assets {
                eprintln!("    {:>3}  {}", asset.ordinal, asset.public_ref);
            }
            if !outcome.failures.is_empty() {
                eprintln!("  Skipped {}:", outcome.failures.len());
                for f in &outcome.failures {
                    eprintln!("    {:>3}  {:?}  {}  ({})", f.ordinal, f.kind, f.url, f.reason);
                }
            }
            eprintln!();
            Flow::Continue
        }
        Some(Err(e)) => {
            print_error(&e);
            Flow::Continue
        }
    }
}

fn cmd_latest(sessions: &SessionManager) {
    match sessions.latest_session() {
        Ok(Some(s)) => eprintln!(
            "  Latest: {} (created {})",
            s.folder_path.display(),
            s.created_at.format("%Y-%m-%d %H:%M:%S")
        ),
        Ok(None) => eprintln!("  No session folders."),
        Err(e) => print_error(&e),
    }
}

fn cmd_sessions(sessions: &SessionManager) {
    let listed = sessions.list_sessions().and_then(|l| Ok((l, sessions.counts()?)));
    match listed {
        Ok((list, counts)) => {
            eprintln!();
            for s in &list {
                eprintln!("    {}", s.folder_path.display());
            }
            eprintln!("  {} folders, {} files", counts.folders, counts.files);
            eprintln!();
        }
        Err(e) => print_error(&e),
    }
}

fn cmd_prune(sessions: &SessionManager) {
    match sessions.cleanup_keep_latest() {
        Ok(report) => eprintln!(
            "  Deleted {} folders / {} files ({} folders remain)",
            report.deleted_folders, report.deleted_files, report.after.folders
        ),
        Err(e) => print_error(&e),
    }
}

fn cmd_pack(args: &str, harvester: &Harvester) {
    let output = args.split_whitespace().next().unwrap_or(DEFAULT_BUNDLE);
    let packed = harvester
        .archiver()
        .pack_current(&harvester.project_store());
    match packed {
        Ok(bytes) => match std::fs::write(output, &bytes) {
            Ok(()) => eprintln!("  Wrote {output} ({} bytes)", bytes.len()),
            Err(e) => eprintln!("  Failed to write {output}: {e}"),
        },
        Err(e) => print_error(&e),
    }
}

fn cmd_unpack(args: &str, harvester: &Harvester) {
    let Some(path) = args.split_whitespace().next() else {
        eprintln!("  Usage: /unpack <file.zip>");
        return;
    };
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("  Failed to read {path}: {e}");
            return;
        }
    };
    match harvester
        .archiver()
        .unpack(&bytes, &harvester.project_store())
    {
        Ok(report) => {
            eprintln!(
                "  Restored project ({} blocks, {} glossary entries)",
                report.project_state.blocks.len(),
                report.project_state.glossary.len()
            );
            if let Some(session) = &report.session {
                eprintln!(
                    "  {} images into {}",
                    report.assets.len(),
                    session.folder_path.display()
                );
            }
            for failure in &report.failures {
                eprintln!("    failed: {failure}");
            }
        }
        Err(e) => print_error(&e),
    }
}

fn print_error(err: &HarvestError) {
    eprintln!("  Error: {err}");
    for line in err.diagnostics() {
        eprintln!("    {line}");
    }
}

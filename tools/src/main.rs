use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use glob::Pattern;
use netobj_tools::{format_inspect_pretty, format_replay_pretty, inspect_message, replay_capture};

#[derive(Parser)]
#[command(
    name = "netobj-tools",
    version,
    about = "netobj capture inspection and decoding tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect message structure and sizes.
    Inspect {
        /// Path to a message file or a directory of them.
        message_path: PathBuf,
        /// Optional glob filter when inspecting a directory.
        #[arg(long)]
        glob: Option<String>,
        /// Sort inspected messages.
        #[arg(long, value_enum)]
        sort: Option<InspectSort>,
        /// Limit the number of inspected messages (after sorting).
        #[arg(long)]
        limit: Option<usize>,
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
    /// Replay a capture directory and decode every frame.
    Decode {
        /// Directory holding frame files.
        capture_dir: PathBuf,
        /// Registry message; defaults to `registry.bin` next to the frames.
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Glob selecting frame files.
        #[arg(long, default_value = "frame-*.bin")]
        glob: String,
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InspectSort {
    Size,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let limits = wire::Limits::default();
    match cli.command {
        Command::Inspect {
            message_path,
            glob,
            sort,
            limit,
            format,
        } => {
            let entries = if message_path.is_dir() {
                let entries = collect_entries(&message_path, glob.as_deref())?;
                let mut entries = sort_entries(entries, sort);
                if let Some(limit) = limit.or(sort.map(|InspectSort::Size| 10)) {
                    entries.truncate(limit);
                }
                entries
            } else {
                let size = fs::metadata(&message_path)
                    .with_context(|| format!("stat {}", message_path.display()))?
                    .len();
                vec![MessageEntry {
                    path: message_path,
                    size,
                }]
            };
            for entry in entries {
                let bytes = fs::read(&entry.path)
                    .with_context(|| format!("read message {}", entry.path.display()))?;
                let report = inspect_message(&bytes, &limits)
                    .with_context(|| format!("inspect {}", entry.path.display()))?;
                match format {
                    OutputFormat::Json => {
                        let json = serde_json::to_string(&report).context("serialize json")?;
                        println!("{json}");
                    }
                    OutputFormat::Pretty => {
                        println!("== {} ({} bytes) ==", entry.path.display(), entry.size);
                        print!("{}", format_inspect_pretty(&report));
                    }
                }
            }
        }
        Command::Decode {
            capture_dir,
            registry,
            glob,
            format,
        } => {
            let registry_path = registry.unwrap_or_else(|| capture_dir.join("registry.bin"));
            let registry = fs::read(&registry_path)
                .with_context(|| format!("read registry {}", registry_path.display()))?;
            let mut entries = collect_entries(&capture_dir, Some(&glob))?;
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            let frames = entries
                .into_iter()
                .map(|entry| {
                    let bytes = fs::read(&entry.path)
                        .with_context(|| format!("read frame {}", entry.path.display()))?;
                    Ok((file_name(&entry.path), bytes))
                })
                .collect::<Result<Vec<_>>>()?;
            log::info!("replaying {} frames from {}", frames.len(), capture_dir.display());

            let report = replay_capture(&registry, &frames, &limits).context("replay capture")?;
            match format {
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&report).context("serialize json")?;
                    println!("{json}");
                }
                OutputFormat::Pretty => print!("{}", format_replay_pretty(&report)),
            }
        }
    }
    Ok(())
}

struct MessageEntry {
    path: PathBuf,
    size: u64,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or_else(|| path.display().to_string(), str::to_string)
}

fn collect_entries(dir: &Path, glob: Option<&str>) -> Result<Vec<MessageEntry>> {
    let mut entries = Vec::new();
    let pattern = match glob {
        Some(value) => Some(Pattern::new(value).context("invalid glob pattern")?),
        None => None,
    };

    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(pattern) = &pattern {
            let matches_path = pattern.matches_path(&path);
            let matches_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| pattern.matches(name));
            if !matches_path && !matches_name {
                continue;
            }
        }
        let size = entry.metadata()?.len();
        entries.push(MessageEntry { path, size });
    }
    Ok(entries)
}

fn sort_entries(mut entries: Vec<MessageEntry>, sort: Option<InspectSort>) -> Vec<MessageEntry> {
    match sort {
        Some(InspectSort::Size) => {
            entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
        }
        None => entries.sort_by(|a, b| a.path.cmp(&b.path)),
    }
    entries
}

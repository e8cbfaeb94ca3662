use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use sigpatch::byte_io::{hex_dump, parse_hex_byte, read_bytes};
use sigpatch::domain::DEFAULT_ORIGINAL_DOMAIN;
use sigpatch::progress::LogListener;
use sigpatch::search::DEFAULT_CONTEXT;
use sigpatch::{
    apply_patch, discover_backups, patch_client, patch_server, profile, restore_original_game,
    search, search_all, DomainPatcher, PatchResult, PatternSpec, Platform, SearchConfig,
};

#[derive(Parser)]
#[command(name = "sigpatch", about = "Signature search and in-place binary patcher")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a file for a hex pattern ("48 8B ?? 05")
    Search {
        #[arg(long, short)]
        file: PathBuf,
        #[arg(long, short)]
        pattern: String,
        /// Report every match instead of the first
        #[arg(long)]
        all: bool,
        #[arg(long, value_parser = parse_offset, default_value = "0")]
        start: u64,
        /// Maximum number of bytes to scan
        #[arg(long, value_parser = parse_offset)]
        max: Option<u64>,
        /// Bytes of context captured on each side of a match
        #[arg(long, default_value_t = DEFAULT_CONTEXT)]
        context: usize,
    },
    /// Apply the signature patch for a platform
    Patch {
        #[arg(long, short)]
        file: PathBuf,
        /// Defaults to the platform this binary was built for
        #[arg(long, value_enum)]
        platform: Option<Platform>,
        /// JSON file replacing the built-in signature profiles
        #[arg(long)]
        profiles: Option<PathBuf>,
    },
    /// Replace the domain in a client binary and/or a server archive
    Domain {
        #[arg(long)]
        client: Option<PathBuf>,
        #[arg(long)]
        server: Option<PathBuf>,
        /// Replacement domain (same length or shorter)
        #[arg(long)]
        to: String,
        #[arg(long, default_value = DEFAULT_ORIGINAL_DOMAIN)]
        from: String,
    },
    /// Restore client and server from their .original backups
    Restore {
        #[arg(long)]
        client: PathBuf,
        #[arg(long)]
        server: PathBuf,
    },
    /// List backup artifacts under a directory
    Backups {
        #[arg(long, short)]
        dir: PathBuf,
    },
    /// Hex dump a byte range
    Hexdump {
        #[arg(long, short)]
        file: PathBuf,
        #[arg(long, value_parser = parse_offset)]
        offset: u64,
        #[arg(long, default_value_t = 256)]
        length: usize,
    },
    /// Replace every occurrence of one byte value with another
    ReplaceByte {
        #[arg(long, short)]
        file: PathBuf,
        #[arg(long, value_parser = parse_byte)]
        old: u8,
        #[arg(long, value_parser = parse_byte)]
        new: u8,
    },
}

/// `0x`-prefixed hex or plain decimal.
fn parse_offset(s: &str) -> Result<u64, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("Invalid offset '{}': {}", s, e))
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let hex = s.trim_start_matches("0x").trim_start_matches("0X");
    parse_hex_byte(hex).map_err(|e| e.to_string())
}

fn print_result(label: &str, path: &Path, result: &PatchResult) {
    let status = if result.success { "OK" } else { "FAILED" };
    println!("{} [{}] {}", label, status, path.display());
    println!("  {}", result.message);
    if result.occurrences > 0 {
        println!("  Occurrences: {}", result.occurrences);
    }
    if let Some(backup) = &result.backup_path {
        println!("  Backup: {}", backup.display());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let start = Instant::now();

    match cli.command {
        Commands::Search {
            file,
            pattern,
            all,
            start: offset,
            max,
            context,
        } => {
            let pattern = PatternSpec::from_hex(&pattern).context("Failed to parse pattern")?;
            let mut config = SearchConfig::default()
                .with_start_offset(offset)
                .with_context(context, context);
            if let Some(max) = max {
                config = config.with_max_search_size(max);
            }

            let matches = tokio::task::spawn_blocking(move || {
                if all {
                    search_all(&file, &pattern, &config)
                } else {
                    search(&file, &pattern, &config).map(|m| m.into_iter().collect())
                }
            })
            .await??;

            if matches.is_empty() {
                println!("No matches.");
            }
            for m in &matches {
                println!("Match at 0x{:X}", m.offset);
                print!("{}", hex_dump(&m.context, m.context_offset()));
            }
            println!("\n{} match(es)", matches.len());
        }
        Commands::Patch {
            file,
            platform,
            profiles,
        } => {
            let profiles = match profiles {
                Some(path) => profile::load_profiles(&path)
                    .with_context(|| format!("Failed to load profiles: {}", path.display()))?,
                None => profile::builtin_profiles()?,
            };
            let platform = platform.unwrap_or_else(Platform::current);
            let Some(selected) = profile::profile_for(&profiles, platform).cloned() else {
                bail!("No signature profile for platform {}", platform);
            };

            println!("Patching {} ({}, profile '{}')...", file.display(), platform, selected.name);
            let path = file.clone();
            let result = tokio::task::spawn_blocking(move || {
                apply_patch(&path, &selected, &mut LogListener)
            })
            .await?;

            print_result("Patch", &file, &result);
            if !result.success {
                bail!("Patch failed: {}", result.message);
            }
        }
        Commands::Domain {
            client,
            server,
            to,
            from,
        } => {
            if client.is_none() && server.is_none() {
                bail!("Nothing to do: pass --client and/or --server");
            }
            let patcher = DomainPatcher::new(from, to).context("Invalid domain")?;
            println!("Replacing {} with {}...", patcher.original(), patcher.replacement());

            // Client and server are distinct files, so both jobs run at once.
            let client_patcher = patcher.clone();
            let client_path = client.clone();
            let server_path = server.clone();
            let (client_result, server_result) = tokio::try_join!(
                tokio::task::spawn_blocking(move || {
                    client_path.map(|p| patch_client(&p, &client_patcher, &mut LogListener))
                }),
                tokio::task::spawn_blocking(move || {
                    server_path.map(|p| patch_server(&p, &patcher, &mut LogListener))
                }),
            )?;

            let mut failed = false;
            if let (Some(path), Some(result)) = (&client, &client_result) {
                print_result("Client", path, result);
                failed |= !result.success;
            }
            if let (Some(path), Some(result)) = (&server, &server_result) {
                print_result("Server", path, result);
                failed |= !result.success;
            }
            if failed {
                bail!("Domain patch failed");
            }
        }
        Commands::Restore { client, server } => {
            let restored = tokio::task::spawn_blocking(move || restore_original_game(&client, &server))
                .await??;
            println!("Restored {} file(s)", restored.len());
            for path in &restored {
                println!("  {}", path.display());
            }
        }
        Commands::Backups { dir } => {
            let found = discover_backups(&dir)
                .with_context(|| format!("Failed to scan {}", dir.display()))?;
            for artifact in &found {
                println!(
                    "{:?}\t{}\t-> {}",
                    artifact.kind,
                    artifact.path.display(),
                    artifact.target.display()
                );
            }
            println!("{} backup(s)", found.len());
        }
        Commands::Hexdump {
            file,
            offset,
            length,
        } => {
            let bytes = read_bytes(&file, offset, length)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("Hexdump of {} at 0x{:X} ({} bytes):\n", file.display(), offset, length);
            print!("{}", hex_dump(&bytes, offset));
        }
        Commands::ReplaceByte { file, old, new } => {
            let path = file.clone();
            let count = tokio::task::spawn_blocking(move || {
                sigpatch::patch::replace_all_bytes(&path, old, new)
            })
            .await??;
            println!(
                "Replaced {} byte(s) 0x{:02X} -> 0x{:02X} in {}",
                count,
                old,
                new,
                file.display()
            );
        }
    }

    println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());
    Ok(())
}

#![allow(clippy::print_stderr, clippy::print_stdout)]

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use pfnr::context::{ContextConfig, ProductMetadata};
use pfnr::id;
use pfnr::lock::{self, LockConfig};
use pfnr::paths;
use pfnr::version::ProductVersion;
use pfnr::{EngineConfig, ProductIdentity, Reservation, VersionScanner};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pfnr",
    version,
    about = "Product file naming and version reservation"
)]
struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    /// Engine config (JSON). Defaults apply when absent.
    #[arg(long, global = true, env = "PFNR_CONFIG")]
    config: Option<PathBuf>,
    /// Log more to stderr (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve the next version of a product and print both files.
    Reserve {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        partial: bool,
        #[arg(long)]
        compressed: bool,
    },
    /// Print the version a reservation would try now, creating nothing.
    NextVersion {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        partial: bool,
    },
    /// Reconstruct a product identity from an existing file path.
    Inspect { path: PathBuf },
    /// Derive a new product's location from session context and metadata.
    Build {
        #[arg(long)]
        context: PathBuf,
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long)]
        reserve: bool,
    },
    /// Print the session output directory for a context.
    ContextDir {
        #[arg(long)]
        context: PathBuf,
    },
    /// Take or drop the advisory lock on a reserved data file.
    Lock {
        #[command(subcommand)]
        command: LockCommands,
    },
    /// Generate a lock owner id.
    Id,
}

#[derive(Subcommand)]
enum LockCommands {
    /// Create `<data file>.lock` for an owner, retrying while it is held.
    Acquire {
        #[arg(long)]
        data_file: PathBuf,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        max_retries: Option<usize>,
    },
    /// Remove the lock if the owner still holds it.
    Release {
        #[arg(long)]
        data_file: PathBuf,
        #[arg(long)]
        owner: String,
    },
}

#[derive(Debug, Serialize)]
struct OkResult {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct ReservedProduct<'a> {
    #[serde(flatten)]
    identity: &'a ProductIdentity,
    #[serde(flatten)]
    reservation: &'a Reservation,
}

#[derive(Debug, Serialize)]
struct NextVersionResult {
    version: ProductVersion,
}

#[derive(Debug, Serialize)]
struct InspectResult {
    path: PathBuf,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<ProductIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<ProductVersion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reasons: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BuildResult<'a> {
    identity: &'a ProductIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    reservation: Option<&'a Reservation>,
}

#[derive(Debug, Serialize)]
struct DirResult {
    dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct LockResult {
    lock_file: PathBuf,
    owner: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let cfg = EngineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Reserve {
            dir,
            name,
            partial,
            compressed,
        } => {
            let mut pfn = cfg
                .builder()
                .product_path(dir)
                .product_name(name)
                .partial(partial)
                .compressed(compressed)
                .build()?;
            let reservation = pfn.reserve()?.clone();
            write_result(
                cli.json,
                &ReservedProduct {
                    identity: pfn.identity(),
                    reservation: &reservation,
                },
            )?;
        }

        Commands::NextVersion { dir, name, partial } => {
            let version = VersionScanner::new(&cfg.grammar)
                .peek_next(&dir, &name, partial)
                .with_context(|| format!("scan {}", dir.display()))?;
            if cli.json {
                write_json(&NextVersionResult { version })?;
            } else {
                println!("{version}");
            }
        }

        Commands::Inspect { path } => {
            let builder = cfg.builder().full_product_path(path.clone());
            let identity = builder.to_identity().ok();
            let version = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| cfg.grammar.parse_file_name(n))
                .map(|parsed| parsed.version)
                .filter(|_| identity.is_some());
            write_result(
                cli.json,
                &InspectResult {
                    path,
                    valid: identity.is_some(),
                    identity,
                    version,
                    reasons: builder.invalid_reasons().to_vec(),
                },
            )?;
        }

        Commands::Build {
            context,
            metadata,
            reserve,
        } => {
            let ctx: ContextConfig = read_json(&context)?;
            let md: ProductMetadata = read_json(&metadata)?;
            let mut pfn = cfg
                .builder()
                .venue_appropriate_location(&ctx, &md, &cfg.layout)
                .build()?;
            if reserve {
                pfn.reserve()?;
            }
            write_result(
                cli.json,
                &BuildResult {
                    identity: pfn.identity(),
                    reservation: pfn.reservation(),
                },
            )?;
        }

        Commands::ContextDir { context } => {
            let ctx: ContextConfig = read_json(&context)?;
            let dir = paths::context_output_directory(&ctx, &cfg.layout);
            if cli.json {
                write_json(&DirResult { dir })?;
            } else {
                println!("{}", dir.display());
            }
        }

        Commands::Lock { command } => match command {
            LockCommands::Acquire {
                data_file,
                owner,
                max_retries,
            } => {
                let owner = match owner {
                    Some(owner) => owner,
                    None => id::owner_id()?,
                };
                let lock_cfg = LockConfig {
                    max_retries: max_retries.unwrap_or(cfg.lock.max_retries),
                    ..cfg.lock
                };
                let lock_file = cfg.grammar.lock_path(&data_file);
                let guard = lock::acquire_lock(&lock_file, owner.clone(), lock_cfg)?;
                // Held until `lock release`.
                let _ = guard.into_lock_file();
                write_result(cli.json, &LockResult { lock_file, owner })?;
            }
            LockCommands::Release { data_file, owner } => {
                lock::release_lock(&cfg.grammar.lock_path(&data_file), owner)?;
                write_ok(cli.json)?;
            }
        },

        Commands::Id => {
            let out = id::owner_id()?;
            if cli.json {
                write_json(&out)?;
            } else {
                println!("{out}");
            }
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse JSON {}", path.display()))
}

fn write_ok(json: bool) -> anyhow::Result<()> {
    if json {
        write_result(true, &OkResult { ok: true })
    } else {
        println!("ok");
        Ok(())
    }
}

fn write_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let raw = serde_json::to_string_pretty(value).context("serialize JSON")?;
    stdout.write_all(raw.as_bytes()).context("write stdout")?;
    stdout.write_all(b"\n").context("write stdout newline")?;
    Ok(())
}

fn write_result<T: Serialize>(json: bool, value: &T) -> anyhow::Result<()> {
    if json {
        write_json(value)
    } else {
        // human output: best-effort JSON on one line.
        println!("{}", serde_json::to_string(value).context("serialize")?);
        Ok(())
    }
}

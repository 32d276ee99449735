use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fingerprint_store::progress::{self, format_duration};
use fingerprint_store::{FingerprintStore, StoreConfig};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "fpstore")]
#[command(about = "Inspect and maintain an audio fingerprint store")]
struct Args {
    /// JSON config file; fields left out use their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides the config file's path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Hide progress bars and log progress instead
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create tables and purge songs left unfinished
    Setup,

    /// Drop and recreate both tables
    Empty {
        /// Required: this deletes every song and fingerprint
        #[arg(long)]
        yes: bool,
    },

    /// Delete songs whose fingerprinting never completed
    Purge,

    /// Print song and fingerprint counts
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// List completed songs
    Songs {
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Write stored fingerprints as TSV (hash, song_id, offset) to stdout
    Dump {
        /// Only rows for this hash
        #[arg(long)]
        hash: Option<String>,
    },
}

const LOG_INTERVAL: u64 = 100_000;

fn load_config(args: &Args) -> Result<StoreConfig> {
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(db) = &args.db {
        config.path = db.clone();
    }
    Ok(config)
}

/// Opens the store for `cmd`. Everything except `empty` runs `setup()`
/// first, so a new database file starts with both tables.
fn open_store(config: &StoreConfig, cmd: &Command) -> Result<FingerprintStore> {
    let store = match cmd {
        Command::Empty { .. } => FingerprintStore::open_without_setup(config),
        _ => FingerprintStore::open(config),
    };
    store.with_context(|| format!("Failed to open store {}", config.path.display()))
}

fn dump(store: &FingerprintStore, hash: Option<&str>) -> Result<u64> {
    let total = match hash {
        Some(_) => 0,
        None => store.get_num_fingerprints()?,
    };
    let pb = progress::scan_bar(total, "fingerprints");

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut written = 0u64;
    for fp in store.query(hash) {
        let fp = fp?;
        writeln!(out, "{}\t{}\t{}", fp.hash, fp.song_id, fp.offset)?;
        written += 1;
        pb.inc(1);
        progress::log_rows("fingerprints", written, total, LOG_INTERVAL);
    }
    out.flush()?;

    pb.finish_with_message(format!("Dumped {} fingerprints", written));
    Ok(written)
}

fn list_songs(store: &FingerprintStore, json: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for song in store.get_songs() {
        let song = song?;
        if json {
            writeln!(out, "{}", serde_json::to_string(&song)?)?;
        } else {
            writeln!(
                out,
                "[{}] {} ({})",
                song.song_id,
                song.song_name,
                hex::encode(&song.file_hash)
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::prelude::*;

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .init()
    }

    let args = Args::parse();
    progress::set_log_only(args.log_only);
    let config = load_config(&args)?;

    let start = Instant::now();
    let store = open_store(&config, &args.cmd)?;

    match args.cmd {
        Command::Setup => {
            eprintln!("Store ready: {}", config.path.display());
        }
        Command::Empty { yes } => {
            if !yes {
                anyhow::bail!("Refusing to empty {} without --yes", config.path.display());
            }
            store.empty().context("Failed to empty store")?;
            eprintln!("Emptied {}", config.path.display());
        }
        Command::Purge => {
            let purged = store
                .delete_unfingerprinted_songs()
                .context("Failed to purge unfinished songs")?;
            eprintln!("Deleted {} unfinished songs", purged);
        }
        Command::Stats { json } => {
            let stats = store.stats().context("Failed to read store stats")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("  Songs: {}", stats.songs);
                println!("  Fingerprints: {}", stats.fingerprints);
            }
        }
        Command::Songs { json } => {
            list_songs(&store, json).context("Failed to list songs")?;
        }
        Command::Dump { hash } => {
            let written =
                dump(&store, hash.as_deref()).context("Failed to dump fingerprints")?;
            eprintln!(
                "Wrote {} rows in {}",
                written,
                format_duration(start.elapsed())
            );
        }
    }

    Ok(())
}

use acoufp::config::Config;
use acoufp::engine::Engine;
use acoufp::store::Store;
use acoufp::{bulk, listen, monitor};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Triplet-based acoustic fingerprinting (§6, "CLI (boundary; not core)").
#[derive(Parser, Debug)]
#[command(name = "acoufp")]
#[command(about = "Fingerprint, index and match audio clips", long_about = None)]
struct Args {
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode, fingerprint and index a recording.
    Store { path: PathBuf },
    /// Fingerprint a clip and find matching resources in the index.
    Query {
        path: PathBuf,
        #[arg(long)]
        start: Option<f32>,
        #[arg(long)]
        len: Option<f32>,
        /// Give up and return partial results after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Slide a window across a long recording, matching each segment.
    Monitor { path: PathBuf },
    /// Record from the default microphone and query what was heard.
    Listen {
        /// Capture duration in seconds.
        seconds: u64,
    },
    /// Print backend-wide counters.
    Stats,
    /// Export a stored resource's fingerprints as a JSON sidecar.
    Dump { resource_id: i32, folder: PathBuf },
    /// Re-import a resource from a JSON sidecar written by `dump`.
    Load { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Mirrors fpmonitor's logging convention: quiet by default, -v raises
    // the level to Info so store/query lifecycle events become visible.
    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Warn)
            .init();
    }

    let config = Config::from_env().context("loading configuration")?;
    let engine = Engine::from_config(config).context("initialising storage backend")?;

    match args.command {
        Command::Store { path } => {
            let metadata = engine.store_path(&path).await.context("storing resource")?;
            match metadata {
                Some(m) => println!(
                    "stored resource {} ({} fingerprints, {:.2}s)",
                    m.id, m.num_fingerprints, m.duration_seconds
                ),
                None => println!("no fingerprints extracted from {}", path.display()),
            }
        }
        Command::Query { path, start, len, timeout_ms } => {
            let deadline = timeout_ms
                .map(|ms| tokio::time::Instant::now() + std::time::Duration::from_millis(ms));
            let results = engine
                .query_window(&path, start, len, 0.0, &Default::default(), deadline)
                .await
                .context("querying")?;
            print_results(&results);
        }
        Command::Monitor { path } => {
            let duration = engine
                .probe_duration_seconds(&path)
                .context("probing duration")?;
            let results = monitor::monitor_path(&engine, &path, duration)
                .await
                .context("monitoring")?;
            print_results(&results);
        }
        Command::Listen { seconds } => {
            let samples =
                listen::record_from_microphone(seconds, engine.config.sample_rate)
                    .context("recording from microphone")?;
            let scratch = tempfile::NamedTempFile::new().context("creating scratch wav")?;
            listen::save_as_wav(&samples, engine.config.sample_rate, scratch.path())
                .context("saving captured audio")?;
            let results = engine
                .query_path(scratch.path())
                .await
                .context("querying captured audio")?;
            print_results(&results);
        }
        Command::Stats => {
            let stats = engine.store.stats().await.context("reading stats")?;
            println!(
                "{} postings across {} resources",
                stats.num_postings, stats.num_resources
            );
        }
        Command::Dump { resource_id, folder } => {
            bulk::dump_resource(&engine.store, resource_id, &folder)
                .await
                .context("dumping resource")?;
            println!("wrote {}/{resource_id}.fp.json", folder.display());
        }
        Command::Load { path } => {
            let metadata = bulk::load_resource(&engine.store, &path)
                .await
                .context("loading resource")?;
            println!(
                "loaded resource {} ({} fingerprints)",
                metadata.id, metadata.num_fingerprints
            );
        }
    }

    engine.close().await.context("closing storage backend")?;
    Ok(())
}

fn print_results(results: &[acoufp::QueryResult]) {
    if results.is_empty() {
        println!("no matches");
        return;
    }
    for r in results {
        println!(
            "{} [{:.2}-{:.2}] -> {} [{:.2}-{:.2}] score={} time_factor={:.3} coverage={:.2}",
            r.query_path,
            r.query_start,
            r.query_stop,
            r.ref_path,
            r.ref_start,
            r.ref_stop,
            r.score,
            r.time_factor,
            r.percent_seconds_with_match,
        );
    }
}

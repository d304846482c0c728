//! TideFS smoke workload
//!
//! Starts the environment on the in-memory engine and drives concurrent
//! write/read/metadata traffic through the synchronous bridge, verifying
//! every byte read back. Exercises the same paths an embedding database
//! would: writable append + close, sequential and positional reads, rename,
//! delete, directory listing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tidefs_common::{CacheConfig, EnvConfig};
use tidefs_engine::{MemDeviceProvider, MemEngine};
use tidefs_env::{Priority, TideEnv};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "tidefs-smoke", about = "TideFS smoke workload")]
struct Args {
    /// Managed namespace mount prefix
    #[arg(long, default_value = "/db")]
    mount: PathBuf,

    /// JSON config file; overrides the individual flags below
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backing device size in MB
    #[arg(long, default_value_t = 256)]
    device_mb: u64,

    /// File cache size in MB
    #[arg(long, default_value_t = 64)]
    cache_mb: u64,

    /// Worker threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Files written per thread
    #[arg(long, default_value_t = 8)]
    files: usize,

    /// Bytes per file
    #[arg(long, default_value_t = 64 * 1024)]
    file_bytes: usize,

    /// Log level (trace / debug / info / warn / error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

const MB: u64 = 1024 * 1024;

fn payload(thread: usize, file: usize, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64((thread as u64) << 32 | file as u64);
    (0..len).map(|_| rng.r#gen()).collect()
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match &args.config {
        Some(path) => EnvConfig::load(path).context("load config")?,
        None => EnvConfig {
            mount_dir: args.mount.clone(),
            cache: CacheConfig {
                capacity_bytes: args.cache_mb * MB,
                ..CacheConfig::default()
            },
            ..EnvConfig::default()
        },
    };
    let mount = config.mount_dir.clone();

    info!(threads = args.threads, files = args.files, "starting TideFS smoke workload");

    let engine = MemEngine::new();
    let engine_state = engine.state();
    let env = Arc::new(
        TideEnv::start(
            Box::new(MemDeviceProvider::new(args.device_mb * MB)),
            Box::new(engine),
            config,
        )
        .context("start environment")?,
    );

    // ── Concurrent write + verify ─────────────────────────────────────────────
    let started = Instant::now();
    let workers: Vec<_> = (0..args.threads)
        .map(|t| {
            let worker_env = Arc::clone(&env);
            let mount = mount.clone();
            let (files, file_bytes) = (args.files, args.file_bytes);
            env.spawn_io_thread(move |slot| {
                let env = worker_env;
                for i in 0..files {
                    let path = mount.join(format!("t{t}-f{i}.sst"));
                    let data = payload(t, i, file_bytes);

                    let mut writer = env.new_writable_file(slot, &path).unwrap();
                    if i == 0 {
                        writer.set_io_priority(Priority::High);
                    }
                    for chunk in data.chunks(4096) {
                        writer.append(slot, chunk).unwrap();
                    }
                    writer.fsync(slot).unwrap();
                    assert_eq!(writer.file_size().unwrap(), file_bytes as u64);
                    writer.close(slot).unwrap();

                    let mut file = env.new_sequential_file(slot, &path).unwrap();
                    let read = file.read(slot, file_bytes).unwrap();
                    assert_eq!(&read[..], &data[..], "read-back mismatch for {path:?}");
                    assert!(file.read(slot, 1).unwrap().is_empty());
                    file.close(slot).unwrap();

                    // Positional re-reads land in the resident window.
                    if file_bytes >= 1024 {
                        let mut file = env.new_random_access_file(slot, &path).unwrap();
                        let mid = file_bytes / 2;
                        let slice = file.read_at(slot, mid as u64, 256).unwrap();
                        assert_eq!(&slice[..], &data[mid..mid + slice.len()]);
                        let slice = file.read_at(slot, (mid + 256) as u64, 256).unwrap();
                        assert_eq!(&slice[..], &data[mid + 256..mid + 256 + slice.len()]);
                        file.close(slot).unwrap();
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        if worker.join().is_err() {
            bail!("worker thread failed verification");
        }
    }
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        written = args.threads * args.files,
        "write/read verification passed"
    );

    // ── Metadata traffic ──────────────────────────────────────────────────────
    let mut slot = env.thread_slot();

    let children = env.get_children(&mut slot, &mount).context("list children")?;
    if children.len() != args.threads * args.files {
        bail!(
            "expected {} managed files, engine lists {}",
            args.threads * args.files,
            children.len()
        );
    }

    if args.threads > 0 && args.files > 0 {
        let old = mount.join("t0-f0.sst");
        let renamed = mount.join("t0-f0.renamed");
        env.rename_file(&mut slot, &old, &renamed).context("rename")?;
        if !env.file_exists(&mut slot, &renamed).context("exists")? {
            bail!("renamed file missing from engine metadata");
        }
        env.delete_file(&mut slot, &renamed).context("delete")?;
    }

    let lock = env.lock_file(&mut slot, mount.join("LOCK")).context("lock")?;
    env.unlock_file(&mut slot, lock).context("unlock")?;

    let stats = env.cache().stats();
    info!(
        files = engine_state.file_names().len(),
        hit_ratio = stats.hit_ratio(),
        flushes = stats.flushes.load(std::sync::atomic::Ordering::Relaxed),
        evictions = stats.evictions.load(std::sync::atomic::Ordering::Relaxed),
        "metadata traffic passed"
    );

    env.shutdown();
    info!("smoke workload complete");
    Ok(())
}

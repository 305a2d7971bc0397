use ledgerd_log as logging;

macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if crate::logging::enabled($level) {
            crate::logging::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

macro_rules! log_error {
    ($($arg:tt)*) => {{
        log_at!(crate::logging::Level::Error, $($arg)*);
    }};
}

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        log_at!(crate::logging::Level::Warn, $($arg)*);
    }};
}

macro_rules! log_info {
    ($($arg:tt)*) => {{
        log_at!(crate::logging::Level::Info, $($arg)*);
    }};
}

pub mod config;
pub mod import;
pub mod stats;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use ledgerd_chainstate::engine::{Engine, EngineOptions, TipChanged};
use ledgerd_consensus::params::{chain_params, hash256_to_hex};
use ledgerd_storage::fjall::{FjallOptions, FjallStore};
use ledgerd_storage::memory::MemoryStore;
use ledgerd_storage::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch};
use tokio::sync::watch;

use crate::config::{parse_args_from, usage, Backend, CliAction, Config};
use crate::import::{collect_block_files, import_files};
use crate::stats::snapshot_status;

const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";
const DB_DIR_NAME: &str = "db";

pub enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl Store {
    fn persist(&self) -> Result<(), StoreError> {
        match self {
            Store::Memory(_) => Ok(()),
            Store::Fjall(store) => store.persist(),
        }
    }
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.put(column, key, value),
            Store::Fjall(store) => store.put(column, key, value),
        }
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.delete(column, key),
            Store::Fjall(store) => store.delete(column, key),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.for_each_prefix(column, prefix, visitor),
            Store::Fjall(store) => store.for_each_prefix(column, prefix, visitor),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }
}

struct DataDirLock {
    _file: File,
}

fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let suffix = if holder.is_empty() {
                String::new()
            } else {
                format!(" ({holder})")
            };
            Err(format!(
                "data dir {} is already locked by another ledgerd; lock file {}{suffix}",
                data_dir.display(),
                lock_path.display()
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}

fn open_store(config: &Config) -> Result<Store, String> {
    match config.backend {
        Backend::Memory => Ok(Store::Memory(MemoryStore::new())),
        Backend::Fjall => {
            let path = config.data_dir.join(DB_DIR_NAME);
            let options = FjallOptions {
                cache_bytes: config.fjall_cache_mb.map(|mb| mb * 1024 * 1024),
                ..FjallOptions::default()
            };
            FjallStore::open_with_options(&path, options)
                .map(Store::Fjall)
                .map_err(|err| format!("failed to open {}: {err}", path.display()))
        }
    }
}

fn log_tip_change(event: &TipChanged) {
    if event.disconnected.is_empty() {
        log_info!(
            "new tip {} at height {}",
            hash256_to_hex(&event.new.hash),
            event.new.height
        );
    } else {
        log_warn!(
            "reorg to {} at height {}: {} blocks disconnected, {} connected",
            hash256_to_hex(&event.new.hash),
            event.new.height,
            event.disconnected.len(),
            event.connected.len()
        );
    }
}

pub async fn run_entry() -> Result<(), String> {
    match parse_args_from(std::env::args().skip(1))? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("ledgerd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(Instant::now(), config).await,
    }
}

async fn run_with_config(start_time: Instant, config: Config) -> Result<(), String> {
    logging::init(logging::LogConfig {
        filter: config.log_filter.clone(),
        format: config.log_format,
        timestamps: config.log_timestamps,
    });
    log_info!(
        "starting ledgerd (network={}, backend={}, data_dir={})",
        config.network.as_str(),
        config.backend.as_str(),
        config.data_dir.display()
    );

    fs::create_dir_all(&config.data_dir).map_err(|err| {
        format!(
            "failed to create data dir {}: {err}",
            config.data_dir.display()
        )
    })?;
    let _data_dir_lock = lock_data_dir(&config.data_dir)?;

    let params = chain_params(config.network);
    let magic = params.message_start;
    let store = Arc::new(open_store(&config)?);
    let options = EngineOptions {
        script_threads: config.script_threads,
        checkpoints_enabled: config.checkpoints,
        max_orphans: config.max_orphans,
        ..EngineOptions::default()
    };
    let engine = Arc::new(
        Engine::open(Arc::clone(&store), params.consensus, options)
            .map_err(|err| format!("failed to open engine: {err}"))?,
    );
    match engine.get_best_tip() {
        Some(tip) => log_info!(
            "resumed at height {} ({})",
            tip.height,
            hash256_to_hex(&tip.hash)
        ),
        None => log_info!("empty chain"),
    }

    let events = engine.subscribe();
    let notifier = thread::spawn(move || {
        for event in events.iter() {
            log_tip_change(&event);
        }
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log_info!("interrupt received, shutting down");
                shutdown.store(true, Ordering::Relaxed);
                let _ = shutdown_tx.send(true);
            }
        });
    }

    if !config.imports.is_empty() {
        let files = collect_block_files(&config.imports).map_err(|err| err.to_string())?;
        log_info!("importing {} block files", files.len());
        let import_engine = Arc::clone(&engine);
        let import_shutdown = Arc::clone(&shutdown);
        let summary = tokio::task::spawn_blocking(move || {
            import_files(&import_engine, &files, magic, &import_shutdown)
        })
        .await
        .map_err(|err| format!("import task failed: {err}"))?;
        match summary {
            Ok(summary) => log_info!(
                "import done: {} files, {} blocks ({} accepted, {} known, {} rejected, {} orphaned)",
                summary.files,
                summary.blocks,
                summary.accepted,
                summary.already_known,
                summary.rejected,
                summary.orphaned
            ),
            Err(err) => log_error!("import stopped: {err}"),
        }
    }

    if config.daemon && !shutdown.load(Ordering::Relaxed) {
        let interval_secs = config.status_interval_secs;
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if interval_secs > 0 {
                        let status = snapshot_status(&engine, config.network, config.backend, start_time);
                        log_info!("{}", status.status_line());
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    let status = snapshot_status(&engine, config.network, config.backend, start_time);
    if config.status_json {
        let json = serde_json::to_string_pretty(&status).map_err(|err| err.to_string())?;
        println!("{json}");
    } else {
        println!("{}", status.status_line());
    }

    let halted = engine.is_halted();
    drop(engine);
    let _ = notifier.join();
    store
        .persist()
        .map_err(|err| format!("failed to persist store: {err}"))?;
    if halted {
        return Err("engine halted after a ledger write failure".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_dispatches_to_backend() {
        let store = Store::Memory(MemoryStore::new());
        store.put(Column::Meta, b"k", b"v").expect("put");
        assert_eq!(
            store.get(Column::Meta, b"k").expect("get"),
            Some(b"v".to_vec())
        );

        let mut batch = WriteBatch::new();
        batch.delete(Column::Meta, b"k".as_slice());
        batch.put(Column::Meta, b"k2".as_slice(), b"v2".as_slice());
        store.write_batch(&batch).expect("batch");
        assert_eq!(store.get(Column::Meta, b"k").expect("get"), None);
        assert_eq!(store.scan_prefix(Column::Meta, b"k").expect("scan").len(), 1);
        store.persist().expect("persist");
    }

    #[test]
    fn data_dir_lock_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = lock_data_dir(dir.path()).expect("first lock");
        let err = match lock_data_dir(dir.path()) {
            Ok(_) => panic!("second lock should fail"),
            Err(err) => err,
        };
        assert!(err.contains("already locked"), "{err}");
        drop(first);
        lock_data_dir(dir.path()).expect("lock after release");
    }
}

use std::thread;
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;
use shared::types::{ScanKey, ScanRecord, StoredScan};
use crate::config::StoreConfig;
use crate::store::{db::ScanDb, ScanStore, StorageError, UpsertOutcome};

type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

/// Commands sent to the store workers
pub enum StoreCommand {
    Persist(ScanRecord, Reply<UpsertOutcome>),
    Get(ScanKey, Reply<Option<StoredScan>>),
    ListByAddress(String, Reply<Vec<StoredScan>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the store worker pool.
///
/// Each worker is an OS thread owning one SQLite connection, pulling from a
/// shared queue. Reads run in parallel under WAL; writes still take turns on
/// SQLite's database-wide write lock, one short statement at a time.
#[derive(Clone)]
pub struct StoreHandle {
    tx: flume::Sender<StoreCommand>,
    writers: usize,
    timeout: Duration,
    shutdown_timeout: Duration,
}

impl StoreHandle {
    /// Open one connection per worker and start the workers
    pub fn spawn(config: &StoreConfig) -> Result<Self> {
        let (tx, rx) = flume::bounded::<StoreCommand>(config.queue_depth);
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

        for id in 0..config.writers {
            let db = ScanDb::open(&config.db_path, busy_timeout)
                .with_context(|| format!("Failed to open connection for store worker {}", id))?;
            let rx = rx.clone();

            thread::Builder::new()
                .name(format!("scan-store-{}", id))
                .spawn(move || serve(id, db, rx))
                .with_context(|| format!("Failed to spawn store worker {}", id))?;
        }

        tracing::info!(
            "Started {} store workers on {}",
            config.writers,
            config.db_path.display()
        );

        Ok(Self {
            tx,
            writers: config.writers,
            timeout: Duration::from_millis(config.persist_timeout_ms),
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        })
    }

    /// Get a single scan by key
    pub async fn get(&self, key: ScanKey) -> Result<Option<StoredScan>, StorageError> {
        self.request(move |reply| StoreCommand::Get(key, reply)).await
    }

    /// Get all scans for an address
    pub async fn list_by_address(&self, address: String) -> Result<Vec<StoredScan>, StorageError> {
        self.request(move |reply| StoreCommand::ListByAddress(address, reply)).await
    }

    /// Stop every worker after the work already queued ahead of the stop
    /// commands, and wait for each to close its connection.
    ///
    /// Gives up after `store.shutdown_timeout_ms`; a worker that died never
    /// picks up its stop command.
    pub async fn shutdown(&self) -> Result<()> {
        let drain = async {
            let mut pending = Vec::with_capacity(self.writers);
            for _ in 0..self.writers {
                let (reply, rx) = oneshot::channel();
                self.tx
                    .send_async(StoreCommand::Shutdown(reply))
                    .await
                    .map_err(|_| anyhow!("Store workers already stopped"))?;
                pending.push(rx);
            }

            for rx in pending {
                rx.await
                    .context("Store worker exited without confirming shutdown")?;
            }
            Ok::<_, anyhow::Error>(())
        };

        tokio::time::timeout(self.shutdown_timeout, drain)
            .await
            .map_err(|_| anyhow!("Store did not drain within {:?}", self.shutdown_timeout))??;

        tracing::info!("Store drained");
        Ok(())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> StoreCommand,
    ) -> Result<T, StorageError> {
        let (reply, rx) = oneshot::channel();

        let exchange = async {
            self.tx
                .send_async(command(reply))
                .await
                .map_err(|_| StorageError::Unavailable)?;
            rx.await.map_err(|_| StorageError::Unavailable)?
        };

        // A timed-out command may still run later; the upsert is idempotent.
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl ScanStore for StoreHandle {
    async fn persist(&self, record: ScanRecord) -> Result<UpsertOutcome, StorageError> {
        self.request(move |reply| StoreCommand::Persist(record, reply)).await
    }
}

fn serve(id: usize, mut db: ScanDb, rx: flume::Receiver<StoreCommand>) {
    let mut done = None;

    while let Ok(cmd) = rx.recv() {
        match cmd {
            StoreCommand::Persist(record, reply) => {
                let _ = reply.send(db.upsert_scan(&record));
            }
            StoreCommand::Get(key, reply) => {
                let _ = reply.send(db.get_scan(&key));
            }
            StoreCommand::ListByAddress(address, reply) => {
                let _ = reply.send(db.list_by_address(&address));
            }
            StoreCommand::Shutdown(reply) => {
                done = Some(reply);
                break;
            }
        }
    }

    // Release the queue before confirming so later sends see a closed channel
    drop(rx);
    drop(db);
    tracing::debug!("Store worker {} stopped", id);

    if let Some(done) = done {
        let _ = done.send(());
    }
}

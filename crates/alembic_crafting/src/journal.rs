//! # Balance Journal
//!
//! **Group Commit for Ledger Mutations**
//!
//! Every balance change made by the reference ledger is appended here
//! without waiting for disk. The control thread never blocks on I/O:
//!
//! 1. Buffer entries in memory (bounded queue, backpressure when full)
//! 2. A dedicated writer thread drains the queue in batches
//! 3. One fsync per batch, then every handle in the batch is signalled
//!
//! ## Architecture
//!
//! ```text
//!   Control thread ──> [Bounded Queue] ──> [Journal Writer Thread] ──> Disk
//!     (append only)                           (single writer)
//! ```
//!
//! ## Format
//!
//! ```text
//! [8 bytes: LSN]
//! [1 byte: op kind]
//! [4 bytes: payload length]
//! [N bytes: payload]
//! [4 bytes: CRC32 of above]
//! ```

use crate::error::{CraftingError, CraftingResult};
use crate::ledger::BalancePool;
use alembic_shared::ActorId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Size of the fixed record header (lsn + kind + length).
const HEADER_LEN: usize = 8 + 1 + 4;

/// Size of an encoded [`JournalOp`] payload.
const PAYLOAD_LEN: usize = 8 + 1 + 8 + 8;

/// Configuration for the balance journal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Journal file location.
    pub path: PathBuf,
    /// Maximum entries before a forced flush.
    pub max_batch_size: usize,
    /// Maximum time before a forced flush (ms).
    pub max_batch_delay_ms: u64,
    /// Capacity of the pending queue.
    pub queue_capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/balances.journal"),
            max_batch_size: 100,
            max_batch_delay_ms: 10,
            queue_capacity: 10_000,
        }
    }
}

/// Kind of balance mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalOpKind {
    /// Funds removed.
    Debit = 1,
    /// Funds added (including rollbacks).
    Credit = 2,
    /// Balance overwritten by an administrator or loader.
    Set = 3,
}

impl JournalOpKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Debit),
            2 => Some(Self::Credit),
            3 => Some(Self::Set),
            _ => None,
        }
    }
}

/// A single balance mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JournalOp {
    /// What happened.
    pub kind: JournalOpKind,
    /// Whose balance changed.
    pub actor: ActorId,
    /// Which pool changed.
    pub pool: BalancePool,
    /// Amount moved (or the new value for `Set`).
    pub amount: u64,
    /// Pool balance after the mutation.
    pub balance_after: u64,
}

impl JournalOp {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAYLOAD_LEN);
        buf.extend_from_slice(&self.actor.raw().to_le_bytes());
        buf.push(self.pool as u8);
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(&self.balance_after.to_le_bytes());
        buf
    }

    fn decode(kind: JournalOpKind, data: &[u8]) -> Option<Self> {
        if data.len() != PAYLOAD_LEN {
            return None;
        }
        let actor = u64::from_le_bytes(data[0..8].try_into().ok()?);
        let pool = BalancePool::from_u8(data[8])?;
        let amount = u64::from_le_bytes(data[9..17].try_into().ok()?);
        let balance_after = u64::from_le_bytes(data[17..25].try_into().ok()?);
        Some(Self {
            kind,
            actor: ActorId(actor),
            pool,
            amount,
            balance_after,
        })
    }
}

/// A journal record read back from disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JournalRecord {
    /// Log sequence number.
    pub lsn: u64,
    /// The mutation.
    pub op: JournalOp,
}

/// Signal for operation completion.
struct CompletionSignal {
    done: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl CompletionSignal {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    fn signal(&self) {
        let _guard = self.mutex.lock();
        self.done.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    fn wait(&self) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.mutex.lock();
        while !self.done.load(Ordering::Acquire) {
            self.condvar.wait(&mut guard);
        }
    }
}

/// Handle returned to the caller for tracking durability.
pub struct JournalHandle {
    completion: Arc<CompletionSignal>,
    /// LSN assigned to this entry.
    pub lsn: u64,
}

impl JournalHandle {
    /// Waits for the entry to be durably written.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Returns true if already written.
    pub fn is_done(&self) -> bool {
        self.completion.done.load(Ordering::Acquire)
    }
}

/// Statistics for the journal writer.
#[derive(Clone, Debug, Default)]
pub struct JournalStats {
    /// Total entries written.
    pub total_ops: u64,
    /// Total batches written.
    pub total_batches: u64,
    /// Total bytes written.
    pub total_bytes: u64,
    /// Batches whose write or sync failed.
    pub failed_batches: u64,
    /// Total time spent in fsync (nanoseconds).
    pub total_sync_time_ns: u64,
}

struct PendingEntry {
    lsn: u64,
    kind: u8,
    payload: Vec<u8>,
    completion: Arc<CompletionSignal>,
}

/// Bounded queue between the control thread and the writer.
struct EntryQueue {
    buffer: Mutex<VecDeque<PendingEntry>>,
    not_empty: Condvar,
    capacity: usize,
}

impl EntryQueue {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Appends an entry. Returns it back if the queue is full.
    fn push(&self, entry: PendingEntry) -> Result<(), PendingEntry> {
        let mut buf = self.buffer.lock();
        if buf.len() >= self.capacity {
            return Err(entry);
        }
        buf.push_back(entry);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Drains up to `max_count` entries, waiting up to `timeout` for the first.
    fn drain(&self, max_count: usize, timeout: Duration) -> Vec<PendingEntry> {
        let mut buf = self.buffer.lock();
        if buf.is_empty() {
            self.not_empty.wait_for(&mut buf, timeout);
        }
        let count = buf.len().min(max_count);
        buf.drain(..count).collect()
    }

    fn len(&self) -> usize {
        self.buffer.lock().len()
    }
}

/// Batched, checksummed journal of balance mutations.
pub struct BalanceJournal {
    queue: Arc<EntryQueue>,
    current_lsn: AtomicU64,
    writer_handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<Mutex<JournalStats>>,
}

impl BalanceJournal {
    /// Opens (or creates) a journal and starts its writer thread.
    ///
    /// New entries continue after the highest LSN already on disk.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or the writer thread
    /// cannot be spawned.
    pub fn open(config: &JournalConfig) -> CraftingResult<Self> {
        let next_lsn = read_journal(&config.path)?
            .last()
            .map_or(0, |record| record.lsn + 1);

        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CraftingError::Journal(format!("Failed to create journal dir: {e}")))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .map_err(|e| CraftingError::Journal(format!("Failed to open journal: {e}")))?;

        let queue = Arc::new(EntryQueue::new(config.queue_capacity.max(1)));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(JournalStats::default()));

        let writer_queue = Arc::clone(&queue);
        let writer_shutdown = Arc::clone(&shutdown);
        let writer_stats = Arc::clone(&stats);
        let max_batch = config.max_batch_size.max(1);
        let delay = Duration::from_millis(config.max_batch_delay_ms);

        let writer_handle = thread::Builder::new()
            .name("alembic-journal".to_string())
            .spawn(move || {
                writer_loop(file, &writer_queue, &writer_shutdown, &writer_stats, max_batch, delay);
            })
            .map_err(|e| CraftingError::Journal(format!("Failed to spawn journal writer: {e}")))?;

        tracing::info!(path = %config.path.display(), next_lsn, "balance journal opened");

        Ok(Self {
            queue,
            current_lsn: AtomicU64::new(next_lsn),
            writer_handle: Some(writer_handle),
            shutdown,
            stats,
        })
    }

    /// Appends a mutation without waiting for disk.
    ///
    /// # Errors
    ///
    /// Returns `Journal` if the queue is full (backpressure).
    pub fn append(&self, op: JournalOp) -> CraftingResult<JournalHandle> {
        let lsn = self.current_lsn.fetch_add(1, Ordering::SeqCst);
        let completion = Arc::new(CompletionSignal::new());

        let entry = PendingEntry {
            lsn,
            kind: op.kind as u8,
            payload: op.encode(),
            completion: Arc::clone(&completion),
        };

        self.queue
            .push(entry)
            .map_err(|_| CraftingError::Journal("journal queue full (backpressure)".to_string()))?;

        Ok(JournalHandle { completion, lsn })
    }

    /// Returns current statistics.
    pub fn stats(&self) -> JournalStats {
        self.stats.lock().clone()
    }

    /// Returns the number of entries not yet handed to the writer.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Waits until everything appended so far is on disk.
    ///
    /// # Errors
    ///
    /// Returns `Journal` if the marker cannot be queued, or if any batch
    /// since the journal was opened failed to write or sync.
    pub fn flush(&self) -> CraftingResult<()> {
        let lsn = self.current_lsn.load(Ordering::SeqCst);
        let completion = Arc::new(CompletionSignal::new());
        // Marker entries are signalled by the writer but never written.
        let marker = PendingEntry {
            lsn: lsn.saturating_sub(1),
            kind: 0,
            payload: Vec::new(),
            completion: Arc::clone(&completion),
        };
        self.queue
            .push(marker)
            .map_err(|_| CraftingError::Journal("journal queue full (backpressure)".to_string()))?;
        completion.wait();

        let failed = self.stats.lock().failed_batches;
        if failed > 0 {
            return Err(CraftingError::Journal(format!(
                "{failed} journal batch(es) failed to write"
            )));
        }
        Ok(())
    }
}

impl Drop for BalanceJournal {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        {
            let buf = self.queue.buffer.lock();
            self.queue.not_empty.notify_all();
            drop(buf);
        }

        if let Some(handle) = self.writer_handle.take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(
    file: File,
    queue: &EntryQueue,
    shutdown: &AtomicBool,
    stats: &Mutex<JournalStats>,
    max_batch: usize,
    delay: Duration,
) {
    let mut writer = BufWriter::with_capacity(64 * 1024, file);

    loop {
        let stopping = shutdown.load(Ordering::Relaxed);
        let batch = queue.drain(max_batch, delay);

        if batch.is_empty() {
            if stopping {
                break;
            }
            continue;
        }

        let mut bytes_written = 0u64;
        let mut failed = false;

        for entry in batch.iter().filter(|e| e.kind != 0) {
            match write_record(&mut writer, entry.lsn, entry.kind, &entry.payload) {
                Ok(n) => bytes_written += n,
                Err(e) => {
                    failed = true;
                    tracing::error!(lsn = entry.lsn, error = %e, "journal write failed");
                }
            }
        }

        let sync_start = Instant::now();
        if let Err(e) = writer.flush().and_then(|()| writer.get_ref().sync_data()) {
            failed = true;
            tracing::error!(error = %e, "journal sync failed");
        }
        let sync_time = sync_start.elapsed();

        for entry in &batch {
            entry.completion.signal();
        }

        let mut s = stats.lock();
        s.total_ops += batch.iter().filter(|e| e.kind != 0).count() as u64;
        s.total_batches += 1;
        s.total_bytes += bytes_written;
        s.total_sync_time_ns += u64::try_from(sync_time.as_nanos()).unwrap_or(u64::MAX);
        if failed {
            s.failed_batches += 1;
        }
    }

    let _ = writer.flush();
    let _ = writer.get_ref().sync_all();
}

fn write_record(
    writer: &mut impl Write,
    lsn: u64,
    kind: u8,
    payload: &[u8],
) -> std::io::Result<u64> {
    let len = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload too large"))?;

    let mut record = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
    record.extend_from_slice(&lsn.to_le_bytes());
    record.push(kind);
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(payload);
    let crc = crc32fast::hash(&record);
    record.extend_from_slice(&crc.to_le_bytes());

    writer.write_all(&record)?;
    Ok(record.len() as u64)
}

/// Reads every intact record from a journal file.
///
/// Reading stops at the first torn or corrupt record, including one whose
/// length field is wrong; a missing file reads as empty.
///
/// # Errors
///
/// Returns `Journal` if the file exists but cannot be opened.
pub fn read_journal(path: impl AsRef<Path>) -> CraftingResult<Vec<JournalRecord>> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CraftingError::Journal(format!("Failed to open journal: {e}"))),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();

    loop {
        let mut header = [0u8; HEADER_LEN];
        if reader.read_exact(&mut header).is_err() {
            break;
        }
        let lsn = u64::from_le_bytes(header[0..8].try_into().unwrap_or_default());
        let kind = header[8];
        let len = u32::from_le_bytes(header[9..13].try_into().unwrap_or_default()) as usize;
        if len != PAYLOAD_LEN {
            tracing::warn!(lsn, len, "journal record has bad length, stopping replay");
            break;
        }

        let mut payload = [0u8; PAYLOAD_LEN];
        let mut crc_bytes = [0u8; 4];
        if reader.read_exact(&mut payload).is_err() || reader.read_exact(&mut crc_bytes).is_err() {
            tracing::warn!(lsn, "journal ends in a torn record");
            break;
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&payload);
        if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
            tracing::warn!(lsn, "journal CRC mismatch, stopping replay");
            break;
        }

        let Some(op) = JournalOpKind::from_u8(kind).and_then(|k| JournalOp::decode(k, &payload))
        else {
            tracing::warn!(lsn, kind, "undecodable journal record skipped");
            continue;
        };
        records.push(JournalRecord { lsn, op });
    }

    Ok(records)
}

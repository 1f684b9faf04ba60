// Heap - slot map, commit path, checkpointing and recovery

use crate::image::PoolImage;
use crate::tx::{HeapTx, Staged};
use crate::{slot_cost, Addr, MAX_SLOT_SIZE, NULL_ADDR, POOL_FILE, WAL_DIR};
use poolkv_core::{Config, Error, Result};
use poolkv_wal::{RecordPayload, WalConfig, WalManager, WalRecord};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Heap usage figures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Capacity in bytes, `None` for a grow-on-demand pool
    pub capacity: Option<u64>,
    /// Bytes charged against capacity by live slots
    pub used: u64,
    /// Number of live slots
    pub slots: usize,
    /// WAL bytes written since the last checkpoint
    pub wal_bytes: u64,
    /// Id of the last committed transaction
    pub last_tx_id: u64,
}

/// In-memory view of the committed heap
struct HeapState {
    slots: HashMap<Addr, Arc<[u8]>>,
    root: Addr,
    used: u64,
    capacity: Option<u64>,
    last_tx_id: u64,
}

impl HeapState {
    fn from_image(image: PoolImage) -> Self {
        let mut state = Self {
            slots: HashMap::with_capacity(image.slots.len()),
            root: image.root,
            used: 0,
            capacity: image.capacity,
            last_tx_id: image.last_tx_id,
        };
        for (addr, data) in image.slots {
            state.store(addr, Arc::from(data));
        }
        state
    }

    fn to_image(&self, next_addr: Addr) -> PoolImage {
        let mut slots: Vec<(Addr, Vec<u8>)> = self
            .slots
            .iter()
            .map(|(addr, data)| (*addr, data.to_vec()))
            .collect();
        slots.sort_unstable_by_key(|(addr, _)| *addr);

        PoolImage {
            last_tx_id: self.last_tx_id,
            next_addr,
            root: self.root,
            capacity: self.capacity,
            slots,
        }
    }

    fn store(&mut self, addr: Addr, data: Arc<[u8]>) {
        self.used += slot_cost(data.len());
        if let Some(old) = self.slots.insert(addr, data) {
            self.used -= slot_cost(old.len());
        }
    }

    fn free(&mut self, addr: Addr) {
        if let Some(old) = self.slots.remove(&addr) {
            self.used -= slot_cost(old.len());
        }
    }

    /// Usage after `staged` would be applied
    fn projected_usage(&self, staged: &Staged) -> u64 {
        let mut added = 0u64;
        let mut removed = 0u64;

        for (addr, data) in &staged.stores {
            added += slot_cost(data.len());
            if let Some(old) = self.slots.get(addr) {
                removed += slot_cost(old.len());
            }
        }
        for addr in &staged.frees {
            if let Some(old) = self.slots.get(addr) {
                removed += slot_cost(old.len());
            }
        }

        (self.used + added).saturating_sub(removed)
    }

    fn replay(&mut self, records: Vec<WalRecord>) {
        for record in records {
            match record.payload {
                RecordPayload::Store { addr, data } => self.store(addr, Arc::from(data)),
                RecordPayload::Free { addr } => self.free(addr),
                RecordPayload::SetRoot { addr } => self.root = addr,
                _ => {}
            }
        }
    }

    fn max_addr(&self) -> Addr {
        self.slots.keys().copied().max().unwrap_or(NULL_ADDR)
    }
}

/// Transactional slot heap persisted in a pool directory
pub struct Heap {
    dir: PathBuf,
    checkpoint_bytes: u64,
    state: RwLock<HeapState>,
    /// Serializes commits and checkpoints
    wal: Mutex<WalManager>,
    next_addr: AtomicU64,
    closed: AtomicBool,
}

impl Heap {
    /// Open the pool at `config.path`, creating it if absent.
    ///
    /// Reopening recovers the last checkpoint image plus every committed
    /// transaction in the log. A configured `size` must match the capacity
    /// the pool was created with.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        let dir = config.path.clone();
        if dir.exists() && !dir.is_dir() {
            return Err(Error::Pool(format!(
                "Pool path {:?} exists and is not a directory",
                dir
            )));
        }
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Pool(format!("Failed to create pool directory {:?}: {}", dir, e)))?;

        let image_path = dir.join(POOL_FILE);
        let mut wal = WalManager::new(WalConfig {
            sync_mode: config.sync_mode,
            wal_dir: dir.join(WAL_DIR),
            ..WalConfig::default()
        })?;

        let (image, created) = match PoolImage::load(&image_path)? {
            Some(image) => {
                Self::check_capacity(config.size, image.capacity)?;
                (image, false)
            }
            None => {
                if wal.size_bytes()? > 0 {
                    return Err(Error::Pool(format!(
                        "Pool {:?} has a write-ahead log but no image",
                        dir
                    )));
                }
                let image = PoolImage {
                    next_addr: NULL_ADDR + 1,
                    capacity: config.size,
                    ..PoolImage::default()
                };
                image.write_atomic(&image_path)?;
                (image, true)
            }
        };

        let image_next_addr = image.next_addr;
        let mut state = HeapState::from_image(image);

        let committed = wal.recover_after(state.last_tx_id)?;
        let replayed = committed.len();
        for tx in committed {
            state.replay(tx.records);
            state.last_tx_id = tx.tx_id;
        }

        let next_addr = image_next_addr.max(state.max_addr() + 1);

        // Fold whatever the log held into a fresh image so appends never
        // follow a damaged tail
        if wal.size_bytes()? > 0 {
            state.to_image(next_addr).write_atomic(&image_path)?;
            wal.reset()?;
        }
        wal.open()?;

        tracing::info!(
            path = %dir.display(),
            created,
            replayed,
            slots = state.slots.len(),
            used = state.used,
            capacity = ?state.capacity,
            "opened pool"
        );

        Ok(Self {
            dir,
            checkpoint_bytes: config.checkpoint_bytes,
            state: RwLock::new(state),
            wal: Mutex::new(wal),
            next_addr: AtomicU64::new(next_addr),
            closed: AtomicBool::new(false),
        })
    }

    fn check_capacity(configured: Option<u64>, stored: Option<u64>) -> Result<()> {
        match configured {
            Some(size) if stored != Some(size) => Err(Error::Pool(format!(
                "Size mismatch on reopen: pool capacity is {}, configured size is {}",
                stored.map_or_else(|| "unbounded".to_string(), |c| c.to_string()),
                size
            ))),
            _ => Ok(()),
        }
    }

    /// Start a transaction
    pub fn begin(&self) -> HeapTx<'_> {
        HeapTx::new(self)
    }

    /// Read a committed slot
    pub fn read(&self, addr: Addr) -> Result<Option<Arc<[u8]>>> {
        self.ensure_open()?;
        if addr == NULL_ADDR {
            return Ok(None);
        }
        let state = self.state.read().map_err(|_| Error::LockPoisoned)?;
        Ok(state.slots.get(&addr).cloned())
    }

    /// Returns true if `addr` is a live committed slot
    pub fn contains(&self, addr: Addr) -> Result<bool> {
        let state = self.state.read().map_err(|_| Error::LockPoisoned)?;
        Ok(state.slots.contains_key(&addr))
    }

    /// Committed root handle, [`NULL_ADDR`] in a fresh pool
    pub fn root(&self) -> Result<Addr> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| Error::LockPoisoned)?;
        Ok(state.root)
    }

    /// Pool capacity, `None` for grow-on-demand
    pub fn capacity(&self) -> Result<Option<u64>> {
        let state = self.state.read().map_err(|_| Error::LockPoisoned)?;
        Ok(state.capacity)
    }

    /// Pool directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Current usage figures
    pub fn stats(&self) -> Result<HeapStats> {
        let wal = self.wal.lock().map_err(|_| Error::LockPoisoned)?;
        let state = self.state.read().map_err(|_| Error::LockPoisoned)?;
        Ok(HeapStats {
            capacity: state.capacity,
            used: state.used,
            slots: state.slots.len(),
            wal_bytes: wal.bytes_written(),
            last_tx_id: state.last_tx_id,
        })
    }

    pub(crate) fn next_addr(&self) -> Addr {
        self.next_addr.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Log and apply a staged transaction.
    ///
    /// Nothing is applied when a slot exceeds [`MAX_SLOT_SIZE`], or when the
    /// capacity check or the log append fails.
    pub(crate) fn commit(&self, staged: Staged) -> Result<()> {
        let mut wal = self.wal.lock().map_err(|_| Error::LockPoisoned)?;
        self.ensure_open()?;

        let oversized = staged.stores.iter().find(|(_, data)| data.len() > MAX_SLOT_SIZE);
        if let Some((addr, data)) = oversized {
            return Err(Error::Storage(format!(
                "Slot {} of {} bytes exceeds the {} byte slot limit",
                addr,
                data.len(),
                MAX_SLOT_SIZE
            )));
        }

        let tx_id = {
            let state = self.state.read().map_err(|_| Error::LockPoisoned)?;
            let projected = state.projected_usage(&staged);
            if let Some(capacity) = state.capacity {
                if projected > capacity {
                    return Err(Error::OutOfSpace {
                        requested: projected,
                        available: capacity,
                    });
                }
            }
            state.last_tx_id + 1
        };

        let mut records =
            Vec::with_capacity(staged.stores.len() + staged.frees.len() + 1);
        for (addr, data) in &staged.stores {
            records.push(WalRecord::store(*addr, data.to_vec()));
        }
        for addr in &staged.frees {
            records.push(WalRecord::free(*addr));
        }
        if let Some(root) = staged.root {
            records.push(WalRecord::set_root(root));
        }

        if let Err(e) = wal.append_transaction(tx_id, records) {
            tracing::error!(tx_id, error = %e, "WAL append failed, rewriting pool image");
            // A partial batch must not stay in front of later commits
            if let Err(checkpoint_err) = self.checkpoint_locked(&mut wal) {
                tracing::error!(error = %checkpoint_err, "checkpoint after failed append failed");
            }
            return Err(e);
        }

        let (stores, frees) = (staged.stores.len(), staged.frees.len());
        {
            let mut state = self.state.write().map_err(|_| Error::LockPoisoned)?;
            for (addr, data) in staged.stores {
                state.store(addr, data);
            }
            for addr in staged.frees {
                state.free(addr);
            }
            if let Some(root) = staged.root {
                state.root = root;
            }
            state.last_tx_id = tx_id;
        }

        tracing::debug!(tx_id, stores, frees, "committed heap transaction");

        if wal.bytes_written() > self.checkpoint_bytes {
            // The commit itself is already durable in the log
            if let Err(e) = self.checkpoint_locked(&mut wal) {
                tracing::warn!(error = %e, "background checkpoint failed");
            }
        }

        Ok(())
    }

    /// Write the slot map to the pool image and truncate the log
    pub fn checkpoint(&self) -> Result<()> {
        let mut wal = self.wal.lock().map_err(|_| Error::LockPoisoned)?;
        self.ensure_open()?;
        self.checkpoint_locked(&mut wal)
    }

    fn checkpoint_locked(&self, wal: &mut WalManager) -> Result<()> {
        let image = {
            let state = self.state.read().map_err(|_| Error::LockPoisoned)?;
            state.to_image(self.next_addr.load(Ordering::Relaxed))
        };
        let (last_tx_id, slots) = (image.last_tx_id, image.slots.len());

        image.write_atomic(&self.dir.join(POOL_FILE))?;
        wal.reset()?;

        tracing::info!(last_tx_id, slots, "checkpointed pool");
        Ok(())
    }

    /// Checkpoint and release the log. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut wal = self.wal.lock().map_err(|_| Error::LockPoisoned)?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.checkpoint_locked(&mut wal);
        wal.close()?;

        tracing::info!(path = %self.dir.display(), "closed pool");
        result
    }

    /// Returns true once [`Heap::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolkv_core::{ErrorKind, MIN_POOL_SIZE};
    use tempfile::{tempdir, TempDir};

    fn config(dir: &TempDir) -> Config {
        Config::new(dir.path().join("pool"))
    }

    fn put_root(heap: &Heap, data: &[u8]) -> Addr {
        let mut tx = heap.begin();
        let addr = tx.allocate(data.to_vec());
        tx.set_root(addr);
        tx.commit().unwrap();
        addr
    }

    #[test]
    fn test_create_layout() {
        let dir = tempdir().unwrap();
        let heap = Heap::open(&config(&dir)).unwrap();

        assert!(dir.path().join("pool").join(POOL_FILE).exists());
        assert!(dir.path().join("pool").join(WAL_DIR).is_dir());
        assert_eq!(heap.root().unwrap(), NULL_ADDR);
        assert_eq!(heap.capacity().unwrap(), None);
    }

    #[test]
    fn test_file_at_path_is_pool_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool");
        fs::write(&path, b"not a pool").unwrap();

        let err = Heap::open(&Config::new(path)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Pool);
    }

    #[test]
    fn test_reopen_after_close() {
        let dir = tempdir().unwrap();
        let addr = {
            let heap = Heap::open(&config(&dir)).unwrap();
            let addr = put_root(&heap, b"persisted");
            heap.close().unwrap();
            addr
        };

        let heap = Heap::open(&config(&dir)).unwrap();
        assert_eq!(heap.root().unwrap(), addr);
        assert_eq!(heap.read(addr).unwrap().as_deref(), Some(&b"persisted"[..]));
    }

    #[test]
    fn test_replay_without_close() {
        let dir = tempdir().unwrap();
        let addr = {
            let heap = Heap::open(&config(&dir)).unwrap();
            let addr = put_root(&heap, b"from the log");
            // No close: the image is still empty, the WAL holds the commit
            std::mem::forget(heap);
            addr
        };

        let heap = Heap::open(&config(&dir)).unwrap();
        assert_eq!(heap.read(addr).unwrap().as_deref(), Some(&b"from the log"[..]));
        assert_eq!(heap.stats().unwrap().last_tx_id, 1);

        // New allocations never collide with replayed ones
        let mut tx = heap.begin();
        assert!(tx.allocate(b"x".to_vec()) > addr);
    }

    #[test]
    fn test_uncommitted_tail_dropped() {
        let dir = tempdir().unwrap();
        {
            let heap = Heap::open(&config(&dir)).unwrap();
            put_root(&heap, b"kept");
            std::mem::forget(heap);
        }

        // A crash between BEGIN and COMMIT
        {
            let wal_dir = dir.path().join("pool").join(WAL_DIR);
            let mut wal = WalManager::new(WalConfig {
                wal_dir,
                ..WalConfig::default()
            })
            .unwrap();
            wal.open().unwrap();
            wal.append(WalRecord::begin_tx(2)).unwrap();
            wal.append(WalRecord::set_root(NULL_ADDR)).unwrap();
            wal.close().unwrap();
        }

        let heap = Heap::open(&config(&dir)).unwrap();
        let root = heap.root().unwrap();
        assert_eq!(heap.read(root).unwrap().as_deref(), Some(&b"kept"[..]));
        assert_eq!(heap.stats().unwrap().last_tx_id, 1);
    }

    #[test]
    fn test_out_of_space_applies_nothing() {
        let dir = tempdir().unwrap();
        let heap = Heap::open(&config(&dir).with_size(MIN_POOL_SIZE)).unwrap();

        put_root(&heap, &[1u8; 1000]);
        let before = heap.stats().unwrap();

        let mut tx = heap.begin();
        tx.allocate(vec![2u8; 4000]);
        let err = tx.commit().unwrap_err();
        assert!(err.is_recoverable());
        match err {
            Error::OutOfSpace {
                requested,
                available,
            } => {
                assert_eq!(available, MIN_POOL_SIZE);
                assert!(requested > available);
            }
            other => panic!("expected OutOfSpace, got {:?}", other),
        }

        let after = heap.stats().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_freeing_makes_room() {
        let dir = tempdir().unwrap();
        let heap = Heap::open(&config(&dir).with_size(MIN_POOL_SIZE)).unwrap();

        let big = put_root(&heap, &[1u8; 3000]);

        let mut tx = heap.begin();
        tx.allocate(vec![2u8; 3000]);
        assert!(tx.commit().is_err());

        let mut tx = heap.begin();
        tx.free(big).unwrap();
        let replacement = tx.allocate(vec![2u8; 3000]);
        tx.set_root(replacement);
        tx.commit().unwrap();

        assert_eq!(heap.stats().unwrap().slots, 1);
    }

    #[test]
    fn test_oversized_slot_is_refused() {
        let dir = tempdir().unwrap();
        let heap = Heap::open(&config(&dir)).unwrap();
        let kept = put_root(&heap, b"kept");

        let mut tx = heap.begin();
        let small = tx.allocate(b"small".to_vec());
        tx.allocate(vec![0u8; MAX_SLOT_SIZE + 1]);
        tx.set_root(small);
        let err = tx.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        // Nothing from the refused transaction was applied or logged
        assert_eq!(heap.root().unwrap(), kept);
        assert_eq!(heap.read(small).unwrap(), None);
        assert_eq!(heap.stats().unwrap().last_tx_id, 1);
        drop(heap);

        let heap = Heap::open(&config(&dir)).unwrap();
        assert_eq!(heap.root().unwrap(), kept);
        assert_eq!(heap.stats().unwrap().slots, 1);
    }

    #[test]
    fn test_size_mismatch_on_reopen() {
        let dir = tempdir().unwrap();
        Heap::open(&config(&dir).with_size(1 << 20))
            .unwrap()
            .close()
            .unwrap();

        let err = Heap::open(&config(&dir).with_size(2 << 20)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Pool);

        // Omitting the size keeps the stored capacity
        let heap = Heap::open(&config(&dir)).unwrap();
        assert_eq!(heap.capacity().unwrap(), Some(1 << 20));
    }

    #[test]
    fn test_checkpoint_truncates_log() {
        let dir = tempdir().unwrap();
        let heap = Heap::open(&config(&dir).with_checkpoint_bytes(512)).unwrap();

        for i in 0..20u8 {
            put_root(&heap, &[i; 64]);
        }

        let stats = heap.stats().unwrap();
        assert!(stats.wal_bytes <= 512 + 200);
        assert_eq!(stats.last_tx_id, 20);

        heap.checkpoint().unwrap();
        assert_eq!(heap.stats().unwrap().wal_bytes, 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let heap = Heap::open(&config(&dir)).unwrap();
        heap.close().unwrap();
        heap.close().unwrap();

        assert!(heap.is_closed());
        assert!(matches!(heap.root(), Err(Error::Closed)));

        let mut tx = heap.begin();
        tx.set_root(NULL_ADDR);
        assert!(matches!(tx.commit(), Err(Error::Closed)));
    }

    #[test]
    fn test_used_accounting() {
        let dir = tempdir().unwrap();
        let heap = Heap::open(&config(&dir)).unwrap();

        let addr = put_root(&heap, &[0u8; 100]);
        assert_eq!(heap.stats().unwrap().used, slot_cost(100));

        let mut tx = heap.begin();
        tx.write(addr, vec![0u8; 10]).unwrap();
        tx.commit().unwrap();
        assert_eq!(heap.stats().unwrap().used, slot_cost(10));

        let mut tx = heap.begin();
        tx.free(addr).unwrap();
        tx.set_root(NULL_ADDR);
        tx.commit().unwrap();
        assert_eq!(heap.stats().unwrap().used, 0);
    }
}

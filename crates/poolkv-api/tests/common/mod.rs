// Common test utilities for engine integration tests

use poolkv::{Config, Engine};
use std::path::PathBuf;
use tempfile::TempDir;

/// Temporary directory holding one pool
pub struct PoolFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub pool_path: PathBuf,
}

impl PoolFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool_path = temp_dir.path().join("pool");
        Self {
            temp_dir,
            pool_path,
        }
    }

    pub fn config(&self) -> Config {
        Config::new(&self.pool_path)
    }

    /// Open the tree backend over this fixture's pool
    pub fn open_tree(&self) -> Engine {
        Engine::open("tree", self.config()).expect("Failed to open tree engine")
    }

    /// Reopen after a simulated crash: the previous engine is leaked so no
    /// close or checkpoint runs
    #[allow(dead_code)]
    pub fn crash_and_reopen(&self, engine: Engine) -> Engine {
        std::mem::forget(engine);
        self.open_tree()
    }
}

impl Default for PoolFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Every `(key, value)` pair in traversal order
#[allow(dead_code)]
pub fn entries(engine: &Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    engine
        .each(|key, value| out.push((key.to_vec(), value.to_vec())))
        .expect("traversal failed");
    out
}

/// Every key in traversal order
#[allow(dead_code)]
pub fn keys(engine: &Engine) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    engine
        .all(|key| out.push(key.to_vec()))
        .expect("traversal failed");
    out
}

//! Shows the engine's tracing output: pool creation, recovery, commits and
//! checkpoints.
//!
//! Run with: cargo run -p poolkv --example logging_demo
//! (set RUST_LOG=poolkv_heap=debug to see every commit)

use poolkv::logging::LogConfig;
use poolkv::{Config, Engine};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = LogConfig::debug().init()?;

    let dir = std::env::temp_dir().join("poolkv-logging-demo");
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }

    println!("=== PoolKV Logging Demo ===\n");

    // A small checkpoint threshold makes checkpoints show up quickly
    let config = Config::new(&dir).with_checkpoint_bytes(4096);
    let engine = Engine::open("tree", config.clone())?;

    println!("\n1. Writing...");
    for i in 0..50u32 {
        engine.put(format!("key:{}", i).as_bytes(), &[0u8; 100])?;
    }

    println!("\n2. Removing...");
    engine.remove(b"key:7")?;

    println!("\n3. Closing and reopening...");
    engine.close()?;
    let engine = Engine::open("tree", config)?;
    println!("   {} entries after reopen", engine.count()?);

    engine.close()?;
    std::fs::remove_dir_all(&dir)?;
    println!("\n=== Demo Complete ===");
    Ok(())
}

//! Demonstrates traversal: full scans, pattern filters, ranges and early
//! stop.
//!
//! Run with: cargo run -p poolkv --example iteration_demo

use poolkv::{Config, Engine, Visit};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::temp_dir().join("poolkv-iteration-demo");
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    let engine = Engine::open("tree", Config::new(&dir))?;

    for i in 0..100u32 {
        engine.put(format!("order:{:03}", i).as_bytes(), format!("{}", i * 10).as_bytes())?;
    }
    engine.put(b"customer:alice", b"gold")?;
    engine.put(b"customer:bob", b"silver")?;

    println!("=== Customers (pattern) ===");
    engine.each_like("customer:.*", |key, value| {
        println!(
            "   {} -> {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    })?;

    println!("\n=== Orders 010..015 (exclusive range) ===");
    engine.each_between(b"order:010", b"order:015", |key, value| {
        println!(
            "   {} -> {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    })?;
    println!(
        "   {} orders above order:090",
        engine.count_above(b"order:090")?
    );

    println!("\n=== First three keys (early stop) ===");
    let mut shown = 0;
    engine.all(|key| {
        println!("   {}", String::from_utf8_lossy(key));
        shown += 1;
        if shown == 3 {
            Visit::Stop
        } else {
            Visit::Continue
        }
    })?;

    engine.close()?;
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

//! Demonstrates that PoolKV writes survive closing and reopening a pool.
//!
//! Run with: cargo run -p poolkv --example persistent_demo

use poolkv::{Config, Engine};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let pool_path = "./demo_pool";

    println!("=== PoolKV Persistent Pool Demo ===\n");

    if Path::new(pool_path).exists() {
        std::fs::remove_dir_all(pool_path)?;
        println!("Cleaned up previous demo pool\n");
    }

    let config = Config::new(pool_path).with_size(16 * 1024 * 1024);

    println!("PART 1: Writing to a fresh pool...");
    {
        let engine = Engine::open("tree", config.clone())?;

        engine.put(b"user:1:name", b"Alice")?;
        engine.put(b"user:1:email", b"alice@example.com")?;
        engine.put(b"user:2:name", b"Bob")?;
        engine.put(b"user:2:email", b"bob@example.com")?;
        engine.put(b"stats:total_users", b"2")?;

        println!("   Stored {} entries in {}", engine.count()?, pool_path);
        engine.close()?;
    }
    println!("   Pool closed\n");

    println!("PART 2: Reopening and reading back...");
    {
        let engine = Engine::open("tree", config.clone())?;

        for id in 1..=2 {
            let name = engine.get(format!("user:{}:name", id).as_bytes())?;
            let email = engine.get(format!("user:{}:email", id).as_bytes())?;
            if let (Some(name), Some(email)) = (name, email) {
                println!(
                    "   User {}: {} <{}>",
                    id,
                    name.to_string_lossy(),
                    email.to_string_lossy()
                );
            }
        }

        println!("\nPART 3: Modifying...");
        engine.put(b"user:3:name", b"Charlie")?;
        engine.put(b"stats:total_users", b"3")?;
        engine.remove(b"user:2:email")?;
        println!("   Added Charlie, removed Bob's email");
    }
    // Dropping the engine closes the pool

    println!("\nPART 4: Final state...");
    {
        let engine = Engine::open("tree", config)?;
        engine.each(|key, value| {
            println!(
                "   {} = {}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(value)
            );
        })?;
    }

    std::fs::remove_dir_all(pool_path)?;
    println!("\n=== Demo Complete ===");
    Ok(())
}

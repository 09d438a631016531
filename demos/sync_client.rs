use shardcache_client::{Client, Result};
use std::env;

/// Synchronous shardcache client example
///
/// This example demonstrates basic operations using the synchronous client:
/// - Configuring a server pool
/// - Storing values with set/add/replace
/// - Getting values by key
/// - Sharding behavior
/// - Error handling

fn main() -> Result<()> {
    env_logger::init();

    // Comma-separated server list from the environment or a default
    let servers: Vec<String> = env::var("SHARDCACHE_SERVERS")
        .unwrap_or_else(|_| "127.0.0.1:11211".to_string())
        .split(',')
        .map(str::to_string)
        .collect();

    println!("Shardcache Synchronous Client Example");
    println!("=====================================");
    println!("Servers: {}", servers.join(", "));

    let mut client = Client::connect(&servers)?;
    println!("✓ Pool configured ({} shards)", client.servers().len());

    // Example 1: Unconditional stores
    println!("\n1. Storing values:");
    client.set("hello", b"world")?;
    println!("   set hello = world");

    client.set("status", b"operational")?;
    println!("   set status = operational");

    // Example 2: Reading them back
    println!("\n2. Getting values:");
    match client.get("hello")? {
        Some(value) => println!("   get hello -> {}", String::from_utf8_lossy(&value)),
        None => println!("   get hello -> (miss)"),
    }

    // Example 3: Misses are not errors
    println!("\n3. Handling missing keys:");
    match client.get("nonexistent")? {
        Some(value) => println!("   get nonexistent -> {} (unexpected!)", value.len()),
        None => println!("   get nonexistent -> miss (expected)"),
    }

    // Example 4: Conditional stores
    println!("\n4. Conditional stores:");
    let added = client.add("hello", b"again")?;
    println!("   add hello -> {} (key already exists)", added);

    let replaced = client.replace("brand-new", b"value")?;
    println!("   replace brand-new -> {} (key is absent)", replaced);

    // Example 5: Flags and expiration
    println!("\n5. Flags and expiration:");
    client.set_with("session:42", b"opaque-token", 7, 300)?;
    if let Some((flags, value)) = client.get_with_flags("session:42")? {
        println!(
            "   get session:42 -> {} bytes, flags {}",
            value.len(),
            flags
        );
    }

    // Example 6: Binary payloads pass through untouched
    println!("\n6. Binary payloads:");
    let blob: Vec<u8> = (0u16..=255).map(|b| b as u8).collect();
    client.set("blob", &blob)?;
    match client.get("blob")? {
        Some(value) => println!("   get blob -> {} bytes round-tripped", value.len()),
        None => println!("   get blob -> (miss)"),
    }

    // Example 7: Sharding is deterministic
    println!("\n7. Shard inspection:");
    for key in ["alpha", "beta", "gamma"] {
        println!("   '{}' lives on shard {}", key, client.shard_for(key)?);
    }

    // Example 8: Custom hash function
    println!("\n8. Custom sharding:");
    client.set_hash_fn(|key, nservers| Ok(key.len() % nservers));
    println!("   'alpha' now lives on shard {}", client.shard_for("alpha")?);

    // Example 9: Parameter validation
    println!("\n9. Error handling:");
    match client.get("") {
        Ok(_) => println!("   get '' -> unexpected success"),
        Err(e) => println!("   get '' -> {} (expected error)", e),
    }

    client.disconnect();
    println!("\n✓ Synchronous client example completed successfully!");

    Ok(())
}

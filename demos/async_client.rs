use shardcache_client::{AsyncClient, Result};
use std::env;
use std::sync::Arc;

/// Asynchronous shardcache client example
///
/// This example demonstrates:
/// - Basic async operations
/// - Concurrent operations from multiple tasks sharing one client
/// - Error handling

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let servers: Vec<String> = env::var("SHARDCACHE_SERVERS")
        .unwrap_or_else(|_| "127.0.0.1:11211".to_string())
        .split(',')
        .map(str::to_string)
        .collect();

    println!("Shardcache Asynchronous Client Example");
    println!("======================================");
    println!("Servers: {}", servers.join(", "));

    let client = AsyncClient::connect(&servers)?;

    // Example 1: Basic operations
    println!("\n1. Basic operations:");
    client.set("async_hello", b"async_world").await?;
    println!("   set async_hello = async_world");

    match client.get("async_hello").await? {
        Some(value) => println!("   get async_hello -> {}", String::from_utf8_lossy(&value)),
        None => println!("   get async_hello -> (miss)"),
    }

    let added = client.add("async_hello", b"other").await?;
    println!("   add async_hello -> {} (key already exists)", added);

    // Example 2: Concurrent tasks sharing the client
    println!("\n2. Concurrent operations:");
    let shared = Arc::new(client);
    let mut handles = Vec::new();
    for i in 0..8 {
        let client = Arc::clone(&shared);
        handles.push(tokio::spawn(async move {
            let key = format!("task:{i}");
            let value = format!("payload for task {i}");
            client.set(&key, value.as_bytes()).await?;
            client.get(&key).await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await.expect("task panicked")? {
            Some(value) => println!("   task:{} -> {} bytes", i, value.len()),
            None => println!("   task:{} -> (miss)", i),
        }
    }

    // Example 3: Misses are not errors
    println!("\n3. Missing keys:");
    match shared.get("nonexistent").await? {
        Some(_) => println!("   get nonexistent -> unexpected hit"),
        None => println!("   get nonexistent -> miss (expected)"),
    }

    shared.disconnect().await;
    println!("\n✓ Asynchronous client example completed successfully!");

    Ok(())
}

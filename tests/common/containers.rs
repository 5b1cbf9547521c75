// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up Redis containers for integration tests.

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// Plain multiplexed connection for poking at the server directly.
pub async fn raw_connection(url: &str) -> redis::aio::MultiplexedConnection {
    let client = redis::Client::open(url).unwrap();
    client.get_multiplexed_async_connection().await.unwrap()
}

/// Kill every normal client connection except the caller's own.
pub async fn kill_clients(url: &str) -> redis::RedisResult<i64> {
    let mut conn = raw_connection(url).await;
    redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("normal")
        .arg("SKIPME")
        .arg("yes")
        .query_async(&mut conn)
        .await
}

/// Pending entry count of `group` on `stream` (XPENDING summary).
pub async fn pending_count(url: &str, stream: &str, group: &str) -> redis::RedisResult<usize> {
    let mut conn = raw_connection(url).await;
    let reply: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
        .arg(stream)
        .arg(group)
        .query_async(&mut conn)
        .await?;
    Ok(reply.count())
}

/// Stream length (XLEN).
pub async fn stream_len(url: &str, stream: &str) -> redis::RedisResult<usize> {
    use redis::AsyncCommands;
    let mut conn = raw_connection(url).await;
    conn.xlen(stream).await
}

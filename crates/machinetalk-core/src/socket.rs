//! Centralized ZeroMQ socket configuration.
//!
//! All socket setup goes through these helpers so fixing an option here
//! fixes it for every endpoint. Unlike the async `tmq`-wrapped sockets used
//! elsewhere in this codebase's lineage, endpoints here poll their sockets
//! synchronously from a dedicated OS thread (spec.md §5), so we talk to the
//! plain `zmq` crate directly instead of going through `tmq`.

use std::time::Duration;

use anyhow::{Context, Result};

/// Reconnect interval in milliseconds.
pub const DEFAULT_RECONNECT_IVL_MS: i32 = 1000;

/// Maximum reconnect interval in milliseconds. Caps exponential backoff so
/// a long-gone peer doesn't push reconnection attempts out to hours.
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 60_000;

/// Bounded poll timeout the I/O worker uses on every wake (spec.md §5).
pub const POLL_TIMEOUT: Duration = Duration::from_millis(200);

fn configure_common(socket: &zmq::Socket) -> Result<()> {
    socket.set_linger(0).context("set LINGER")?;
    socket
        .set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)
        .context("set RECONNECT_IVL")?;
    socket
        .set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)
        .context("set RECONNECT_IVL_MAX")?;
    Ok(())
}

/// Create a SUB socket and connect it to `endpoint`. Subscriptions are
/// managed separately via `subscribe`/`unsubscribe` — a fresh socket starts
/// with no subscriptions at all.
pub fn create_subscriber(ctx: &zmq::Context, endpoint: &str) -> Result<zmq::Socket> {
    let socket = ctx.socket(zmq::SUB).context("create SUB socket")?;
    configure_common(&socket)?;
    socket
        .connect(endpoint)
        .with_context(|| format!("connect SUB to {endpoint}"))?;
    Ok(socket)
}

/// Create a DEALER socket stamped with `identity` and connect it to
/// `endpoint`.
pub fn create_dealer(ctx: &zmq::Context, endpoint: &str, identity: &[u8]) -> Result<zmq::Socket> {
    let socket = ctx.socket(zmq::DEALER).context("create DEALER socket")?;
    configure_common(&socket)?;
    socket.set_identity(identity).context("set IDENTITY")?;
    socket
        .connect(endpoint)
        .with_context(|| format!("connect DEALER to {endpoint}"))?;
    Ok(socket)
}

pub fn subscribe(socket: &zmq::Socket, topic: &str) -> Result<()> {
    socket
        .set_subscribe(topic.as_bytes())
        .with_context(|| format!("subscribe to {topic}"))
}

pub fn unsubscribe(socket: &zmq::Socket, topic: &str) -> Result<()> {
    socket
        .set_unsubscribe(topic.as_bytes())
        .with_context(|| format!("unsubscribe from {topic}"))
}

/// Generate a unique dealer identity: hostname concatenated with a fresh
/// UUID, as spec.md §3/§4.2 requires.
pub fn unique_identity() -> String {
    let host = hostname();
    format!("{host}-{}", uuid::Uuid::new_v4())
}

fn hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown-host".to_string())
}

/// Poll a single socket for up to `timeout`, returning whether it's
/// readable. Mirrors `zmq.Poller().poll(200)` in the original socket
/// worker loop.
pub fn poll_readable(socket: &zmq::Socket, timeout: Duration) -> Result<bool> {
    let mut items = [socket.as_poll_item(zmq::POLLIN)];
    let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
    let n = zmq::poll(&mut items, millis).context("poll socket")?;
    Ok(n > 0 && items[0].is_readable())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_unique_per_call() {
        let a = unique_identity();
        let b = unique_identity();
        assert_ne!(a, b);
        assert!(a.contains('-'));
    }
}

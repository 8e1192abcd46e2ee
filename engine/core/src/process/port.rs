//! Port selection for spawned servers

use std::ops::RangeInclusive;

use tokio::net::TcpListener;
use tracing::debug;

use crate::error::GenerationError;

/// Ports tried before falling back to an OS-assigned one
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 8080..=8099;

/// Find a port on `host` that is free right now
///
/// Scans `range` in order and returns the first port that can be bound. If
/// every port is taken, asks the OS for an ephemeral one. The probe listener
/// is closed before returning, so another process may still win the race;
/// the health check catches that case.
///
/// # Errors
///
/// Returns [`GenerationError::Startup`] when not even an ephemeral port can
/// be bound (e.g. `host` is not a local address).
pub async fn pick_port(host: &str, range: RangeInclusive<u16>) -> Result<u16, GenerationError> {
    for port in range.clone() {
        if TcpListener::bind((host, port)).await.is_ok() {
            return Ok(port);
        }
    }

    debug!(host, start = range.start(), end = range.end(), "Port range exhausted, using an ephemeral port");
    let listener = TcpListener::bind((host, 0)).await.map_err(|e| {
        GenerationError::startup(format!("cannot bind any port on {host}: {e}"), "")
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| GenerationError::startup(format!("cannot read bound port: {e}"), ""))?
        .port();
    Ok(port)
}

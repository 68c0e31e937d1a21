//! Ephemeral port allocation.
//!
//! Ports are picked by binding `127.0.0.1:0` and immediately releasing the socket, so
//! a different process can still grab the port before the service binds it. That race
//! is tolerated by the harness (one retry); inside this process a port is never
//! handed out twice.

use std::collections::BTreeSet;
use std::net::TcpListener;

use parking_lot::Mutex;

use crate::error::HarnessError;

/// Loopback address every embedded service binds to.
pub const LOCALHOST: &str = "127.0.0.1";

const MAX_ALLOCATION_ATTEMPTS: usize = 32;

static HANDED_OUT: Mutex<BTreeSet<u16>> = Mutex::new(BTreeSet::new());

/// Returns an OS-assigned port that this process has not handed out before.
pub fn allocate_port() -> Result<u16, HarnessError> {
    let probe_addr = format!("{LOCALHOST}:0");
    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let listener =
            TcpListener::bind(&probe_addr).map_err(|e| HarnessError::from_bind_error(e, &probe_addr))?;
        let port = listener
            .local_addr()
            .map_err(|e| HarnessError::from_bind_error(e, &probe_addr))?
            .port();
        drop(listener);

        if HANDED_OUT.lock().insert(port) {
            return Ok(port);
        }
    }

    Err(HarnessError::PortBind {
        addr: probe_addr,
        reason: format!("no unused ephemeral port after {MAX_ALLOCATION_ATTEMPTS} attempts"),
    })
}

/// Records an explicitly chosen port so later allocations skip it.
pub fn reserve_port(port: u16) {
    HANDED_OUT.lock().insert(port);
}

pub fn is_handed_out(port: u16) -> bool {
    HANDED_OUT.lock().contains(&port)
}

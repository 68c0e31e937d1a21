//! Lifecycle bookkeeping for embedded services.
//!
//! Every embedded service owns a [`ServiceHandle`]: the state tag checked on entry of
//! each `start`/`stop`, the port it was assigned, and the scratch directory it must
//! remove when it stops.

use std::fmt;
use std::path::Path;

use crate::error::{HarnessError, ShutdownFailure};
use crate::scratch::ScratchDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Configuration resolved, nothing running.
    Created,
    /// Accepting connections.
    Started,
    /// Resources released. Terminal.
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Created => write!(f, "created"),
            ServiceState::Started => write!(f, "started"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug)]
pub struct ServiceHandle {
    name: &'static str,
    state: ServiceState,
    port: u16,
    scratch: Option<ScratchDir>,
}

impl ServiceHandle {
    pub fn new(name: &'static str, port: u16, scratch: Option<ScratchDir>) -> Self {
        Self {
            name,
            state: ServiceState::Created,
            port,
            scratch,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchDir::path)
    }

    /// Checks that the service may start. The caller must follow up with
    /// [`mark_started`](Self::mark_started) or [`mark_failed`](Self::mark_failed).
    pub fn begin_start(&self) -> Result<(), HarnessError> {
        self.check_transition(ServiceState::Created, ServiceState::Started)
    }

    pub fn mark_started(&mut self) {
        self.state = ServiceState::Started;
    }

    /// A failed start leaves the instance unusable; it moves straight to `Stopped`.
    pub fn mark_failed(&mut self) {
        self.state = ServiceState::Stopped;
    }

    /// Checks that the service may stop and moves it to `Stopped`.
    ///
    /// The state changes before any cleanup runs so a stop that fails halfway is
    /// never attempted twice.
    pub fn begin_stop(&mut self) -> Result<(), HarnessError> {
        self.check_transition(ServiceState::Started, ServiceState::Stopped)?;
        self.state = ServiceState::Stopped;
        Ok(())
    }

    /// Removes the owned scratch directory, if any.
    pub fn release_storage(&mut self) -> Result<(), ShutdownFailure> {
        match self.scratch.take() {
            Some(scratch) => scratch
                .remove()
                .map_err(|e| ShutdownFailure::new(self.name, "remove scratch directory", e)),
            None => Ok(()),
        }
    }

    fn check_transition(&self, expected: ServiceState, to: ServiceState) -> Result<(), HarnessError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HarnessError::InvalidTransition {
                service: self.name.to_string(),
                from: self.state,
                to,
            })
        }
    }
}

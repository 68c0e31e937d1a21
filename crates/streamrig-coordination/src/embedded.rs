//! The coordination service as an in-process, single-node ensemble.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::TcpListener as StdTcpListener;
use std::path::Path;
use std::sync::Arc;

use fs4::fs_std::FileExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use streamrig::ports::reserve_port;
use streamrig::{HarnessError, LOCALHOST, ScratchDir, ServiceHandle, ServiceState, ShutdownFailure};
use streamrig_proto::CoordinationGrpcServer;

use crate::server::CoordinationServer;
use crate::store::{StoreBackend, ZNodeStore};
use crate::{info, warn};

const SERVICE_NAME: &str = "coordination";
const DATA_DIR_PREFIX: &str = "zookeeper-embedded-data-";
const LOCK_FILE: &str = ".lock";

type ServeTask = JoinHandle<Result<(), tonic::transport::Error>>;

/// A coordination service bound to `127.0.0.1:<port>` with its own data directory.
///
/// The listener is bound by [`new`](Self::new), so a port conflict surfaces before
/// anything is started, and the port is connectable as soon as
/// [`start`](Self::start) returns.
#[derive(Debug)]
pub struct CoordinationServiceEmbedded {
    handle: ServiceHandle,
    listener: Option<StdTcpListener>,
    store: Arc<dyn ZNodeStore>,
    lock_file: Option<File>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: Option<ServeTask>,
}

impl CoordinationServiceEmbedded {
    /// Binds the listener and prepares a locked data directory. Port `0` picks an
    /// ephemeral port.
    pub fn new(port: u16) -> Result<Self, HarnessError> {
        let addr = format!("{LOCALHOST}:{port}");
        let listener = StdTcpListener::bind(&addr).map_err(|e| HarnessError::from_bind_error(e, &addr))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| HarnessError::from_bind_error(e, &addr))?;
        let port = listener
            .local_addr()
            .map_err(|e| HarnessError::from_bind_error(e, &addr))?
            .port();
        reserve_port(port);

        let scratch = ScratchDir::create(DATA_DIR_PREFIX)?;
        let lock_file = acquire_lock(scratch.path())?;
        let store = StoreBackend::new_file(scratch.path()).create()?;

        info!(
            "Prepared coordination service on {LOCALHOST}:{port} (data dir {})",
            scratch.path().display()
        );

        Ok(Self {
            handle: ServiceHandle::new(SERVICE_NAME, port, Some(scratch)),
            listener: Some(listener),
            store,
            lock_file: Some(lock_file),
            shutdown_tx: None,
            serve_task: None,
        })
    }

    /// Starts serving on the bound listener. Must be called inside a tokio runtime.
    #[instrument(skip_all, fields(port = self.handle.port()))]
    pub async fn start(&mut self) -> Result<(), HarnessError> {
        self.handle.begin_start()?;

        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => {
                self.handle.mark_failed();
                return Err(HarnessError::Unavailable {
                    service: SERVICE_NAME.to_string(),
                    reason: "listener already consumed".to_string(),
                });
            }
        };
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                self.handle.mark_failed();
                return Err(HarnessError::from_bind_error(e, &self.connect_string()));
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let service = CoordinationServer::new(Arc::clone(&self.store));
        let task = tokio::spawn(async move {
            Server::builder()
                .layer(TraceLayer::new_for_http())
                .add_service(CoordinationGrpcServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.serve_task = Some(task);
        self.handle.mark_started();
        info!("Coordination service listening on {}", self.connect_string());
        Ok(())
    }

    /// Stops serving, waits for the server task, then unlocks and deletes the data
    /// directory. Every failed step is reported; none stops the others.
    #[instrument(skip_all, fields(port = self.handle.port()))]
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        self.handle.begin_stop()?;
        let mut failures = Vec::new();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.serve_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(ShutdownFailure::new(SERVICE_NAME, "serve", e)),
                Err(e) => failures.push(ShutdownFailure::new(SERVICE_NAME, "join server task", e)),
            }
        }

        if let Some(lock_file) = self.lock_file.take() {
            if let Err(e) = FileExt::unlock(&lock_file) {
                failures.push(ShutdownFailure::new(SERVICE_NAME, "release data dir lock", e));
            }
        }

        if let Err(failure) = self.handle.release_storage() {
            failures.push(failure);
        }

        if failures.is_empty() {
            info!("Coordination service on port {} stopped", self.handle.port());
        } else {
            warn!(
                "Coordination service on port {} stopped with {} failure(s)",
                self.handle.port(),
                failures.len()
            );
        }
        HarnessError::from_shutdown_failures(failures)
    }

    /// `host:port` for clients.
    pub fn connect_string(&self) -> String {
        format!("{LOCALHOST}:{}", self.handle.port())
    }

    pub fn port(&self) -> u16 {
        self.handle.port()
    }

    pub fn state(&self) -> ServiceState {
        self.handle.state()
    }

    /// `None` once stopped.
    pub fn data_dir(&self) -> Option<&Path> {
        self.handle.scratch_path()
    }

    pub fn store(&self) -> Arc<dyn ZNodeStore> {
        Arc::clone(&self.store)
    }
}

impl Drop for CoordinationServiceEmbedded {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.serve_task.take() {
            task.abort();
        }
    }
}

fn acquire_lock(data_dir: &Path) -> Result<File, HarnessError> {
    let lock_path = data_dir.join(LOCK_FILE);
    let mut lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_path)
        .map_err(|e| HarnessError::from_io_error(e, "create data dir lock file"))?;

    match lock_file.try_lock_exclusive() {
        Ok(true) => {}
        Ok(false) => {
            return Err(HarnessError::Storage {
                context: "lock data dir".to_string(),
                reason: format!("{} is locked by another instance", data_dir.display()),
            });
        }
        Err(e) => return Err(HarnessError::from_io_error(e, "lock data dir")),
    }

    let lock_info = format!(
        "PID: {}\nTimestamp: {}\n",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    );
    lock_file
        .write_all(lock_info.as_bytes())
        .map_err(|e| HarnessError::from_io_error(e, "write lock metadata"))?;
    Ok(lock_file)
}

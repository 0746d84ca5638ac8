//! The observation socket: a Unix socket serving a JSON snapshot of every
//! port's synchronization state to whoever connects (the AVB media stack,
//! `gptpd-status`, monitoring).

use std::fs::Permissions;
use std::os::unix::prelude::PermissionsExt;
use std::path::Path;

use gptp::observability::{PortStats, TimeSyncReport};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What one port contributes to the observation snapshot
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PortObservation {
    #[serde(flatten)]
    pub report: TimeSyncReport,
    pub stats: PortStats,
}

#[derive(Debug, serde::Serialize)]
pub struct ObservableState {
    pub program: &'static str,
    pub version: &'static str,
    pub ports: Vec<PortObservation>,
}

pub async fn spawn(
    config: &super::config::ObservabilityConfig,
    ports: Vec<watch::Receiver<Option<PortObservation>>>,
) -> JoinHandle<std::io::Result<()>> {
    let config = config.clone();
    tokio::spawn(async move {
        let result = observer(config, ports).await;
        if let Err(ref e) = result {
            log::warn!("Abnormal termination of the state observer: {e}");
            log::warn!("The state observer will not be available");
        }
        result
    })
}

async fn observer(
    config: super::config::ObservabilityConfig,
    ports: Vec<watch::Receiver<Option<PortObservation>>>,
) -> std::io::Result<()> {
    let path = match config.observation_path {
        Some(path) => path,
        None => return Ok(()),
    };

    // The daemon runs as root to steer the clock; the socket must stay
    // readable for unprivileged consumers
    let permissions: std::fs::Permissions =
        PermissionsExt::from_mode(config.observation_permissions);

    let listener = create_unix_socket_with_permissions(&path, permissions)?;

    loop {
        let (mut stream, _addr) = listener.accept().await?;

        let observe = ObservableState {
            program: "gptpd",
            version: env!("CARGO_PKG_VERSION"),
            ports: ports
                .iter()
                .filter_map(|receiver| *receiver.borrow())
                .collect(),
        };

        // A consumer that went away mid-write is its own problem
        if let Err(e) = write_json(&mut stream, &observe).await {
            log::trace!("dropping observation: {e}");
        }
    }
}

fn other_error<T>(msg: String) -> std::io::Result<T> {
    use std::io::{Error, ErrorKind};
    Err(Error::new(ErrorKind::Other, msg))
}

pub fn create_unix_socket_with_permissions(
    path: &Path,
    permissions: Permissions,
) -> std::io::Result<tokio::net::UnixListener> {
    let listener = create_unix_socket(path)?;

    std::fs::set_permissions(path, permissions)?;

    Ok(listener)
}

fn create_unix_socket(path: &Path) -> std::io::Result<tokio::net::UnixListener> {
    // must unlink path before the bind below (otherwise we get "address already in use")
    if path.exists() {
        use std::os::unix::fs::FileTypeExt;

        let meta = std::fs::metadata(path)?;
        if !meta.file_type().is_socket() {
            return other_error(format!("path {path:?} exists but is not a socket"));
        }

        std::fs::remove_file(path)?;
    }

    // OS errors are terrible; let's try to do better
    let error = match tokio::net::UnixListener::bind(path) {
        Ok(listener) => return Ok(listener),
        Err(e) => e,
    };

    // we don't create parent directories
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            let msg = format!(
                r"Could not create observe socket at {:?} because its parent directory does not exist",
                &path
            );
            return other_error(msg);
        }
    }

    // otherwise, just forward the OS error
    let msg = format!(
        "Could not create observe socket at {:?}: {:?}",
        &path, error
    );

    other_error(msg)
}

pub async fn write_json<T>(stream: &mut UnixStream, value: &T) -> std::io::Result<()>
where
    T: serde::Serialize,
{
    let bytes = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    })?;
    stream.write_all(&bytes).await
}

//! Host side: accept a single inbound connection and persist the incoming
//! file under the cache area.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use neardrop_core::protocol::{ACCEPT_TIMEOUT, COPY_BUFFER_LEN, TRANSFER_PORT};
use neardrop_core::ViewState;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpSocket;

use crate::controller::EventBus;
use crate::transfer::{self, JobSlot, TransferError};

/// Subdirectory of the cache area where received files land, named exactly
/// as the sender's header says. No collision handling.
const RECEIVE_DIR: &str = "FileTransfer";

/// Host-side transfer component. One invocation serves exactly one inbound
/// connection; re-arming requires another `start_listening` call after the
/// previous job completed.
pub struct FileReceiver {
    bus: EventBus,
    cache_dir: PathBuf,
    job: JobSlot,
    port: u16,
    accept_timeout: Duration,
}

impl FileReceiver {
    pub fn new(bus: EventBus, cache_dir: PathBuf, job: JobSlot) -> Self {
        Self {
            bus,
            cache_dir,
            job,
            port: TRANSFER_PORT,
            accept_timeout: ACCEPT_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Arm the listener. At most one job may be live; a repeat call while
    /// one is active does nothing.
    pub async fn start_listening(&self) {
        let mut slot = self.job.lock().await;
        if slot.as_ref().is_some_and(|job| !job.is_finished()) {
            return;
        }
        let bus = self.bus.clone();
        let cache_dir = self.cache_dir.clone();
        let port = self.port;
        let accept_timeout = self.accept_timeout;
        let job = self.job.clone();
        *slot = Some(tokio::spawn(async move {
            bus.emit(ViewState::Idle);
            let outcome = receive_once(&bus, &cache_dir, port, accept_timeout).await;
            // Clear the slot before reporting so that an observer of the
            // terminal state can immediately start the next job.
            job.lock().await.take();
            match outcome {
                Ok(path) => {
                    bus.log("file received");
                    bus.emit(ViewState::Success { path });
                }
                Err(err) => {
                    bus.log(format!("error: {err}"));
                    bus.emit(ViewState::Failed {
                        reason: err.to_string(),
                    });
                }
            }
        }));
    }
}

async fn receive_once(
    bus: &EventBus,
    cache_dir: &Path,
    port: u16,
    accept_timeout: Duration,
) -> Result<PathBuf, TransferError> {
    bus.emit(ViewState::Connecting);
    bus.log("opening server socket");

    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    let listener = socket.listen(1)?;

    bus.log(format!(
        "waiting for an inbound connection, giving up after {}s",
        accept_timeout.as_secs()
    ));
    let (mut stream, remote) = tokio::time::timeout(accept_timeout, listener.accept())
        .await
        .map_err(|_| TransferError::AcceptTimeout(accept_timeout))??;
    // Exactly one connection per invocation.
    drop(listener);

    bus.emit(ViewState::Receiving);
    let header = transfer::read_header(&mut stream).await?;
    bus.log(format!(
        "connected to {remote}, incoming file: {}",
        header.file_name
    ));

    let receive_dir = cache_dir.join(RECEIVE_DIR);
    fs::create_dir_all(&receive_dir).await?;
    let dest = receive_dir.join(&header.file_name);
    bus.log(format!("saving to {}", dest.display()));

    let mut file = fs::File::create(&dest).await?;
    let mut buf = vec![0u8; COPY_BUFFER_LEN];
    loop {
        let length = stream.read(&mut buf).await?;
        if length == 0 {
            break;
        }
        file.write_all(&buf[..length]).await?;
        bus.log(format!("receiving, length: {length}"));
    }
    file.flush().await?;
    Ok(dest)
}

//! Client side: stage the source file into the cache, then stream it to the
//! group owner.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use neardrop_core::protocol::{CONNECT_TIMEOUT, COPY_BUFFER_LEN, STAGING_BUFFER_LEN, TRANSFER_PORT};
use neardrop_core::{TransferHeader, ViewState};
use rand::Rng;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::controller::EventBus;
use crate::transfer::{self, JobSlot, TransferError};

/// Client-side transfer component. One invocation sends exactly one file.
pub struct FileSender {
    bus: EventBus,
    cache_dir: PathBuf,
    job: JobSlot,
    port: u16,
    connect_timeout: Duration,
}

impl FileSender {
    pub fn new(bus: EventBus, cache_dir: PathBuf, job: JobSlot) -> Self {
        Self {
            bus,
            cache_dir,
            job,
            port: TRANSFER_PORT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Send `source` to the group owner at `host`. At most one job may be
    /// live; a repeat call while one is active does nothing.
    pub async fn send(&self, host: IpAddr, source: PathBuf) {
        let mut slot = self.job.lock().await;
        if slot.as_ref().is_some_and(|job| !job.is_finished()) {
            return;
        }
        let bus = self.bus.clone();
        let cache_dir = self.cache_dir.clone();
        let addr = SocketAddr::new(host, self.port);
        let connect_timeout = self.connect_timeout;
        let job = self.job.clone();
        *slot = Some(tokio::spawn(async move {
            bus.emit(ViewState::Idle);
            let outcome = send_once(&bus, &cache_dir, addr, connect_timeout, &source).await;
            // Clear the slot before reporting so that an observer of the
            // terminal state can immediately start the next job.
            job.lock().await.take();
            match outcome {
                Ok(staged) => {
                    bus.log("file sent");
                    bus.emit(ViewState::Success { path: staged });
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

async fn send_once(
    bus: &EventBus,
    cache_dir: &Path,
    addr: SocketAddr,
    connect_timeout: Duration,
    source: &Path,
) -> Result<PathBuf, TransferError> {
    let staged = stage_into_cache(cache_dir, source).await?;
    let file_name = staged
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TransferError::SourceName(staged.clone()))?;
    let header = TransferHeader::new(file_name);

    bus.emit(ViewState::Connecting);
    bus.log(format!("outgoing file: {}", header.file_name));
    bus.log(format!(
        "connecting to {addr}, giving up after {}s",
        connect_timeout.as_secs()
    ));
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransferError::ConnectTimeout(addr))??;

    bus.emit(ViewState::Sending);
    bus.log("connected, starting transfer");
    transfer::write_header(&mut stream, &header).await?;

    let mut file = fs::File::open(&staged).await?;
    let mut buf = vec![0u8; COPY_BUFFER_LEN];
    loop {
        let length = file.read(&mut buf).await?;
        if length == 0 {
            break;
        }
        stream.write_all(&buf[..length]).await?;
        bus.log(format!("sending, length: {length}"));
    }
    // Close the write half so the peer observes end-of-stream.
    stream.shutdown().await?;
    Ok(staged)
}

/// Copy `source` into the cache under a randomized numeric prefix so the
/// same file can be sent twice without colliding.
async fn stage_into_cache(cache_dir: &Path, source: &Path) -> Result<PathBuf, TransferError> {
    let name = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TransferError::SourceName(source.to_path_buf()))?;
    let mut input = fs::File::open(source)
        .await
        .map_err(|err| TransferError::SourceOpen {
            path: source.to_path_buf(),
            source: err,
        })?;

    fs::create_dir_all(cache_dir).await?;
    let prefix = rand::thread_rng().gen_range(1..=200);
    let staged = cache_dir.join(format!("{prefix}_{name}"));
    if fs::try_exists(&staged).await? {
        fs::remove_file(&staged).await?;
    }

    let mut output = fs::File::create(&staged).await?;
    let mut buf = vec![0u8; STAGING_BUFFER_LEN];
    loop {
        let length = input.read(&mut buf).await?;
        if length == 0 {
            break;
        }
        output.write_all(&buf[..length]).await?;
    }
    output.flush().await?;
    Ok(staged)
}

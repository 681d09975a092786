//! Conditional download
//!
//! Asks the server for the bitmap, and only writes it to storage when its
//! `Last-Modified` is newer than the watermark of the last rendered image.
//! The whole transfer goes through one fixed-size buffer, so a download of
//! any size costs the same amount of RAM.

use core::net::{IpAddr, SocketAddr};

use embedded_io_async::Read;
use embedded_nal_async::{AddrType, Dns, TcpConnect};
use log::{debug, info, warn};

use crate::date::Timestamp;
use crate::http::{self, TransportError, Url};
use crate::storage::{self, OpenMode, Storage, StorageError};

/// Transfer buffer, shared by response-head scanning and the body copy
pub const TRANSFER_BUF_SIZE: usize = 1024;

/// What a fetch did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Remote copy is not newer than the watermark; nothing was written
    NotModified { remote: Timestamp },
    /// Body written to the destination. `modified` is `None` when the
    /// server sent no usable `Last-Modified`.
    Updated {
        modified: Option<Timestamp>,
        bytes: usize,
    },
}

impl FetchOutcome {
    /// New watermark to adopt once the download has been rendered
    pub fn watermark(&self) -> Option<Timestamp> {
        match self {
            FetchOutcome::Updated { modified, .. } => *modified,
            FetchOutcome::NotModified { .. } => None,
        }
    }
}

/// Fetch error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    Transport(TransportError),
    /// Destination couldn't be created or written
    Storage(StorageError),
}

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self {
        FetchError::Transport(e)
    }
}

impl From<StorageError> for FetchError {
    fn from(e: StorageError) -> Self {
        FetchError::Storage(e)
    }
}

/// Download `url` to `dest_path` if it changed after `known_watermark`.
///
/// The connection is dropped on return, whatever the outcome. Once the
/// destination has been created it is closed on every path too; a failed
/// transfer can leave it partially written.
pub async fn fetch_if_newer<T, D, S>(
    tcp: &T,
    dns: &D,
    storage: &mut S,
    url: &str,
    dest_path: &str,
    known_watermark: Timestamp,
) -> Result<FetchOutcome, FetchError>
where
    T: TcpConnect,
    D: Dns,
    S: Storage,
{
    let url = Url::parse(url)?;
    let ip = resolve(dns, url.host).await?;
    let remote = SocketAddr::new(ip, url.port);

    info!("Connecting to {}", remote);
    let mut conn = tcp
        .connect(remote)
        .await
        .map_err(|_| TransportError::Connect)?;

    http::send_get(&mut conn, &url).await?;

    let mut buf = [0u8; TRANSFER_BUF_SIZE];
    let (head, body_start, filled) = http::read_head(&mut conn, &mut buf).await?;
    debug!(
        "HTTP {} content-length={:?} last-modified={:?}",
        head.status, head.content_length, head.last_modified
    );

    if !(200..300).contains(&head.status) {
        return Err(TransportError::Status(head.status).into());
    }
    if head.chunked {
        return Err(TransportError::Unsupported.into());
    }

    match head.last_modified {
        Some(remote) if remote <= known_watermark => {
            info!("Not modified ({} <= {}), skipping download", remote, known_watermark);
            return Ok(FetchOutcome::NotModified { remote });
        }
        Some(remote) => info!("Remote changed ({} > {}), downloading", remote, known_watermark),
        None => warn!("No usable Last-Modified, downloading anyway"),
    }

    storage::ensure_dir_for(storage, dest_path)?;
    let mut file = storage.open(dest_path, OpenMode::Truncate)?;
    let copied = copy_body(
        &mut conn,
        storage,
        &mut file,
        &mut buf,
        body_start..filled,
        head.content_length,
    )
    .await;
    let closed = storage.close(file);
    let bytes = copied?;
    closed?;

    info!("Wrote {} bytes to {}", bytes, dest_path);
    Ok(FetchOutcome::Updated {
        modified: head.last_modified,
        bytes,
    })
}

/// IPv4 literals skip the resolver
async fn resolve<D: Dns>(dns: &D, host: &str) -> Result<IpAddr, TransportError> {
    if let Ok(ip) = host.parse() {
        return Ok(IpAddr::V4(ip));
    }
    debug!("Resolving {}", host);
    dns.get_host_by_name(host, AddrType::IPv4).await.map_err(|e| {
        warn!("DNS lookup for {} failed: {:?}", host, e);
        TransportError::Dns
    })
}

/// Write the body bytes already in `buf[buffered]`, then stream the rest.
/// Stops at end of data, or after `expected` bytes when the length is known.
async fn copy_body<C: Read, S: Storage>(
    conn: &mut C,
    storage: &mut S,
    file: &mut S::File,
    buf: &mut [u8],
    buffered: core::ops::Range<usize>,
    expected: Option<usize>,
) -> Result<usize, FetchError> {
    let limit = expected.unwrap_or(usize::MAX);
    let mut total = 0;

    let mut chunk = &buf[buffered];
    loop {
        let take = chunk.len().min(limit - total);
        if take > 0 {
            storage.write(file, &chunk[..take])?;
            total += take;
        }
        if total >= limit {
            break;
        }

        let n = conn.read(buf).await.map_err(|_| TransportError::Read)?;
        if n == 0 {
            break;
        }
        chunk = &buf[..n];
    }

    if total < limit && expected.is_some() {
        warn!("Body ended after {} of {:?} bytes", total, expected);
        return Err(TransportError::Incomplete.into());
    }
    Ok(total)
}

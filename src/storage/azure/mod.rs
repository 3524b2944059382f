//! Azure Blob Storage backend
//!
//! Built on `object_store`. An object smaller than one block goes up in a
//! single put. Larger objects are staged block by block through a multipart
//! upload and committed at the end, so nothing is visible in the container
//! until the commit succeeds. The sync `StorageBackend` calls are driven on
//! a tokio runtime owned by the backend.

mod credentials;

pub use credentials::{AzureCredentials, DEFAULT_ENDPOINT_SUFFIX};

use super::StorageBackend;
use crate::config::ConfigError;
use crate::error::StorageError;
use crate::ByteStream;
use bytes::{Buf, Bytes};
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use object_store::path::Path as ObjectPath;
use object_store::{
    ClientOptions, Error as ObjectStoreError, MultipartUpload, ObjectStore, PutPayload,
    RetryConfig,
};
use std::future::Future;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Most blocks one blob can be committed with
pub const MAX_BLOCKS: usize = 50_000;

/// Blocks staged before the block size doubles
const BLOCKS_PER_STEP: usize = 10_000;

/// Block uploads allowed in flight at once
const MAX_IN_FLIGHT: usize = 4;

pub struct AzureBlobBackend {
    credentials: AzureCredentials,
    container: String,
    store: MicrosoftAzure,
    runtime: Arc<Runtime>,
    block_size: usize,
}

impl std::fmt::Debug for AzureBlobBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobBackend")
            .field("account", &self.credentials.account_name)
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl AzureBlobBackend {
    pub fn new(credentials: AzureCredentials, container: impl Into<String>) -> Result<Self, ConfigError> {
        let container = container.into();
        if container.trim().is_empty() {
            return Err(ConfigError::MissingParameter("container".to_string()));
        }
        credentials.validate_key()?;

        let endpoint = credentials.blob_endpoint();
        // Deadlines come from the caller and failures are never retried
        let store = MicrosoftAzureBuilder::new()
            .with_account(credentials.account_name.clone())
            .with_access_key(credentials.account_key.expose().trim().to_string())
            .with_container_name(container.clone())
            .with_allow_http(endpoint.starts_with("http://"))
            .with_endpoint(endpoint)
            .with_client_options(ClientOptions::new().with_timeout_disabled())
            .with_retry(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            })
            .build()
            .map_err(|e| ConfigError::ValidationError(format!("Azure storage: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("azure-io")
            .enable_all()
            .build()
            .map_err(|e| ConfigError::ValidationError(format!("Azure runtime: {}", e)))?;

        Ok(Self {
            credentials,
            container,
            store,
            runtime: Arc::new(runtime),
            block_size: DEFAULT_BLOCK_SIZE,
        })
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Location of `key` inside the container
    pub fn object_path(&self, key: &str) -> Result<ObjectPath, StorageError> {
        let invalid = |reason: String| StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        };
        let trimmed = key.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(invalid("key is empty".to_string()));
        }
        ObjectPath::parse(trimmed).map_err(|e| invalid(e.to_string()))
    }

    /// URL of the blob stored under `key`
    pub fn blob_url(&self, key: &str) -> Result<String, StorageError> {
        let path = self.object_path(key)?;
        Ok(format!(
            "{}/{}/{}",
            self.credentials.blob_endpoint(),
            self.container,
            path
        ))
    }

    async fn upload(&self, location: &ObjectPath, data: &mut dyn Read) -> Result<u64, StorageError> {
        let first = read_block(data, self.block_size)?;
        if first.len() < self.block_size {
            let total = first.len() as u64;
            self.store
                .put_opts(location, PutPayload::from(first), Default::default())
                .await
                .map_err(unavailable)?;
            return Ok(total);
        }

        let mut upload = self
            .store
            .put_multipart_opts(location, Default::default())
            .await
            .map_err(unavailable)?;
        match stage_blocks(&mut upload, first, data, self.block_size).await {
            Ok(total) => {
                upload.complete().await.map_err(unavailable)?;
                Ok(total)
            }
            Err(e) => {
                if let Err(abort) = upload.abort().await {
                    warn!("Failed to abort upload of {}: {}", location, abort);
                }
                Err(e)
            }
        }
    }
}

/// Size of the block at `index`; doubles every `BLOCKS_PER_STEP` blocks so
/// large streams stay under `MAX_BLOCKS`
pub fn block_size_for(base: usize, index: usize) -> usize {
    let step = (index / BLOCKS_PER_STEP).min(4) as u32;
    base.saturating_mul(1 << step)
}

/// Largest stream a blob with base block size `base` can hold
pub fn max_object_size(base: usize) -> u64 {
    (0..MAX_BLOCKS)
        .step_by(BLOCKS_PER_STEP)
        .map(|index| block_size_for(base, index) as u64 * BLOCKS_PER_STEP as u64)
        .sum()
}

async fn stage_blocks(
    upload: &mut Box<dyn MultipartUpload>,
    first: Vec<u8>,
    data: &mut dyn Read,
    base: usize,
) -> Result<u64, StorageError> {
    let mut tasks = JoinSet::new();
    let mut block = first;
    let mut index = 0;
    let mut total = 0u64;

    while !block.is_empty() {
        if index == MAX_BLOCKS {
            return Err(StorageError::Unavailable(format!(
                "Object exceeds {} blocks ({} bytes)",
                MAX_BLOCKS,
                max_object_size(base)
            )));
        }
        while tasks.len() >= MAX_IN_FLIGHT {
            join_block(&mut tasks).await?;
        }

        total += block.len() as u64;
        debug!("Staging block {} ({} bytes)", index, block.len());
        tasks.spawn(upload.put_part(PutPayload::from(block)));
        index += 1;
        block = read_block(data, block_size_for(base, index))?;
    }

    while !tasks.is_empty() {
        join_block(&mut tasks).await?;
    }
    Ok(total)
}

async fn join_block(tasks: &mut JoinSet<object_store::Result<()>>) -> Result<(), StorageError> {
    match tasks.join_next().await {
        Some(Ok(result)) => result.map_err(unavailable),
        Some(Err(e)) => Err(StorageError::Unavailable(format!("Block upload aborted: {}", e))),
        None => Ok(()),
    }
}

/// Fill a block of `size` bytes from `data`, stopping early only at end of stream
fn read_block(data: &mut dyn Read, size: usize) -> Result<Vec<u8>, StorageError> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match data.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StorageError::Stream(e)),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

fn unavailable(error: ObjectStoreError) -> StorageError {
    StorageError::Unavailable(error.to_string())
}

/// Run `request`, failing with `StorageError::Timeout` once `timeout` passes
async fn within<T>(
    timeout: Option<Duration>,
    request: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_| StorageError::Timeout(limit))?,
        None => request.await,
    }
}

/// Sync view of a blob download stream
struct BlobReader {
    runtime: Arc<Runtime>,
    stream: BoxStream<'static, object_store::Result<Bytes>>,
    chunk: Bytes,
    deadline: Option<Instant>,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.chunk.is_empty() {
            let next = self.stream.next();
            let next = match self.deadline {
                Some(deadline) => self
                    .runtime
                    .block_on(tokio::time::timeout_at(deadline, next))
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "blob download timed out"))?,
                None => self.runtime.block_on(next),
            };
            match next {
                Some(Ok(bytes)) => self.chunk = bytes,
                Some(Err(e)) => return Err(io::Error::new(io::ErrorKind::Other, e)),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Ok(n)
    }
}

impl StorageBackend for AzureBlobBackend {
    fn type_name(&self) -> &str {
        "azure"
    }

    fn write(
        &self,
        key: &str,
        data: &mut dyn Read,
        timeout: Option<Duration>,
    ) -> Result<u64, StorageError> {
        let location = self.object_path(key)?;
        let total = self
            .runtime
            .block_on(within(timeout, self.upload(&location, data)))?;
        info!(
            "Committed {} ({} bytes) to container {}",
            key, total, self.container
        );
        Ok(total)
    }

    fn read(&self, key: &str, timeout: Option<Duration>) -> Result<ByteStream, StorageError> {
        let location = self.object_path(key)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let result = self.runtime.block_on(within(timeout, async {
            self.store
                .get_opts(&location, Default::default())
                .await
                .map_err(|e| match e {
                    ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
                    other => unavailable(other),
                })
        }))?;

        Ok(Box::new(BlobReader {
            runtime: Arc::clone(&self.runtime),
            stream: result.into_stream(),
            chunk: Bytes::new(),
            deadline,
        }))
    }
}

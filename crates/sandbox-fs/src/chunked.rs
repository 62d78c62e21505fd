//! Chunked read/write over a size-limited filesystem surface.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use sandbox_core::{
    FileSystemApi, OperationError, OperationResult, RemoteError, WriteMode,
    config::DEFAULT_CHUNK_SIZE,
};

/// One planned chunk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkSpan {
    index: usize,
    offset: u64,
    length: u64,
}

/// Split `size` bytes into spans of at most `chunk` bytes.
fn plan_reads(size: u64, chunk: u64) -> Vec<ChunkSpan> {
    let mut spans = Vec::new();
    let mut offset = 0;
    while offset < size {
        let length = chunk.min(size - offset);
        spans.push(ChunkSpan {
            index: spans.len(),
            offset,
            length,
        });
        offset += length;
    }
    spans
}

fn chunk_error(span: ChunkSpan, err: &RemoteError) -> OperationError {
    OperationError::Chunk {
        index: span.index,
        offset: span.offset,
        message: err.to_string(),
    }
}

/// Presents whole-file read/write on top of bounded chunk calls.
///
/// Holds no per-call state, so one manager can serve concurrent callers.
#[derive(Clone)]
pub struct ChunkedTransferManager {
    fs: Arc<dyn FileSystemApi>,
    chunk_size: usize,
}

impl std::fmt::Debug for ChunkedTransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedTransferManager")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl ChunkedTransferManager {
    /// Create a manager with the default 50 KiB chunk size.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystemApi>) -> Self {
        Self::with_chunk_size(fs, DEFAULT_CHUNK_SIZE)
    }

    #[must_use]
    pub fn with_chunk_size(fs: Arc<dyn FileSystemApi>, chunk_size: usize) -> Self {
        Self { fs, chunk_size }
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read a whole file with the manager's chunk size.
    pub async fn read_file(&self, path: &str) -> OperationResult<Bytes> {
        self.read_file_with(path, self.chunk_size).await
    }

    /// Read a whole file, issuing sequential reads at offsets
    /// `0, chunk, 2*chunk, ...` until the reported size is reassembled.
    pub async fn read_file_with(&self, path: &str, chunk_size: usize) -> OperationResult<Bytes> {
        let (request_id, spans) = match self.plan(path, chunk_size).await {
            Ok(planned) => planned,
            Err(failed) => return failed,
        };
        let total: u64 = spans.iter().map(|s| s.length).sum();
        let mut buf = BytesMut::with_capacity(usize::try_from(total).unwrap_or(0));
        let mut last_request_id = request_id;

        for span in spans {
            match self.read_span(path, span).await {
                Ok((rid, data)) => {
                    last_request_id = rid;
                    buf.extend_from_slice(&data);
                }
                Err(err) => {
                    tracing::error!(path, index = span.index, error = %err, "Chunk read failed");
                    return OperationResult::fail(last_request_id, err);
                }
            }
        }
        tracing::debug!(path, bytes = buf.len(), "File read complete");
        OperationResult::ok(last_request_id, buf.freeze())
    }

    /// Read a whole file with up to `concurrency` chunk reads in flight.
    /// Chunks are reassembled in offset order.
    pub async fn read_file_parallel(&self, path: &str, concurrency: usize) -> OperationResult<Bytes> {
        let (request_id, spans) = match self.plan(path, self.chunk_size).await {
            Ok(planned) => planned,
            Err(failed) => return failed,
        };
        let total: u64 = spans.iter().map(|s| s.length).sum();

        let chunks: Result<Vec<(String, Vec<u8>)>, OperationError> =
            stream::iter(spans.into_iter().map(|span| self.read_span(path, span)))
                .buffered(concurrency.max(1))
                .try_collect()
                .await;

        match chunks {
            Ok(chunks) => {
                let mut buf = BytesMut::with_capacity(usize::try_from(total).unwrap_or(0));
                let mut last_request_id = request_id;
                for (rid, data) in chunks {
                    last_request_id = rid;
                    buf.extend_from_slice(&data);
                }
                OperationResult::ok(last_request_id, buf.freeze())
            }
            Err(err) => {
                tracing::error!(path, error = %err, "Parallel chunk read failed");
                OperationResult::fail(request_id, err)
            }
        }
    }

    /// Fetch metadata and plan chunk spans. Directories and a zero chunk
    /// size fail; an empty file plans no spans.
    async fn plan(
        &self,
        path: &str,
        chunk_size: usize,
    ) -> Result<(String, Vec<ChunkSpan>), OperationResult<Bytes>> {
        if chunk_size == 0 {
            return Err(OperationResult::fail(
                "",
                OperationError::InvalidArgument("chunk size must be greater than zero".into()),
            ));
        }
        let info = match self.fs.get_file_info(path).await {
            Ok(info) => info,
            Err(e) => return Err(OperationResult::from_remote(e)),
        };
        if info.data.is_directory {
            return Err(OperationResult::fail(
                info.request_id,
                OperationError::InvalidArgument(format!(
                    "cannot read a directory as a file: {path}"
                )),
            ));
        }
        Ok((info.request_id, plan_reads(info.data.size, chunk_size as u64)))
    }

    async fn read_span(
        &self,
        path: &str,
        span: ChunkSpan,
    ) -> Result<(String, Vec<u8>), OperationError> {
        let resp = self
            .fs
            .read_chunk(path, span.offset, span.length)
            .await
            .map_err(|e| chunk_error(span, &e))?;
        let got = resp.data.len() as u64;
        if got != span.length {
            return Err(OperationError::Chunk {
                index: span.index,
                offset: span.offset,
                message: format!("expected {} bytes, received {got}", span.length),
            });
        }
        Ok((resp.request_id, resp.data))
    }

    /// Write a whole file with the manager's chunk size.
    pub async fn write_file(&self, path: &str, content: &[u8], mode: WriteMode) -> OperationResult<()> {
        self.write_file_with(path, content, mode, self.chunk_size).await
    }

    /// Write a whole file in chunks.
    ///
    /// Only the first chunk uses `mode`; every later chunk appends. A
    /// failure midway leaves the earlier chunks in place remotely and is
    /// reported as a failure of the whole write.
    pub async fn write_file_with(
        &self,
        path: &str,
        content: &[u8],
        mode: WriteMode,
        chunk_size: usize,
    ) -> OperationResult<()> {
        if chunk_size == 0 {
            return OperationResult::fail(
                "",
                OperationError::InvalidArgument("chunk size must be greater than zero".into()),
            );
        }
        if content.len() <= chunk_size {
            return self.fs.write_chunk(path, content, mode).await.into();
        }

        let mut last_request_id = String::new();
        for (index, piece) in content.chunks(chunk_size).enumerate() {
            let chunk_mode = if index == 0 { mode } else { WriteMode::Append };
            let offset = (index * chunk_size) as u64;
            match self.fs.write_chunk(path, piece, chunk_mode).await {
                Ok(resp) => last_request_id = resp.request_id,
                Err(e) => {
                    tracing::error!(path, index, offset, error = %e, "Chunk write failed, file may be partial");
                    let request_id = match e.request_id() {
                        "" => last_request_id,
                        rid => rid.to_string(),
                    };
                    return OperationResult::fail(
                        request_id,
                        OperationError::Chunk {
                            index,
                            offset,
                            message: e.to_string(),
                        },
                    );
                }
            }
        }
        tracing::debug!(path, bytes = content.len(), "File write complete");
        OperationResult::ok(last_request_id, ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use sandbox_core::{FileInfo, Response};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Info,
        Read(u64, u64),
        Write(usize, WriteMode),
    }

    /// In-memory single file that records every call.
    #[derive(Default)]
    struct RecordingFs {
        content: Mutex<Vec<u8>>,
        is_directory: bool,
        calls: Mutex<Vec<Call>>,
        fail_write_at: Option<usize>,
        fail_read_at: Option<u64>,
    }

    impl RecordingFs {
        fn with_content(content: Vec<u8>) -> Self {
            Self {
                content: Mutex::new(content),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileSystemApi for RecordingFs {
        async fn get_file_info(&self, _path: &str) -> Result<Response<FileInfo>, RemoteError> {
            self.calls.lock().unwrap().push(Call::Info);
            let size = self.content.lock().unwrap().len() as u64;
            Ok(Response::new(
                "info",
                FileInfo {
                    size,
                    is_directory: self.is_directory,
                },
            ))
        }

        async fn read_chunk(
            &self,
            _path: &str,
            offset: u64,
            length: u64,
        ) -> Result<Response<Vec<u8>>, RemoteError> {
            self.calls.lock().unwrap().push(Call::Read(offset, length));
            if self.fail_read_at == Some(offset) {
                return Err(RemoteError::rejected("read-err", "read timeout"));
            }
            let content = self.content.lock().unwrap();
            let start = usize::try_from(offset).unwrap();
            let end = (start + usize::try_from(length).unwrap()).min(content.len());
            Ok(Response::new(format!("read-{offset}"), content[start..end].to_vec()))
        }

        async fn write_chunk(
            &self,
            _path: &str,
            data: &[u8],
            mode: WriteMode,
        ) -> Result<Response<()>, RemoteError> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Call::Write(data.len(), mode));
                calls.iter().filter(|c| matches!(c, Call::Write(..))).count() - 1
            };
            if self.fail_write_at == Some(index) {
                return Err(RemoteError::rejected("write-err", "disk quota exceeded"));
            }
            let mut content = self.content.lock().unwrap();
            if mode == WriteMode::Overwrite {
                content.clear();
            }
            content.extend_from_slice(data);
            Ok(Response::new(format!("write-{index}"), ()))
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_small_write_is_single_call_with_caller_mode() {
        let fs = Arc::new(RecordingFs::with_content(b"old".to_vec()));
        let mgr = ChunkedTransferManager::with_chunk_size(fs.clone(), 10);

        let res = mgr.write_file("/f", b"0123456789", WriteMode::Append).await;
        assert!(res.success());
        assert_eq!(fs.calls(), vec![Call::Write(10, WriteMode::Append)]);
        assert_eq!(*fs.content.lock().unwrap(), b"old0123456789");
    }

    #[tokio::test]
    async fn test_multi_chunk_write_appends_after_first() {
        let fs = Arc::new(RecordingFs::with_content(b"stale".to_vec()));
        let mgr = ChunkedTransferManager::with_chunk_size(fs.clone(), 50 * 1024);
        let content = pattern(120 * 1024);

        let res = mgr.write_file("/tmp/data/big.bin", &content, WriteMode::Overwrite).await;
        assert!(res.success(), "{}", res.error_message());
        assert_eq!(res.request_id, "write-2");
        assert_eq!(
            fs.calls(),
            vec![
                Call::Write(50 * 1024, WriteMode::Overwrite),
                Call::Write(50 * 1024, WriteMode::Append),
                Call::Write(20 * 1024, WriteMode::Append),
            ]
        );
        assert_eq!(*fs.content.lock().unwrap(), content);
    }

    #[tokio::test]
    async fn test_chunk_call_count_matches_ceiling() {
        for (len, chunk) in [(1, 1), (7, 3), (9, 3), (10, 3), (1000, 64), (64, 64), (65, 64)] {
            let fs = Arc::new(RecordingFs::default());
            let mgr = ChunkedTransferManager::with_chunk_size(fs.clone(), chunk);
            let res = mgr.write_file("/f", &pattern(len), WriteMode::Overwrite).await;
            assert!(res.success());
            let calls = fs.calls();
            assert_eq!(calls.len(), len.div_ceil(chunk), "len={len} chunk={chunk}");
            assert_eq!(calls[0], Call::Write(len.min(chunk), WriteMode::Overwrite));
            assert!(calls[1..].iter().all(|c| matches!(c, Call::Write(_, WriteMode::Append))));
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_aborts_write() {
        let fs = Arc::new(RecordingFs {
            fail_write_at: Some(1),
            ..RecordingFs::default()
        });
        let mgr = ChunkedTransferManager::with_chunk_size(fs.clone(), 4);

        let res = mgr.write_file("/f", b"aaaabbbbcccc", WriteMode::Overwrite).await;
        assert!(!res.success());
        assert_eq!(res.request_id, "write-err");
        assert!(res.error_message().contains("disk quota exceeded"));
        assert!(matches!(
            res.error(),
            Some(OperationError::Chunk { index: 1, offset: 4, .. })
        ));
        assert_eq!(fs.calls().len(), 2);
        // First chunk already landed; there is no rollback.
        assert_eq!(*fs.content.lock().unwrap(), b"aaaa");
    }

    #[tokio::test]
    async fn test_read_reassembles_sequentially() {
        let content = pattern(10 * 1024 + 17);
        let fs = Arc::new(RecordingFs::with_content(content.clone()));
        let mgr = ChunkedTransferManager::with_chunk_size(fs.clone(), 4096);

        let res = mgr.read_file("/f").await;
        assert_eq!(res.data().map(|b| b.to_vec()), Some(content));
        assert_eq!(
            fs.calls(),
            vec![
                Call::Info,
                Call::Read(0, 4096),
                Call::Read(4096, 4096),
                Call::Read(8192, 2065),
            ]
        );
    }

    #[tokio::test]
    async fn test_small_read_is_single_full_chunk() {
        let fs = Arc::new(RecordingFs::with_content(b"hello".to_vec()));
        let mgr = ChunkedTransferManager::new(fs.clone());

        let res = mgr.read_file("/f").await;
        assert_eq!(res.data().map(|b| &b[..]), Some(&b"hello"[..]));
        assert_eq!(fs.calls(), vec![Call::Info, Call::Read(0, 5)]);
    }

    #[tokio::test]
    async fn test_empty_file_issues_no_chunk_reads() {
        let fs = Arc::new(RecordingFs::default());
        let mgr = ChunkedTransferManager::new(fs.clone());

        let res = mgr.read_file("/empty").await;
        assert!(res.success());
        assert!(res.data().unwrap().is_empty());
        assert_eq!(fs.calls(), vec![Call::Info]);
    }

    #[tokio::test]
    async fn test_directory_read_fails_fast() {
        let fs = Arc::new(RecordingFs {
            is_directory: true,
            ..RecordingFs::default()
        });
        let mgr = ChunkedTransferManager::new(fs.clone());

        let res = mgr.read_file("/tmp").await;
        assert!(res.error_message().contains("cannot read a directory as a file"));
        assert_eq!(fs.calls(), vec![Call::Info]);
    }

    #[tokio::test]
    async fn test_failed_chunk_aborts_read() {
        let fs = Arc::new(RecordingFs {
            content: Mutex::new(pattern(30)),
            fail_read_at: Some(10),
            ..RecordingFs::default()
        });
        let mgr = ChunkedTransferManager::with_chunk_size(fs.clone(), 10);

        let res = mgr.read_file("/f").await;
        assert!(res.data().is_none());
        assert!(res.error_message().contains("read timeout"));
        assert_eq!(fs.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_parallel_read_preserves_order() {
        let content = pattern(1000);
        let fs = Arc::new(RecordingFs::with_content(content.clone()));
        let mgr = ChunkedTransferManager::with_chunk_size(fs.clone(), 64);

        let res = mgr.read_file_parallel("/f", 4).await;
        assert_eq!(res.data().map(|b| b.to_vec()), Some(content));
        assert_eq!(fs.calls().len(), 1 + 1000_usize.div_ceil(64));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let fs = Arc::new(RecordingFs::default());
        let mgr = ChunkedTransferManager::with_chunk_size(fs.clone(), 0);
        assert!(!mgr.write_file("/f", b"x", WriteMode::Overwrite).await.success());
        assert!(!mgr.read_file("/f").await.success());
        assert!(fs.calls().is_empty());
    }

    #[test]
    fn test_plan_reads() {
        assert!(plan_reads(0, 10).is_empty());
        let spans = plan_reads(25, 10);
        let offsets: Vec<_> = spans.iter().map(|s| (s.offset, s.length)).collect();
        assert_eq!(offsets, vec![(0, 10), (10, 10), (20, 5)]);
    }
}

//! Filesystem surface backed by in-session tool calls.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sandbox_core::{FileInfo, FileSystemApi, RemoteError, Response, SessionId, ToolApi, WriteMode};
use serde_json::json;

/// Tool that reports file metadata.
pub const TOOL_GET_FILE_INFO: &str = "get_file_info";
/// Tool that reads a byte range.
pub const TOOL_READ_FILE: &str = "read_file";
/// Tool that writes or appends bytes.
pub const TOOL_WRITE_FILE: &str = "write_file";

const MALFORMED: &str = "MalformedToolOutput";

fn malformed(request_id: &str, message: String) -> RemoteError {
    RemoteError::Rejected {
        request_id: request_id.to_string(),
        code: Some(MALFORMED.to_string()),
        message,
    }
}

/// Parse the `key: value` text emitted by the file info tool.
///
/// Returns `None` when no usable `size` line is present.
#[must_use]
pub fn parse_file_info(text: &str) -> Option<FileInfo> {
    let mut size = None;
    let mut is_directory = false;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "size" => size = value.trim().parse::<u64>().ok(),
            "isDirectory" => is_directory = value.trim().eq_ignore_ascii_case("true"),
            _ => {}
        }
    }
    size.map(|size| FileInfo { size, is_directory })
}

/// Maps the filesystem surface of one session onto opaque tool calls.
///
/// Chunk payloads travel base64-encoded in both directions.
#[derive(Clone)]
pub struct ToolFileSystem {
    tools: Arc<dyn ToolApi>,
    session_id: SessionId,
}

impl ToolFileSystem {
    #[must_use]
    pub fn new(tools: Arc<dyn ToolApi>, session_id: impl Into<SessionId>) -> Self {
        Self {
            tools,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl FileSystemApi for ToolFileSystem {
    async fn get_file_info(&self, path: &str) -> Result<Response<FileInfo>, RemoteError> {
        let resp = self
            .tools
            .call_tool(&self.session_id, TOOL_GET_FILE_INFO, json!({ "path": path }))
            .await?;
        match parse_file_info(&resp.data) {
            Some(info) => Ok(Response::new(resp.request_id, info)),
            None => Err(malformed(
                &resp.request_id,
                format!("unparseable file info for {path}"),
            )),
        }
    }

    async fn read_chunk(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<Response<Vec<u8>>, RemoteError> {
        let args = json!({
            "path": path,
            "offset": offset,
            "length": length,
            "encoding": "base64",
        });
        let resp = self
            .tools
            .call_tool(&self.session_id, TOOL_READ_FILE, args)
            .await?;
        let bytes = BASE64
            .decode(resp.data.trim())
            .map_err(|e| malformed(&resp.request_id, format!("invalid base64 chunk: {e}")))?;
        Ok(Response::new(resp.request_id, bytes))
    }

    async fn write_chunk(
        &self,
        path: &str,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<Response<()>, RemoteError> {
        let args = json!({
            "path": path,
            "content": BASE64.encode(data),
            "mode": mode.as_str(),
            "encoding": "base64",
        });
        let resp = self
            .tools
            .call_tool(&self.session_id, TOOL_WRITE_FILE, args)
            .await?;
        Ok(resp.map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;

    #[derive(Default)]
    struct EchoTools {
        calls: Mutex<Vec<(String, Value)>>,
        reply: String,
    }

    #[async_trait]
    impl ToolApi for EchoTools {
        async fn call_tool(
            &self,
            _session_id: &str,
            tool: &str,
            args: Value,
        ) -> Result<Response<String>, RemoteError> {
            self.calls.lock().unwrap().push((tool.to_string(), args));
            Ok(Response::new("tool-1", self.reply.clone()))
        }
    }

    #[test]
    fn test_parse_file_info() {
        let info = parse_file_info("name: a.txt\nsize: 1234\nisDirectory: false\n").unwrap();
        assert_eq!(info, FileInfo { size: 1234, is_directory: false });
        let dir = parse_file_info("size: 4096\nisDirectory: true").unwrap();
        assert!(dir.is_directory);
        assert!(parse_file_info("permission denied").is_none());
        assert!(parse_file_info("size: lots").is_none());
    }

    #[tokio::test]
    async fn test_write_chunk_encodes_payload_and_mode() {
        let tools = Arc::new(EchoTools::default());
        let fs = ToolFileSystem::new(tools.clone(), "s-1");

        let resp = fs.write_chunk("/f", b"\x00\xffhi", WriteMode::Append).await.unwrap();
        assert_eq!(resp.request_id, "tool-1");
        let calls = tools.calls.lock().unwrap();
        assert_eq!(calls[0].0, TOOL_WRITE_FILE);
        assert_eq!(calls[0].1["mode"], "append");
        assert_eq!(calls[0].1["content"], BASE64.encode(b"\x00\xffhi"));
    }

    #[tokio::test]
    async fn test_read_chunk_decodes_and_rejects_garbage() {
        let tools = Arc::new(EchoTools {
            reply: BASE64.encode(b"chunk"),
            ..EchoTools::default()
        });
        let fs = ToolFileSystem::new(tools.clone(), "s-1");
        let resp = fs.read_chunk("/f", 10, 5).await.unwrap();
        assert_eq!(resp.data, b"chunk");
        assert_eq!(tools.calls.lock().unwrap()[0].1["offset"], 10);

        let bad = ToolFileSystem::new(
            Arc::new(EchoTools {
                reply: "%%%".into(),
                ..EchoTools::default()
            }),
            "s-1",
        );
        let err = bad.read_chunk("/f", 0, 3).await.unwrap_err();
        assert_eq!(err.request_id(), "tool-1");
    }

    #[tokio::test]
    async fn test_unparseable_info_is_an_error() {
        let fs = ToolFileSystem::new(
            Arc::new(EchoTools {
                reply: "no such file".into(),
                ..EchoTools::default()
            }),
            "s-1",
        );
        assert!(fs.get_file_info("/missing").await.is_err());
    }
}

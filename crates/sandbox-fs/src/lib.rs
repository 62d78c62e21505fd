//! Chunked file transfer over a size-limited session channel.
//!
//! Provides:
//! - `ChunkedTransferManager` - Whole-file read/write in bounded chunks
//! - `ToolFileSystem` - Filesystem surface over in-session tool calls

pub mod chunked;
pub mod tool_fs;

pub use chunked::ChunkedTransferManager;
pub use tool_fs::{ToolFileSystem, parse_file_info};

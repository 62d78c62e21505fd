//! Walks a session through its whole lifecycle against the in-memory backend.
//!
//! Run with: cargo run -p lifecycle-demo
//!
//! Set `RUST_LOG=debug` to see every poll.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use sandbox_context::{BWList, ContextSync, SyncPolicy, UploadMode, WhiteList};
use sandbox_core::{ClientConfig, LabelQuery, WriteMode};
use sandbox_session::{
    CreateSessionParams, SandboxClient, SessionController, backend::MemoryBackend,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONTEXT_ID: &str = "ctx-demo";
const MOUNT: &str = "/home/user/data";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ClientConfig::from_env()
        .unwrap_or_else(|_| ClientConfig::new("demo-key"))
        .with_pause_polling(Duration::from_secs(10), Duration::from_millis(100))
        .with_sync_polling(Duration::from_secs(10), Duration::from_millis(100))
        .with_initial_sync_polling(Duration::from_secs(10), Duration::from_millis(100));
    tracing::info!(?config, "Starting lifecycle demo");

    let backend = Arc::new(MemoryBackend::new().with_transition_steps(2).with_sync_steps(2));
    let controller = SessionController::new(SandboxClient::from_backend(backend), config);

    let policy = SyncPolicy::default()
        .with_upload_mode(UploadMode::File)
        .with_bw_list(BWList {
            white_lists: vec![WhiteList::new("/", ["/cache"])?],
        });
    let params = CreateSessionParams::new()
        .label("demo", "lifecycle")
        .image("linux_latest")
        .context_sync(ContextSync::new(CONTEXT_ID, MOUNT, Some(policy))?);

    let session = controller
        .create(&params)
        .await
        .into_result()
        .context("create session")?;
    tracing::info!(session_id = session.id(), "Session ready");

    let report = format!("{MOUNT}/report.txt");
    let content = "line of sandbox output\n".repeat(6_000);
    let transfer = controller.file_transfer(&session);
    transfer
        .write_file(&report, content.as_bytes(), WriteMode::Overwrite)
        .await
        .into_result()
        .context("write report")?;
    let read_back = transfer
        .read_file_parallel(&report, 4)
        .await
        .into_result()
        .context("read report")?;
    anyhow::ensure!(read_back.len() == content.len(), "read back a different size");

    session
        .context()
        .sync(Some(CONTEXT_ID), Some(&report), None)
        .await
        .into_result()
        .context("sync report")?;

    controller
        .pause(&session)
        .await
        .into_result()
        .context("pause")?;
    controller
        .resume(&session)
        .await
        .into_result()
        .context("resume")?;

    let labels = HashMap::from([
        ("demo".to_string(), "lifecycle".to_string()),
        ("stage".to_string(), "done".to_string()),
    ]);
    controller
        .set_labels(&session, &labels)
        .await
        .into_result()
        .context("set labels")?;
    let page = controller
        .list_by_labels(&LabelQuery {
            labels,
            ..LabelQuery::default()
        })
        .await
        .into_result()
        .context("list sessions")?;
    tracing::info!(sessions = ?page.session_ids, "Sessions labelled done");

    let link = controller
        .get_link(&session, Some("https"), Some(30_100))
        .await
        .into_result()
        .context("get link")?;
    tracing::info!(%link, "Session link");

    controller
        .delete(&session, true)
        .await
        .into_result()
        .context("delete")?;
    controller
        .wait_for_deletion(&session, Duration::from_secs(5), Duration::from_millis(100))
        .await
        .into_result()
        .context("wait for deletion")?;

    // A fresh session on the same context sees the uploaded report.
    let restored = controller
        .create(
            &CreateSessionParams::new()
                .context_sync(ContextSync::new(CONTEXT_ID, "/mnt/restore", None)?),
        )
        .await
        .into_result()
        .context("create restore session")?;
    let restored_report = controller
        .file_transfer(&restored)
        .read_file("/mnt/restore/report.txt")
        .await
        .into_result()
        .context("read restored report")?;
    tracing::info!(bytes = restored_report.len(), "Report restored from context");

    controller
        .delete(&restored, false)
        .await
        .into_result()
        .context("delete restore session")?;
    Ok(())
}

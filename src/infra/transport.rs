//! Farm transports: in-process loopback and JSON-lines writer.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::farm::{FarmError, FarmTask, FarmTransport, TaskInbox};
use crate::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "infra::transport";

/// Delivers every broadcast task to the inboxes of in-process peers and
/// keeps a copy of what was sent.
#[derive(Default)]
pub struct LoopbackTransport {
    peers: RwLock<Vec<Arc<TaskInbox>>>,
    sent: Mutex<Vec<FarmTask>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, peer: Arc<TaskInbox>) {
        rw_write(&self.peers, SOURCE, "connect").push(peer);
    }

    pub fn sent(&self) -> Vec<FarmTask> {
        mutex_lock(&self.sent, SOURCE, "sent").clone()
    }

    pub fn take_sent(&self) -> Vec<FarmTask> {
        std::mem::take(&mut *mutex_lock(&self.sent, SOURCE, "take_sent"))
    }
}

#[async_trait]
impl FarmTransport for LoopbackTransport {
    async fn broadcast(&self, task: &FarmTask) -> Result<(), FarmError> {
        mutex_lock(&self.sent, SOURCE, "broadcast.sent").push(task.clone());
        for peer in rw_read(&self.peers, SOURCE, "broadcast.peers").iter() {
            peer.push(task.clone());
        }
        Ok(())
    }
}

/// Appends one JSON-encoded task per line to a writer.
pub struct JsonLinesTransport<W> {
    writer: tokio::sync::Mutex<W>,
}

impl<W> JsonLinesTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> FarmTransport for JsonLinesTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn broadcast(&self, task: &FarmTask) -> Result<(), FarmError> {
        let mut line = serde_json::to_vec(task)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Read tasks written by [`JsonLinesTransport`]. Blank lines are ignored;
/// undecodable lines are logged and skipped.
pub async fn read_json_lines<R>(reader: R) -> Result<Vec<FarmTask>, FarmError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut tasks = Vec::new();
    let mut line_no = 0_usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FarmTask>(line) {
            Ok(task) => tasks.push(task),
            Err(err) => warn!(line = line_no, error = %err, "Undecodable farm task skipped"),
        }
    }
    Ok(tasks)
}

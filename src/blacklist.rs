/// Persistent farmer blacklist.
///
/// An append-only set of node ids the engine should never contract with
/// again. The backing file is a newline-delimited list under the
/// configured folder; every `add` is flushed and fsynced before it
/// returns, so a crash never loses a blacklisting decision.
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;

/// File name inside the configured blacklist folder.
pub const BLACKLIST_FILE: &str = "blacklist";

/// Shared, persistent set of farmer node ids to avoid.
pub struct Blacklist {
    inner: Mutex<Inner>,
}

struct Inner {
    nodes: BTreeSet<String>,
    path: PathBuf,
}

impl Blacklist {
    /// Load the blacklist from `folder`, creating an empty one if the
    /// backing file does not exist yet.
    pub async fn open(folder: &Path) -> Result<Self> {
        let path = folder.join(BLACKLIST_FILE);
        let nodes = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            inner: Mutex::new(Inner { nodes, path }),
        })
    }

    /// Whether a node id is blacklisted.
    pub async fn contains(&self, node_id: &str) -> bool {
        self.inner.lock().await.nodes.contains(node_id)
    }

    /// Add a node id and persist it durably before returning. Adding an
    /// already-present id is a no-op.
    pub async fn add(&self, node_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.nodes.insert(node_id.to_owned()) {
            return Ok(());
        }
        info!(node_id, "farmer blacklisted");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)
            .await?;
        file.write_all(format!("{node_id}\n").as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Point-in-time copy of the set, ordered for stable request bodies.
    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.lock().await.nodes.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_contains_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let blacklist = Blacklist::open(dir.path()).await.unwrap();

        assert!(!blacklist.contains("node-a").await);
        blacklist.add("node-b").await.unwrap();
        blacklist.add("node-a").await.unwrap();

        assert!(blacklist.contains("node-a").await);
        assert_eq!(blacklist.snapshot().await, vec!["node-a", "node-b"]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let blacklist = Blacklist::open(dir.path()).await.unwrap();
            blacklist.add("node-x").await.unwrap();
        }
        let reopened = Blacklist::open(dir.path()).await.unwrap();
        assert!(reopened.contains("node-x").await);
    }

    #[tokio::test]
    async fn test_duplicate_add_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let blacklist = Blacklist::open(dir.path()).await.unwrap();
        blacklist.add("node-x").await.unwrap();
        blacklist.add("node-x").await.unwrap();

        let contents = tokio::fs::read_to_string(dir.path().join(BLACKLIST_FILE))
            .await
            .unwrap();
        assert_eq!(contents, "node-x\n");
    }
}

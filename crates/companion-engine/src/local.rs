use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use companion_contracts::tokens::estimate_tokens;

use crate::capabilities::{ArtifactStore, TokenCounter, TurnIndexer, TurnRecord};
use crate::error::IndexingError;
use crate::util::mime_for_path;

const READY_POLL: Duration = Duration::from_millis(25);

/// Artifacts on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    ready_timeout: Duration,
}

impl Default for LocalArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalArtifactStore {
    pub fn new() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

async fn non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn await_ready(&self, path: &str) -> anyhow::Result<()> {
        let path = Path::new(path);
        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        loop {
            if non_empty_file(path).await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("artifact {} never became readable", path.display());
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn display_source(&self, path: &str) -> anyhow::Result<String> {
        let absolute = match tokio::fs::canonicalize(path).await {
            Ok(absolute) => absolute,
            Err(_) => std::env::current_dir()
                .context("failed resolving working directory")?
                .join(path),
        };
        let url = Url::from_file_path(&absolute)
            .map_err(|()| anyhow::anyhow!("cannot build a file URL for {}", absolute.display()))?;
        Ok(url.to_string())
    }

    async fn read_data_url(&self, path: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(format!(
            "data:{};base64,{}",
            mime_for_path(path),
            BASE64.encode(bytes)
        ))
    }
}

/// Retrieval index stand-in: one JSON record per completed exchange.
#[derive(Debug)]
pub struct JsonlTurnIndexer {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlTurnIndexer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn records(&self) -> anyhow::Result<Vec<TurnRecord>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading {}", self.path.display()))
            }
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("invalid turn record"))
            .collect()
    }

    async fn append(&self, record: &TurnRecord) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed opening {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TurnIndexer for JsonlTurnIndexer {
    async fn save_turn(&self, record: &TurnRecord) -> Result<(), IndexingError> {
        self.append(record).await.map_err(IndexingError::from)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count_tokens(&self, text: &str) -> u64 {
        estimate_tokens(text)
    }
}

#[cfg(test)]
mod tests {
    use companion_contracts::conversation::ConversationTurn;

    use super::*;

    #[tokio::test]
    async fn await_ready_times_out_on_missing_file() {
        let store = LocalArtifactStore::new().with_ready_timeout(Duration::from_millis(60));
        let err = store.await_ready("/definitely/not/here.mp4").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn ready_file_gets_file_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("my clip.mp4");
        std::fs::write(&path, b"mp4")?;
        let store = LocalArtifactStore::new();
        let path_text = path.to_string_lossy().to_string();
        store.await_ready(&path_text).await?;
        let src = store.display_source(&path_text).await?;
        assert!(src.starts_with("file://"));
        assert!(src.ends_with("my%20clip.mp4"));
        Ok(())
    }

    #[tokio::test]
    async fn reserved_characters_survive_the_file_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("take #2 50%?.mp4");
        std::fs::write(&path, b"mp4")?;
        let src = LocalArtifactStore::new()
            .display_source(&path.to_string_lossy())
            .await?;
        assert!(src.ends_with("take%20%232%2050%25%3F.mp4"));

        let url = Url::parse(&src)?;
        assert_eq!(url.fragment(), None);
        assert_eq!(url.query(), None);
        let back = url
            .to_file_path()
            .map_err(|()| anyhow::anyhow!("not a file URL: {src}"))?;
        assert_eq!(back, std::fs::canonicalize(&path)?);
        Ok(())
    }

    #[tokio::test]
    async fn indexer_appends_records() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let indexer = JsonlTurnIndexer::new(temp.path().join("rag").join("turns.jsonl"));
        assert!(indexer.records().await?.is_empty());
        for id in ["turn-1", "turn-2"] {
            indexer
                .save_turn(&TurnRecord {
                    id: id.to_string(),
                    timestamp: "2026-01-01T00:00:00Z".to_string(),
                    history: vec![ConversationTurn::user("hello"), ConversationTurn::assistant("hi")],
                    persona: "Nova".to_string(),
                })
                .await
                .map_err(|err| anyhow::anyhow!(err))?;
        }
        let records = indexer.records().await?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "turn-2");
        assert_eq!(records[0].history[1].content, "hi");
        Ok(())
    }

    #[test]
    fn heuristic_counter_uses_quarter_chars() {
        assert_eq!(HeuristicTokenCounter.count_tokens("twelve chars"), 3);
    }
}

//! Memory/retrieval seam for participants

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Result;
use crate::model::ModelMessage;

/// One retrievable memory entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContent {
    pub content: String,
    pub mime_type: String,
}

impl MemoryContent {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mime_type: "text/plain".to_string(),
        }
    }
}

/// Defines the interface for retrieval-backed participant memory.
///
/// Vector-database implementations live outside this crate; [`ListMemory`] is
/// the in-process reference implementation.
#[async_trait]
pub trait Memory: Send + Sync + Debug {
    /// Store a new entry.
    async fn add(&self, content: MemoryContent) -> Result<()>;

    /// Retrieve entries relevant to `query`, most relevant first.
    async fn query(&self, query: &str) -> Result<Vec<MemoryContent>>;

    /// Inject relevant memory into a model context before generation.
    async fn update_context(&self, context: &mut Vec<ModelMessage>) -> Result<()>;

    /// Remove all entries.
    async fn clear(&self) -> Result<()>;

    /// Release any held resources.
    async fn close(&self) -> Result<()>;
}

/// Chronological list-backed memory. Every stored entry is considered
/// relevant; `query` returns the full list in insertion order.
#[derive(Debug, Default)]
pub struct ListMemory {
    entries: std::sync::Mutex<Vec<MemoryContent>>,
}

impl ListMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Memory for ListMemory {
    async fn add(&self, content: MemoryContent) -> Result<()> {
        self.entries.lock().unwrap().push(content);
        Ok(())
    }

    async fn query(&self, _query: &str) -> Result<Vec<MemoryContent>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn update_context(&self, context: &mut Vec<ModelMessage>) -> Result<()> {
        let entries = self.entries.lock().unwrap().clone();
        if entries.is_empty() {
            return Ok(());
        }
        let rendered = entries
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}. {}", i + 1, e.content))
            .collect::<Vec<_>>()
            .join("\n");
        context.push(ModelMessage::system(format!(
            "Relevant memory:\n{rendered}"
        )));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

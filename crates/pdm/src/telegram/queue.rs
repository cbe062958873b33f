//! Priority queue of pending channel uploads.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Where a queued file came from; decides which table gets the Telegram ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ItemKind {
    Download,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadItem {
    pub id: String,
    pub kind: ItemKind,
    pub filepath: PathBuf,
    pub description: String,
    pub tags: String,
    /// Higher goes first
    pub priority: i32,
    pub queued_at: DateTime<Utc>,
}

impl UploadItem {
    pub fn new(id: &str, kind: ItemKind, filepath: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            filepath: filepath.into(),
            description: String::new(),
            tags: String::new(),
            priority: 0,
            queued_at: Utc::now(),
        }
    }

    pub fn filename(&self) -> String {
        self.filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Position in the queue, 0 = next
    Queued(usize),
    Missing,
    AlreadyQueued,
    Processing,
    PreviouslyFailed,
}

impl QueueOutcome {
    pub fn is_queued(self) -> bool {
        matches!(self, QueueOutcome::Queued(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub processing_count: usize,
    pub failed_count: usize,
    pub next_files: Vec<String>,
}

/// Pending items plus the files in flight and the ones that failed.
#[derive(Debug, Default)]
pub struct UploadQueue {
    items: VecDeque<UploadItem>,
    processing: HashSet<PathBuf>,
    failed: HashMap<PathBuf, UploadItem>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert before the first item with a lower priority.
    pub fn push(&mut self, item: UploadItem) -> QueueOutcome {
        if !item.filepath.exists() {
            return QueueOutcome::Missing;
        }
        if self.processing.contains(&item.filepath) {
            return QueueOutcome::Processing;
        }
        if self.failed.contains_key(&item.filepath) {
            return QueueOutcome::PreviouslyFailed;
        }
        if self.items.iter().any(|queued| queued.filepath == item.filepath) {
            return QueueOutcome::AlreadyQueued;
        }

        let position = self
            .items
            .iter()
            .position(|queued| item.priority > queued.priority)
            .unwrap_or(self.items.len());
        self.items.insert(position, item);
        QueueOutcome::Queued(position)
    }

    /// Next item, now marked as processing.
    pub fn pop(&mut self) -> Option<UploadItem> {
        let item = self.items.pop_front()?;
        self.processing.insert(item.filepath.clone());
        Some(item)
    }

    pub fn complete(&mut self, path: &Path) {
        self.processing.remove(path);
    }

    pub fn fail(&mut self, item: UploadItem) {
        self.processing.remove(&item.filepath);
        self.failed.insert(item.filepath.clone(), item);
    }

    /// Forget an earlier failure so the file can be queued again.
    pub fn forget_failed(&mut self, path: &Path) -> bool {
        self.failed.remove(path).is_some()
    }

    /// Drop pending items and forget failures. Returns how many items were pending.
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        self.failed.clear();
        cleared
    }

    /// Put failed items back in the queue. Returns how many were requeued.
    pub fn retry_failed(&mut self) -> usize {
        let failed: Vec<UploadItem> = self.failed.drain().map(|(_, item)| item).collect();
        failed
            .into_iter()
            .map(|item| self.push(item))
            .filter(|outcome| outcome.is_queued())
            .count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.items.len(),
            processing_count: self.processing.len(),
            failed_count: self.failed.len(),
            next_files: self.items.iter().take(5).map(UploadItem::filename).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(dir: &TempDir, name: &str, priority: i32) -> UploadItem {
        let path = dir.path().join(name);
        std::fs::write(&path, b"x").unwrap();
        let mut item = UploadItem::new(name, ItemKind::Upload, path);
        item.priority = priority;
        item
    }

    fn order(queue: &UploadQueue) -> Vec<String> {
        queue.status().next_files
    }

    #[test]
    fn test_priority_then_fifo() {
        let dir = TempDir::new().unwrap();
        let mut queue = UploadQueue::new();
        assert_eq!(queue.push(item(&dir, "a.txt", 1)), QueueOutcome::Queued(0));
        assert_eq!(queue.push(item(&dir, "b.txt", 1)), QueueOutcome::Queued(1));
        assert_eq!(queue.push(item(&dir, "c.mp4", 2)), QueueOutcome::Queued(0));
        assert_eq!(queue.push(item(&dir, "d.mp3", 2)), QueueOutcome::Queued(1));
        assert_eq!(queue.push(item(&dir, "e.bin", 0)), QueueOutcome::Queued(4));
        assert_eq!(order(&queue), vec!["c.mp4", "d.mp3", "a.txt", "b.txt", "e.bin"]);
    }

    #[test]
    fn test_duplicates_and_missing() {
        let dir = TempDir::new().unwrap();
        let mut queue = UploadQueue::new();
        let first = item(&dir, "a.txt", 0);
        assert!(queue.push(first.clone()).is_queued());
        assert_eq!(queue.push(first.clone()), QueueOutcome::AlreadyQueued);

        let popped = queue.pop().unwrap();
        assert_eq!(queue.push(first.clone()), QueueOutcome::Processing);
        queue.fail(popped);
        assert_eq!(queue.push(first.clone()), QueueOutcome::PreviouslyFailed);
        assert!(queue.forget_failed(&first.filepath));
        assert!(!queue.forget_failed(&first.filepath));
        assert_eq!(queue.push(first), QueueOutcome::Queued(0));

        let ghost = UploadItem::new("ghost", ItemKind::Download, dir.path().join("ghost.bin"));
        assert_eq!(queue.push(ghost), QueueOutcome::Missing);
    }

    #[test]
    fn test_retry_failed_and_clear() {
        let dir = TempDir::new().unwrap();
        let mut queue = UploadQueue::new();
        queue.push(item(&dir, "a.txt", 0));
        queue.push(item(&dir, "b.txt", 0));
        let a = queue.pop().unwrap();
        queue.fail(a);
        assert_eq!(queue.status().failed_count, 1);

        assert_eq!(queue.retry_failed(), 1);
        assert_eq!(queue.status().failed_count, 0);
        assert_eq!(order(&queue), vec!["b.txt", "a.txt"]);

        let b = queue.pop().unwrap();
        queue.complete(&b.filepath);
        assert_eq!(queue.status().processing_count, 0);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }
}

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use super::{ConversationStore, StoreResult, finish_load};
use crate::conversation::Conversation;

/// One pretty-printed JSON file per conversation, named `<id>.json`.
///
/// Writes go to a temp file that is renamed over the target, so a crash
/// mid-write leaves the previous snapshot intact.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn json_files(&self) -> StoreResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn load(&self) -> StoreResult<Vec<Conversation>> {
        let mut conversations = Vec::new();

        for path in self.json_files().await? {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Skipping unreadable conversation {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_str::<Conversation>(&content) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => {
                    tracing::warn!("Skipping corrupt conversation {}: {}", path.display(), e);
                }
            }
        }

        tracing::debug!("Loaded {} conversations from {}", conversations.len(), self.dir.display());
        Ok(finish_load(conversations))
    }

    async fn save(&self, conversation: &Conversation) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(conversation)?;
        let path = self.path_for(conversation.id);
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> StoreResult<()> {
        for path in self.json_files().await? {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::{ResponseStatus, Turn};
    use colloquy_ai::ModelRef;

    fn sample(title: &str) -> Conversation {
        let mut conv = Conversation::new(Some(ModelRef::new("ollama", "llama3.2")));
        conv.title_from(title);
        conv.push_turn(Turn::user(title));
        let mut reply = Turn::assistant_streaming();
        reply.push_fragment("4");
        reply.finish_response(ResponseStatus::Completed);
        reply.begin_response();
        reply.push_fragment("It's 4.");
        reply.finish_response(ResponseStatus::Completed);
        reply.select_response(0).unwrap();
        conv.push_turn(reply);
        conv
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("conversations"));

        let conv = sample("2+2?");
        store.save(&conv).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![conv]);
        assert!(!dir.path().join("conversations").join(format!("{}.json.tmp", loaded[0].id)).exists());
    }

    #[tokio::test]
    async fn test_load_save_load_is_fixed_point() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&sample("first")).await.unwrap();
        store.save(&sample("second")).await.unwrap();

        let first = store.load().await.unwrap();
        store.save_all(&first).await.unwrap();
        let second = store.load().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_load_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let older = sample("older");
        let mut newer = sample("newer");
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        let titles: Vec<_> = store.load().await.unwrap().into_iter().map(|c| c.title).collect();
        assert_eq!(titles, vec!["newer", "older"]);
    }

    #[tokio::test]
    async fn test_interrupted_generation_loads_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let mut conv = Conversation::new(None);
        conv.push_turn(Turn::user("tell me a story"));
        let mut reply = Turn::assistant_streaming();
        reply.push_fragment("Once upon");
        let turn_id = conv.push_turn(reply);
        store.save(&conv).await.unwrap();

        let loaded = store.load().await.unwrap();
        let turn = loaded[0].turn(turn_id).unwrap();
        assert_eq!(turn.status(), Some(ResponseStatus::Failed));
        assert_eq!(turn.text(), "Once upon");
        assert!(!turn.is_generating());
    }

    #[tokio::test]
    async fn test_corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save(&sample("good")).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{ not json").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, "good");
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let a = sample("a");
        let b = sample("b");
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        store.delete(a.id).await.unwrap();
        store.delete(a.id).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, b.id);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}

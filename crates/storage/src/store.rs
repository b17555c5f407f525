//! SQLite persistence for conversations, messages and settings.

use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use shared::agent_api::ChatMessage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Placeholder title given to lazily created conversations until a title
/// task overwrites it.
pub const DEFAULT_TITLE: &str = "New Chat";

/// A conversation row as listed to the consumer.
#[derive(Debug, Clone)]
pub struct ConversationRef {
    pub id: i64,
    pub title: String,
    pub created_at: String,
}

/// Keyed record store backing the session controller.
///
/// No multi-statement transactional guarantee is offered; callers rely only
/// on each call completing before the next depends on it.
pub struct ChatStore {
    conn: Arc<Mutex<Connection>>,
}

impl ChatStore {
    /// Open (or create) the database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("assistant.db");
        debug!(path = %db_path.display(), "opening chat store");
        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Default per-user data directory.
    pub fn default_data_dir() -> PathBuf {
        directories::ProjectDirs::from("com.local", "Arkline", "Arkline")
            .map(|p| p.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"))
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER,
                role TEXT,
                content TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value BLOB
            )",
            [],
        )?;
        Ok(())
    }

    pub fn insert_conversation(&self, title: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (title) VALUES (?1)",
            params![title],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_message(&self, conversation_id: i64, role: &str, content: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO messages (conversation_id, role, content) VALUES (?1, ?2, ?3)",
            params![conversation_id, role, content],
        )?;
        Ok(())
    }

    pub fn update_conversation_title(&self, id: i64, title: &str) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;
        Ok(())
    }

    pub fn conversation_title(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let title = conn
            .query_row(
                "SELECT title FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(title)
    }

    pub fn message_count(&self, conversation_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// The last `limit` messages of a conversation in chronological order.
    ///
    /// Queried descending by id and reversed; insertion order is the only
    /// ordering the schema guarantees, so this invariant is pinned by a
    /// test rather than left as a query detail.
    pub fn recent_messages(&self, conversation_id: i64, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages
             WHERE conversation_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let mut rows: Vec<ChatMessage> = stmt
            .query_map(params![conversation_id, limit as i64], |row| {
                Ok(ChatMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    /// Full message history, oldest first.
    pub fn load_history(&self, conversation_id: i64) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages
             WHERE conversation_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok(ChatMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// All conversations, newest first.
    pub fn list_conversations(&self) -> Result<Vec<ConversationRef>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at FROM conversations
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ConversationRef {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Delete a conversation and its messages.
    pub fn delete_conversation(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![id],
        )?;
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &[u8]) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChatStore::open(dir.path()).unwrap();
        assert!(store.list_conversations().unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_list_conversations() {
        let store = ChatStore::open_in_memory().unwrap();
        let a = store.insert_conversation(DEFAULT_TITLE).unwrap();
        let b = store.insert_conversation("Rust questions").unwrap();
        assert_ne!(a, b);

        let listed = store.list_conversations().unwrap();
        assert_eq!(listed.len(), 2);
        // Newest first.
        assert_eq!(listed[0].id, b);
        assert_eq!(listed[0].title, "Rust questions");
    }

    #[test]
    fn test_recent_messages_are_chronological() {
        let store = ChatStore::open_in_memory().unwrap();
        let conv = store.insert_conversation(DEFAULT_TITLE).unwrap();
        for i in 0..30 {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            store
                .insert_message(conv, role, &format!("message {i}"))
                .unwrap();
        }

        let recent = store.recent_messages(conv, 20).unwrap();
        assert_eq!(recent.len(), 20);
        // Window covers the last 20 inserts, oldest of the window first.
        assert_eq!(recent.first().unwrap().content, "message 10");
        assert_eq!(recent.last().unwrap().content, "message 29");
        for pair in recent.windows(2) {
            let a: usize = pair[0].content[8..].parse().unwrap();
            let b: usize = pair[1].content[8..].parse().unwrap();
            assert_eq!(b, a + 1, "messages out of chronological order");
        }
    }

    #[test]
    fn test_recent_messages_limit_larger_than_history() {
        let store = ChatStore::open_in_memory().unwrap();
        let conv = store.insert_conversation(DEFAULT_TITLE).unwrap();
        store.insert_message(conv, "user", "only one").unwrap();
        let recent = store.recent_messages(conv, 20).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].role, "user");
    }

    #[test]
    fn test_title_update_and_lookup() {
        let store = ChatStore::open_in_memory().unwrap();
        let conv = store.insert_conversation(DEFAULT_TITLE).unwrap();
        assert_eq!(
            store.conversation_title(conv).unwrap().as_deref(),
            Some(DEFAULT_TITLE)
        );
        store
            .update_conversation_title(conv, "Weather in Lisbon")
            .unwrap();
        assert_eq!(
            store.conversation_title(conv).unwrap().as_deref(),
            Some("Weather in Lisbon")
        );
        assert!(store.conversation_title(9999).unwrap().is_none());
    }

    #[test]
    fn test_delete_conversation_removes_messages() {
        let store = ChatStore::open_in_memory().unwrap();
        let conv = store.insert_conversation(DEFAULT_TITLE).unwrap();
        store.insert_message(conv, "user", "hello").unwrap();
        store.insert_message(conv, "assistant", "hi").unwrap();
        store.delete_conversation(conv).unwrap();
        assert_eq!(store.message_count(conv).unwrap(), 0);
        assert!(store.list_conversations().unwrap().is_empty());
    }

    #[test]
    fn test_settings_roundtrip() {
        let store = ChatStore::open_in_memory().unwrap();
        assert!(store.get_setting("api_key").unwrap().is_none());
        store.set_setting("api_key", b"blob-one").unwrap();
        store.set_setting("api_key", b"blob-two").unwrap();
        assert_eq!(
            store.get_setting("api_key").unwrap().as_deref(),
            Some(b"blob-two".as_ref())
        );
    }
}

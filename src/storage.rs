use crate::api::models::Conversation;
use crate::chat::conversations::{other_participant, preview};
use crate::error::{Error, Result};
use directories::ProjectDirs;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "ChatApp")?;
    Some(proj.data_dir().join("cache.sqlite"))
}

// Caching the conversation list so the sidebar renders before the network answers
pub struct Cache {
    conn: Connection,
}

impl Cache {
    pub fn open_default() -> Result<Self> {
        let path = db_path().ok_or_else(|| Error::Config("no data dir".into()))?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // The pragma answers with the resulting mode, so it has to be read as a query.
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        log::debug!("cache journal mode: {mode}");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                preview TEXT NOT NULL,
                last_activity INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS conversations_owner_activity
                ON conversations (owner_id, last_activity DESC);
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn upsert_conversations(&mut self, owner_id: &str, list: &[Conversation]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for conv in list {
            let title = other_participant(conv, owner_id)
                .map(|p| p.display_name().to_string())
                .unwrap_or_default();
            let activity = conv
                .last_message_timestamp
                .or(conv.created_at)
                .map(|ts| ts.timestamp())
                .unwrap_or(0);
            let raw = serde_json::to_string(conv)?;
            tx.execute(
                r#"
                INSERT INTO conversations (id, owner_id, title, preview, last_activity, raw_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    owner_id=excluded.owner_id,
                    title=excluded.title,
                    preview=excluded.preview,
                    last_activity=excluded.last_activity,
                    raw_json=excluded.raw_json
                "#,
                params![conv.id, owner_id, title, preview(conv, owner_id), activity, raw],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Cached conversations of `owner_id`, most recent first. Rows that no
    /// longer decode are skipped.
    pub fn conversations(&self, owner_id: &str, limit: Option<usize>) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn.prepare(
            "SELECT raw_json FROM conversations WHERE owner_id = ?1 \
             ORDER BY last_activity DESC, title ASC LIMIT ?2",
        )?;
        let lim = limit.unwrap_or(500) as i64;
        let rows = stmt.query_map(params![owner_id, lim], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            match serde_json::from_str::<Conversation>(&raw?) {
                Ok(conv) => out.push(conv),
                Err(e) => log::warn!("skipping stale cache row: {e}"),
            }
        }
        Ok(out)
    }

    /// Unix seconds of the newest activity recorded for a conversation.
    pub fn last_activity(&self, id: &str) -> Result<Option<i64>> {
        let ts = self
            .conn
            .query_row(
                "SELECT last_activity FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM conversations", [])?;
        Ok(())
    }
}

//! Keyed storage of MCP server records (owner + name).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::{debug, info},
};

use crate::{
    error::{Context, Error, Result},
    registry::McpServerRecord,
};

/// Persistence for server records.
///
/// Implementations are internally synchronized and shared as
/// `Arc<dyn ServerRecordStore>`. Every error is reported as
/// [`Error::Persistence`].
#[async_trait]
pub trait ServerRecordStore: Send + Sync {
    /// Records owned by `owner`, sorted by name.
    async fn list(&self, owner: i64) -> Result<Vec<McpServerRecord>>;

    /// Every record across all owners.
    async fn list_all(&self) -> Result<Vec<McpServerRecord>>;

    async fn get_by_id(&self, owner: i64, id: i64) -> Result<Option<McpServerRecord>>;

    /// Insert or replace the record keyed by `(owner, record.name)`. The
    /// returned record carries the stable id.
    async fn upsert(&self, owner: i64, record: McpServerRecord) -> Result<McpServerRecord>;

    /// Returns whether a record was removed.
    async fn delete(&self, owner: i64, name: &str) -> Result<bool>;
}

/// Owner-keyed record table shared by both store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RecordTable {
    #[serde(default)]
    next_id: i64,
    #[serde(default)]
    servers: BTreeMap<i64, BTreeMap<String, McpServerRecord>>,
}

impl RecordTable {
    fn list(&self, owner: i64) -> Vec<McpServerRecord> {
        self.servers
            .get(&owner)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn list_all(&self) -> Vec<McpServerRecord> {
        self.servers
            .values()
            .flat_map(|m| m.values().cloned())
            .collect()
    }

    fn get_by_id(&self, owner: i64, id: i64) -> Option<McpServerRecord> {
        self.servers
            .get(&owner)?
            .values()
            .find(|r| r.id == id)
            .cloned()
    }

    fn upsert(&mut self, owner: i64, mut record: McpServerRecord) -> Result<McpServerRecord> {
        let name = record.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::persistence("server name must not be empty"));
        }
        let by_name = self.servers.entry(owner).or_default();
        record.id = match by_name.get(&name) {
            Some(existing) => existing.id,
            None => {
                self.next_id += 1;
                self.next_id
            },
        };
        record.owner_id = owner;
        record.name = name.clone();
        by_name.insert(name, record.clone());
        Ok(record)
    }

    fn delete(&mut self, owner: i64, name: &str) -> bool {
        let Some(by_name) = self.servers.get_mut(&owner) else {
            return false;
        };
        let removed = by_name.remove(name).is_some();
        if by_name.is_empty() {
            self.servers.remove(&owner);
        }
        removed
    }
}

// ── In-memory store ─────────────────────────────────────────────────────────

/// Process-lifetime store.
#[derive(Default)]
pub struct MemoryServerStore {
    table: RwLock<RecordTable>,
}

impl MemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerRecordStore for MemoryServerStore {
    async fn list(&self, owner: i64) -> Result<Vec<McpServerRecord>> {
        Ok(self.table.read().await.list(owner))
    }

    async fn list_all(&self) -> Result<Vec<McpServerRecord>> {
        Ok(self.table.read().await.list_all())
    }

    async fn get_by_id(&self, owner: i64, id: i64) -> Result<Option<McpServerRecord>> {
        Ok(self.table.read().await.get_by_id(owner, id))
    }

    async fn upsert(&self, owner: i64, record: McpServerRecord) -> Result<McpServerRecord> {
        self.table.write().await.upsert(owner, record)
    }

    async fn delete(&self, owner: i64, name: &str) -> Result<bool> {
        Ok(self.table.write().await.delete(owner, name))
    }
}

// ── JSON file store ─────────────────────────────────────────────────────────

/// JSON file store. The whole table is rewritten on every mutation; the file
/// is created with 0600 permissions on Unix.
pub struct FileServerStore {
    path: PathBuf,
    table: RwLock<RecordTable>,
}

impl FileServerStore {
    /// Load from `path`, or start empty if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        let table = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            debug!(path = %path.display(), "server store not found, using empty");
            RecordTable::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            table: RwLock::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, table: &RecordTable) -> Result<()> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let data = serde_json::to_string_pretty(table)?;
            std::fs::write(&self.path, data)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
            }
            Ok(())
        };
        write().with_context(|| format!("failed to write {}", self.path.display()))?;
        debug!(path = %self.path.display(), "saved server store");
        Ok(())
    }
}

#[async_trait]
impl ServerRecordStore for FileServerStore {
    async fn list(&self, owner: i64) -> Result<Vec<McpServerRecord>> {
        Ok(self.table.read().await.list(owner))
    }

    async fn list_all(&self) -> Result<Vec<McpServerRecord>> {
        Ok(self.table.read().await.list_all())
    }

    async fn get_by_id(&self, owner: i64, id: i64) -> Result<Option<McpServerRecord>> {
        Ok(self.table.read().await.get_by_id(owner, id))
    }

    async fn upsert(&self, owner: i64, record: McpServerRecord) -> Result<McpServerRecord> {
        let mut table = self.table.write().await;
        // Only a table that reached disk becomes visible.
        let mut next = table.clone();
        let saved = next.upsert(owner, record)?;
        self.save(&next)?;
        *table = next;
        info!(server = %saved.name, owner, id = saved.id, "saved MCP server record");
        Ok(saved)
    }

    async fn delete(&self, owner: i64, name: &str) -> Result<bool> {
        let mut table = self.table.write().await;
        let mut next = table.clone();
        if !next.delete(owner, name) {
            return Ok(false);
        }
        self.save(&next)?;
        *table = next;
        info!(server = %name, owner, "removed MCP server record");
        Ok(true)
    }
}

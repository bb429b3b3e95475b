//! SQLite implementation of the RegistryStore trait.
//!
//! This is the persistent backend for a capseal registry. It uses rusqlite
//! with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use capseal_core::{now_millis, BlockNumber, CapabilityId, Identity};

use crate::error::{RegistryError, Result};
use crate::migration;
use crate::record::{Capability, RecordChange};
use crate::traits::RegistryStore;
use crate::tx::LedgerEvent;

/// SQLite-based registry store.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteRegistryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRegistryStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                RegistryError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            RegistryError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

fn identity_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Identity> {
    let bytes: Vec<u8> = row.get(idx)?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, "identity".into(), rusqlite::types::Type::Blob)
    })?;
    Ok(Identity::from_bytes(arr))
}

fn row_to_capability(row: &rusqlite::Row<'_>) -> rusqlite::Result<Capability> {
    Ok(Capability {
        id: CapabilityId::new(row.get::<_, i64>(0)? as u64),
        owner: identity_column(row, 1)?,
        creator: identity_column(row, 2)?,
        content_pointer: row.get(3)?,
        created_at_block: row.get::<_, i64>(4)? as u64,
    })
}

fn encode_event(event: &LedgerEvent) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(event, &mut buf)
        .map_err(|e| RegistryError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_event(bytes: &[u8]) -> Result<LedgerEvent> {
    ciborium::from_reader(bytes).map_err(|e| RegistryError::Serialization(e.to_string()))
}

fn apply_change(tx: &rusqlite::Transaction<'_>, change: &RecordChange) -> Result<()> {
    let id = change.capability_id();
    let touched = match change {
        RecordChange::Insert(capability) => {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO capabilities (
                    capability_id, owner, creator, content_pointer, created_at_block, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    capability.id.get() as i64,
                    capability.owner.as_bytes().as_slice(),
                    capability.creator.as_bytes().as_slice(),
                    capability.content_pointer,
                    capability.created_at_block as i64,
                    now_millis(),
                ],
            )?;
            if inserted == 0 {
                return Err(RegistryError::InvalidData(format!(
                    "capability {id} already exists"
                )));
            }
            inserted
        }
        RecordChange::SetOwner { owner, .. } => tx.execute(
            "UPDATE capabilities SET owner = ?1, updated_at = ?2 WHERE capability_id = ?3",
            params![owner.as_bytes().as_slice(), now_millis(), id.get() as i64],
        )?,
        RecordChange::SetContentPointer { pointer, .. } => tx.execute(
            "UPDATE capabilities SET content_pointer = ?1, updated_at = ?2
             WHERE capability_id = ?3",
            params![pointer, now_millis(), id.get() as i64],
        )?,
    };
    if touched == 0 {
        return Err(RegistryError::NotFound(id));
    }
    Ok(())
}

#[async_trait]
impl RegistryStore for SqliteRegistryStore {
    async fn get_capability(&self, id: CapabilityId) -> Result<Option<Capability>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT capability_id, owner, creator, content_pointer, created_at_block
                 FROM capabilities WHERE capability_id = ?1",
                params![id.get() as i64],
                row_to_capability,
            )
            .optional()
            .map_err(RegistryError::from)
        })
        .await
    }

    async fn last_capability_id(&self) -> Result<Option<CapabilityId>> {
        self.run(|conn| {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(capability_id) FROM capabilities", [], |row| {
                    row.get(0)
                })?;
            Ok(max.map(|n| CapabilityId::new(n as u64)))
        })
        .await
    }

    async fn commit_block(
        &self,
        number: BlockNumber,
        changes: &[RecordChange],
        events: &[LedgerEvent],
    ) -> Result<()> {
        let changes = changes.to_vec();
        let encoded = events
            .iter()
            .map(|event| Ok((event.capability_id(), encode_event(event)?)))
            .collect::<Result<Vec<_>>>()?;

        self.run(move |conn| {
            // Dropping the transaction on any error rolls everything back.
            let tx = conn.transaction()?;

            let height: i64 = tx.query_row(
                "SELECT COALESCE(MAX(block_number), 0) FROM blocks",
                [],
                |row| row.get(0),
            )?;
            if number != height as u64 + 1 {
                return Err(RegistryError::InvalidData(format!(
                    "block {} does not follow height {}",
                    number, height
                )));
            }

            for change in &changes {
                apply_change(&tx, change)?;
            }

            tx.execute(
                "INSERT INTO blocks (block_number, sealed_at) VALUES (?1, ?2)",
                params![number as i64, now_millis()],
            )?;
            for (index, (capability_id, bytes)) in encoded.iter().enumerate() {
                tx.execute(
                    "INSERT INTO events (block_number, log_index, capability_id, event)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        number as i64,
                        index as i64,
                        capability_id.get() as i64,
                        bytes
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn block_height(&self) -> Result<BlockNumber> {
        self.run(|conn| {
            let height: i64 = conn.query_row(
                "SELECT COALESCE(MAX(block_number), 0) FROM blocks",
                [],
                |row| row.get(0),
            )?;
            Ok(height as u64)
        })
        .await
    }

    async fn events_in_block(&self, number: BlockNumber) -> Result<Vec<LedgerEvent>> {
        let rows = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT event FROM events WHERE block_number = ?1 ORDER BY log_index",
                )?;
                let rows = stmt
                    .query_map(params![number as i64], |row| row.get::<_, Vec<u8>>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.iter().map(|bytes| decode_event(bytes)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capseal_core::Keypair;

    fn identity(seed: u8) -> Identity {
        Keypair::from_seed(&[seed; 32]).identity()
    }

    fn insert(n: u64, block: BlockNumber) -> RecordChange {
        RecordChange::Insert(Capability::new(CapabilityId::new(n), identity(1), block))
    }

    #[tokio::test]
    async fn test_commit_and_get_capability() {
        let store = SqliteRegistryStore::open_memory().unwrap();
        let record = Capability::new(CapabilityId::FIRST, identity(1), 1);

        store
            .commit_block(1, &[RecordChange::Insert(record.clone())], &[])
            .await
            .unwrap();
        let retrieved = store
            .get_capability(CapabilityId::FIRST)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retrieved, record);

        assert!(store
            .commit_block(2, &[RecordChange::Insert(record)], &[])
            .await
            .is_err());
        assert_eq!(store.block_height().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_owner_and_pointer_updates() {
        let store = SqliteRegistryStore::open_memory().unwrap();
        let id = CapabilityId::FIRST;
        store.commit_block(1, &[insert(1, 1)], &[]).await.unwrap();
        store
            .commit_block(
                2,
                &[
                    RecordChange::SetOwner {
                        id,
                        owner: identity(2),
                    },
                    RecordChange::SetContentPointer {
                        id,
                        pointer: "data:,encrypted_pending".into(),
                    },
                ],
                &[],
            )
            .await
            .unwrap();

        let record = store.get_capability(id).await.unwrap().unwrap();
        assert_eq!(record.owner, identity(2));
        assert_eq!(record.creator, identity(1));
        assert_eq!(
            record.content_pointer.as_deref(),
            Some("data:,encrypted_pending")
        );

        let missing = RecordChange::SetContentPointer {
            id: CapabilityId::new(5),
            pointer: "x".into(),
        };
        assert!(matches!(
            store.commit_block(3, &[missing], &[]).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let store = SqliteRegistryStore::open_memory().unwrap();
        let created = LedgerEvent::CapabilityCreated {
            id: CapabilityId::FIRST,
            creator: identity(1),
        };
        let dangling = RecordChange::SetOwner {
            id: CapabilityId::new(7),
            owner: identity(2),
        };

        assert!(store
            .commit_block(1, &[insert(1, 1), dangling], &[created])
            .await
            .is_err());

        assert_eq!(store.get_capability(CapabilityId::FIRST).await.unwrap(), None);
        assert_eq!(store.last_capability_id().await.unwrap(), None);
        assert_eq!(store.block_height().await.unwrap(), 0);
        assert!(store.events_in_block(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocks_and_events() {
        let store = SqliteRegistryStore::open_memory().unwrap();
        let created = LedgerEvent::CapabilityCreated {
            id: CapabilityId::FIRST,
            creator: identity(1),
        };
        let transferred = LedgerEvent::OwnershipTransferred {
            id: CapabilityId::FIRST,
            from: identity(1),
            to: identity(2),
        };

        store
            .commit_block(1, &[insert(1, 1)], &[created.clone()])
            .await
            .unwrap();
        store
            .commit_block(
                2,
                &[RecordChange::SetOwner {
                    id: CapabilityId::FIRST,
                    owner: identity(2),
                }],
                &[transferred.clone()],
            )
            .await
            .unwrap();

        assert_eq!(store.block_height().await.unwrap(), 2);
        assert_eq!(store.events_in_block(1).await.unwrap(), vec![created]);
        assert_eq!(store.events_in_block(2).await.unwrap(), vec![transferred]);
        assert!(store.commit_block(2, &[], &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_reopen_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        {
            let store = SqliteRegistryStore::open(&path).unwrap();
            store
                .commit_block(1, &[insert(1, 1), insert(2, 1)], &[])
                .await
                .unwrap();
        }

        let store = SqliteRegistryStore::open(&path).unwrap();
        assert_eq!(
            store.last_capability_id().await.unwrap(),
            Some(CapabilityId::new(2))
        );
        assert_eq!(store.block_height().await.unwrap(), 1);
    }
}

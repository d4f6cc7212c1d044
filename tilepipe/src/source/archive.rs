//! Read-only SQLite tile archive lookup.
//!
//! Archives are bulk-downloaded offline packs: a single SQLite file with a
//! `tiles(key INTEGER PRIMARY KEY, provider TEXT, tile BLOB)` table, keyed
//! by the packed index from [`TileKey::pack`]. Archives are immutable once
//! produced; this source never writes.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

use crate::coord::TileKey;

/// Errors from opening or querying a tile archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file could not be opened as a SQLite database.
    #[error("cannot open archive {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The database lacks the expected `tiles` table.
    #[error("archive {0} has no tiles table")]
    MissingTilesTable(PathBuf),

    /// A query failed; the archive is treated as corrupt and skipped.
    #[error("archive query failed: {0}")]
    Corrupt(#[from] rusqlite::Error),
}

/// One read-only tile archive.
///
/// The provider chain registers any number of archives and tries them in
/// registration order; a failing archive is skipped, never fatal.
pub struct ArchiveSource {
    path: PathBuf,
    // rusqlite connections are Send but not Sync; one lock per archive
    // handle serializes worker access.
    conn: Mutex<Connection>,
    provider_filter: Option<String>,
}

impl ArchiveSource {
    /// Opens an archive file read-only and validates its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| ArchiveError::Open {
            path: path.clone(),
            source,
        })?;

        let has_table: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'tiles'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| ArchiveError::Open {
                path: path.clone(),
                source,
            })?;
        if has_table.is_none() {
            return Err(ArchiveError::MissingTilesTable(path));
        }

        Ok(Self {
            path,
            conn: Mutex::new(conn),
            provider_filter: None,
        })
    }

    /// Restricts lookups to rows whose `provider` column matches `name`.
    ///
    /// Without a filter, any provider's blob under the packed key is
    /// returned (archives bundling one tile set omit meaningful provider
    /// values).
    pub fn with_provider_filter(mut self, name: impl Into<String>) -> Self {
        self.provider_filter = Some(name.into());
        self
    }

    /// Path this archive was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up one tile by its packed key.
    ///
    /// `Ok(None)` means the archive simply does not contain the tile; the
    /// chain continues. `Err` means the archive misbehaved and should be
    /// skipped for this request.
    pub fn get(&self, key: &TileKey) -> Result<Option<Bytes>, ArchiveError> {
        let index = key.pack();
        let conn = self.conn.lock();

        let blob: Option<Vec<u8>> = match &self.provider_filter {
            Some(provider) => conn
                .query_row(
                    "SELECT tile FROM tiles WHERE key = ?1 AND provider = ?2",
                    rusqlite::params![index, provider],
                    |row| row.get(0),
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT tile FROM tiles WHERE key = ?1",
                    rusqlite::params![index],
                    |row| row.get(0),
                )
                .optional()?,
        };

        Ok(blob.map(Bytes::from))
    }

    /// Number of tiles stored in the archive.
    pub fn tile_count(&self) -> Result<u64, ArchiveError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

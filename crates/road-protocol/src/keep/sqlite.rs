use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use super::{Keep, LocalRecord, RemoteRecord};
use crate::types::{AutoMode, HostAddr, Tristate, Uid};
use crate::RoadError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS local (
        id          INTEGER PRIMARY KEY CHECK (id = 0),
        name        TEXT NOT NULL,
        uid         INTEGER NOT NULL,
        host_addr   TEXT NOT NULL,
        signing_seed BLOB NOT NULL,
        box_secret  BLOB NOT NULL,
        main        INTEGER NOT NULL,
        auto        TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS remote (
        uid         INTEGER PRIMARY KEY,
        far_uid     INTEGER NOT NULL,
        name        TEXT NOT NULL,
        host_addr   TEXT NOT NULL,
        verify_key  BLOB,
        public_key  BLOB,
        joined      INTEGER
    );
";

/// Keep backed by a SQLite database file.
pub struct SqliteKeep {
    conn: Connection,
}

impl SqliteKeep {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RoadError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Private database that lives as long as the keep.
    pub fn in_memory() -> Result<Self, RoadError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

fn key(bytes: Vec<u8>) -> Result<[u8; 32], RoadError> {
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| RoadError::Keep(format!("stored key has {} bytes", b.len())))
}

fn addr(text: &str) -> Result<HostAddr, RoadError> {
    text.parse()
        .map_err(|e| RoadError::Keep(format!("stored address {text:?}: {e}")))
}

/// Raw remote row before validation.
struct RemoteRow {
    uid: Uid,
    far_uid: Uid,
    name: String,
    host_addr: String,
    verify_key: Option<Vec<u8>>,
    public_key: Option<Vec<u8>>,
    joined: Option<bool>,
}

impl RemoteRow {
    fn into_record(self) -> Result<RemoteRecord, RoadError> {
        Ok(RemoteRecord {
            uid: self.uid,
            far_uid: self.far_uid,
            name: self.name,
            host_addr: addr(&self.host_addr)?,
            verify_key: self.verify_key.map(key).transpose()?,
            public_key: self.public_key.map(key).transpose()?,
            joined: Tristate::from_option(self.joined),
        })
    }
}

impl Keep for SqliteKeep {
    fn load_local(&self) -> Result<Option<LocalRecord>, RoadError> {
        let row = self
            .conn
            .query_row(
                "SELECT name, uid, host_addr, signing_seed, box_secret, main, auto
                 FROM local WHERE id = 0",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Uid>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                        row.get::<_, bool>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, uid, host_addr, seed, secret, main, auto)) = row else {
            return Ok(None);
        };
        Ok(Some(LocalRecord {
            name,
            uid,
            host_addr: addr(&host_addr)?,
            signing_seed: key(seed)?,
            box_secret: key(secret)?,
            main,
            auto: auto.parse::<AutoMode>().map_err(RoadError::Keep)?,
        }))
    }

    fn save_local(&mut self, record: &LocalRecord) -> Result<(), RoadError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO local
                (id, name, uid, host_addr, signing_seed, box_secret, main, auto)
             VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.name,
                record.uid,
                record.host_addr.to_string(),
                &record.signing_seed[..],
                &record.box_secret[..],
                record.main,
                record.auto.as_str(),
            ],
        )?;
        Ok(())
    }

    fn load_remotes(&self) -> Result<Vec<RemoteRecord>, RoadError> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, far_uid, name, host_addr, verify_key, public_key, joined
             FROM remote ORDER BY uid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RemoteRow {
                uid: row.get(0)?,
                far_uid: row.get(1)?,
                name: row.get(2)?,
                host_addr: row.get(3)?,
                verify_key: row.get(4)?,
                public_key: row.get(5)?,
                joined: row.get(6)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    fn save_remote(&mut self, record: &RemoteRecord) -> Result<(), RoadError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO remote
                (uid, far_uid, name, host_addr, verify_key, public_key, joined)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.uid,
                record.far_uid,
                record.name,
                record.host_addr.to_string(),
                record.verify_key.as_ref().map(|k| &k[..]),
                record.public_key.as_ref().map(|k| &k[..]),
                record.joined.to_option(),
            ],
        )?;
        Ok(())
    }

    fn delete_remote(&mut self, uid: Uid) -> Result<(), RoadError> {
        self.conn
            .execute("DELETE FROM remote WHERE uid = ?1", params![uid])?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), RoadError> {
        self.conn
            .execute_batch("DELETE FROM local; DELETE FROM remote;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keep::fixtures;

    #[test]
    fn sqlite_keep_contract() {
        fixtures::exercise(&mut SqliteKeep::in_memory().unwrap());
    }

    #[test]
    fn sqlite_keep_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("road.db");

        {
            let mut keep = SqliteKeep::open(&path).unwrap();
            keep.save_local(&fixtures::local("main")).unwrap();
            keep.save_remote(&fixtures::remote(1, "alpha")).unwrap();
        }

        let keep = SqliteKeep::open(&path).unwrap();
        assert_eq!(keep.load_local().unwrap(), Some(fixtures::local("main")));
        assert_eq!(keep.load_remotes().unwrap(), vec![fixtures::remote(1, "alpha")]);
    }

    #[test]
    fn corrupt_key_is_reported() {
        let mut keep = SqliteKeep::in_memory().unwrap();
        keep.save_remote(&fixtures::remote(1, "alpha")).unwrap();
        keep.conn
            .execute("UPDATE remote SET verify_key = x'0102' WHERE uid = 1", [])
            .unwrap();
        assert!(matches!(keep.load_remotes(), Err(RoadError::Keep(_))));
    }
}

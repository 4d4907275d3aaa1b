use std::path::Path;

use rusqlite::{params, Connection, Error, OpenFlags, OptionalExtension, Row, Transaction};

use crate::domain::Storage;
use kernel::{Pack, PackVersion};

const CACHE_SIZE: &str = "4096";

pub enum Mode {
    ReadWrite,
    ReadOnly,
}

pub struct Sqlite {
    conn: Connection,
}

impl Storage for Sqlite {
    type Err = Error;

    fn new_database(&self) -> Result<(), Self::Err> {
        self.pragma_update("encoding", "UTF-8")?;

        self.conn.execute(
            "CREATE TABLE pack (
                  id          TEXT PRIMARY KEY,
                  position    INTEGER NOT NULL DEFAULT 0,
                  name        TEXT,
                  thumbnail   TEXT,
                  background  TEXT,
                  status      TEXT,
                  jvm_args    TEXT
                  )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE version (
                  pack_id     TEXT NOT NULL REFERENCES pack(id) ON DELETE CASCADE,
                  version_id  TEXT,
                  name        TEXT,
                  archive     TEXT,
                  size        TEXT,
                  changelog   TEXT,
                  date        TEXT,
                  visible     INTEGER,
                  clean       INTEGER,
                  is_main     INTEGER NOT NULL DEFAULT 0,
                  position    INTEGER NOT NULL DEFAULT 0
                  )",
            [],
        )?;

        self.conn
            .execute("CREATE INDEX version_pack_ix ON version(pack_id)", [])?;
        self.conn
            .execute("CREATE INDEX version_archive_ix ON version(archive)", [])?;

        self.conn.execute(
            "CREATE TABLE screenshot (
                  pack_id     TEXT NOT NULL REFERENCES pack(id) ON DELETE CASCADE,
                  file        TEXT NOT NULL,
                  position    INTEGER NOT NULL DEFAULT 0
                  )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE username (
                  id          INTEGER PRIMARY KEY AUTOINCREMENT,
                  username    TEXT NOT NULL UNIQUE
                  )",
            [],
        )?;

        Ok(())
    }

    fn insert_pack(&mut self, pack: &Pack) -> Result<(), Self::Err> {
        let tx = self.conn.transaction()?;
        tx.prepare_cached(
            "INSERT INTO pack (id, position, name, thumbnail, background, status, jvm_args)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?
        .execute(params![
            pack.id,
            pack.index,
            pack.name,
            pack.thumbnail,
            pack.background,
            pack.status,
            pack.jvm_args
        ])?;
        write_children(&tx, pack)?;
        tx.commit()
    }

    fn get_packs(&mut self) -> Result<Vec<Pack>, Self::Err> {
        let mut stmt = self.conn.prepare(
            "SELECT id, position, name, thumbnail, background, status, jvm_args
                 FROM pack ORDER BY position, id",
        )?;
        let shells = stmt
            .query_map([], pack_from_row)?
            .collect::<Result<Vec<Pack>, Error>>()?;
        drop(stmt);

        shells
            .into_iter()
            .map(|shell| self.load_children(shell))
            .collect()
    }

    fn get_pack(&mut self, id: &str) -> Result<Pack, Self::Err> {
        let shell = self.conn.query_row(
            "SELECT id, position, name, thumbnail, background, status, jvm_args
                 FROM pack WHERE id = ?1",
            [id],
            pack_from_row,
        )?;
        self.load_children(shell)
    }

    fn update_pack(&mut self, pack: &Pack) -> Result<(), Self::Err> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE pack SET position = ?2, name = ?3, thumbnail = ?4, background = ?5,
                 status = ?6, jvm_args = ?7 WHERE id = ?1",
            params![
                pack.id,
                pack.index,
                pack.name,
                pack.thumbnail,
                pack.background,
                pack.status,
                pack.jvm_args
            ],
        )?;
        tx.execute("DELETE FROM version WHERE pack_id = ?1", [&pack.id])?;
        tx.execute("DELETE FROM screenshot WHERE pack_id = ?1", [&pack.id])?;
        write_children(&tx, pack)?;
        tx.commit()
    }

    fn delete_pack(&mut self, id: &str) -> Result<usize, Self::Err> {
        self.conn.execute("DELETE FROM pack WHERE id = ?1", [id])
    }

    fn delete_version(
        &mut self,
        pack_id: &str,
        version_id: &str,
    ) -> Result<Option<PackVersion>, Self::Err> {
        let tx = self.conn.transaction()?;
        let found = tx
            .query_row(
                "SELECT rowid, version_id, name, archive, size, changelog, date, visible, clean
                     FROM version
                     WHERE pack_id = ?1 AND version_id = ?2 AND is_main = 0
                     LIMIT 1",
                params![pack_id, version_id],
                |row| Ok((row.get::<_, i64>("rowid")?, version_from_row(row)?)),
            )
            .optional()?;

        let Some((rowid, version)) = found else {
            return Ok(None);
        };
        tx.execute("DELETE FROM version WHERE rowid = ?1", [rowid])?;
        tx.commit()?;
        Ok(Some(version))
    }

    fn asset_reference_count(&mut self, file_name: &str) -> Result<i64, Self::Err> {
        self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM pack WHERE thumbnail = ?1)
                  + (SELECT COUNT(*) FROM pack WHERE background = ?1)
                  + (SELECT COUNT(*) FROM version WHERE archive = ?1)
                  + (SELECT COUNT(*) FROM screenshot WHERE file = ?1)",
            [file_name],
            |row| row.get(0),
        )
    }

    fn insert_username(&mut self, username: &str) -> Result<(), Self::Err> {
        self.conn
            .execute("INSERT INTO username (username) VALUES (?1)", [username])?;
        Ok(())
    }

    fn username_exists(&mut self, username: &str) -> Result<bool, Self::Err> {
        let mut stmt = self
            .conn
            .prepare("SELECT username FROM username WHERE username = ?1")?;
        stmt.exists([username])
    }

    fn get_usernames(&mut self) -> Result<Vec<String>, Self::Err> {
        let mut stmt = self
            .conn
            .prepare("SELECT username FROM username ORDER BY id")?;
        let names = stmt.query_map([], |row| row.get(0))?;
        names.collect()
    }

    fn delete_username(&mut self, username: &str) -> Result<usize, Self::Err> {
        self.conn
            .execute("DELETE FROM username WHERE username = ?1", [username])
    }
}

impl Sqlite {
    pub fn open<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self, Error> {
        let conn = match mode {
            Mode::ReadWrite => Connection::open(path),
            Mode::ReadOnly => Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY),
        };
        let this = Self { conn: conn? };
        this.pragma_update("foreign_keys", "ON")?;
        this.pragma_update("cache_size", CACHE_SIZE)?;
        if let Mode::ReadWrite = mode {
            this.pragma_update("synchronous", "FULL")?;
        }
        Ok(this)
    }

    fn pragma_update(&self, name: &str, value: &str) -> Result<(), Error> {
        self.conn.pragma_update(None, name, value)
    }

    fn load_children(&self, mut pack: Pack) -> Result<Pack, Error> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT version_id, name, archive, size, changelog, date, visible, clean
                 FROM version WHERE pack_id = ?1 AND is_main = 1 LIMIT 1",
        )?;
        pack.main_version = stmt
            .query_row([&pack.id], version_from_row)
            .optional()?;

        let mut stmt = self.conn.prepare_cached(
            "SELECT version_id, name, archive, size, changelog, date, visible, clean
                 FROM version WHERE pack_id = ?1 AND is_main = 0 ORDER BY position",
        )?;
        pack.versions = stmt
            .query_map([&pack.id], version_from_row)?
            .collect::<Result<Vec<PackVersion>, Error>>()?;

        let mut stmt = self
            .conn
            .prepare_cached("SELECT file FROM screenshot WHERE pack_id = ?1 ORDER BY position")?;
        pack.screenshots = stmt
            .query_map([&pack.id], |row| row.get(0))?
            .collect::<Result<Vec<String>, Error>>()?;

        Ok(pack)
    }
}

fn pack_from_row(row: &Row<'_>) -> Result<Pack, Error> {
    Ok(Pack {
        id: row.get("id")?,
        index: row.get("position")?,
        name: row.get("name")?,
        thumbnail: row.get("thumbnail")?,
        background: row.get("background")?,
        status: row.get("status")?,
        jvm_args: row.get("jvm_args")?,
        main_version: None,
        versions: Vec::new(),
        screenshots: Vec::new(),
    })
}

fn version_from_row(row: &Row<'_>) -> Result<PackVersion, Error> {
    Ok(PackVersion {
        id: row.get("version_id")?,
        name: row.get("name")?,
        zip: row.get("archive")?,
        size: row.get("size")?,
        changelog: row.get("changelog")?,
        date: row.get("date")?,
        visible: row.get("visible")?,
        clean: row.get("clean")?,
    })
}

fn write_children(tx: &Transaction<'_>, pack: &Pack) -> Result<(), Error> {
    let mut insert = tx.prepare_cached(
        "INSERT INTO version
             (pack_id, version_id, name, archive, size, changelog, date, visible, clean, is_main, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    if let Some(main) = &pack.main_version {
        insert.execute(params![
            pack.id, main.id, main.name, main.zip, main.size, main.changelog, main.date,
            main.visible, main.clean, true, 0
        ])?;
    }
    for (position, version) in pack.versions.iter().enumerate() {
        insert.execute(params![
            pack.id,
            version.id,
            version.name,
            version.zip,
            version.size,
            version.changelog,
            version.date,
            version.visible,
            version.clean,
            false,
            position as i64
        ])?;
    }
    drop(insert);

    let mut insert = tx
        .prepare_cached("INSERT INTO screenshot (pack_id, file, position) VALUES (?1, ?2, ?3)")?;
    for (position, file) in pack.screenshots.iter().enumerate() {
        insert.execute(params![pack.id, file, position as i64])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use uuid::Uuid;

    fn open_store() -> Sqlite {
        let db = env::temp_dir().join(format!("packstore_db_{}.db", Uuid::new_v4()));
        let store = Sqlite::open(db, Mode::ReadWrite).unwrap();
        store.new_database().unwrap();
        store
    }

    fn sample_pack(id: &str) -> Pack {
        Pack {
            id: id.to_owned(),
            index: 2,
            name: Some("Sample".to_owned()),
            thumbnail: Some("thumb.png".to_owned()),
            background: Some("bg.png".to_owned()),
            main_version: Some(PackVersion {
                id: Some("v2".to_owned()),
                zip: Some("sample-2.zip".to_owned()),
                ..PackVersion::default()
            }),
            status: Some("live".to_owned()),
            jvm_args: Some("-Xmx4G".to_owned()),
            versions: vec![
                PackVersion {
                    id: Some("v1".to_owned()),
                    zip: Some("sample-1.zip".to_owned()),
                    visible: Some(false),
                    ..PackVersion::default()
                },
                PackVersion {
                    id: Some("v2".to_owned()),
                    zip: Some("sample-2.zip".to_owned()),
                    visible: Some(true),
                    ..PackVersion::default()
                },
            ],
            screenshots: vec!["shot-1.png".to_owned(), "shot-2.png".to_owned()],
        }
    }

    #[test]
    fn pack_round_trip() {
        let mut store = open_store();
        let pack = sample_pack("100");

        store.insert_pack(&pack).unwrap();
        let loaded = store.get_pack("100").unwrap();

        assert_eq!(loaded, pack);
    }

    #[test]
    fn update_replaces_versions_and_screenshots() {
        let mut store = open_store();
        let mut pack = sample_pack("100");
        store.insert_pack(&pack).unwrap();

        pack.versions.truncate(1);
        pack.screenshots = vec!["other.png".to_owned()];
        pack.thumbnail = Some("new-thumb.png".to_owned());
        store.update_pack(&pack).unwrap();

        let loaded = store.get_pack("100").unwrap();
        assert_eq!(loaded, pack);
    }

    #[test]
    fn delete_pack_cascades_to_children() {
        let mut store = open_store();
        store.insert_pack(&sample_pack("100")).unwrap();

        assert_eq!(store.delete_pack("100").unwrap(), 1);
        assert!(store.get_pack("100").is_err());
        assert_eq!(store.asset_reference_count("sample-1.zip").unwrap(), 0);
        assert_eq!(store.asset_reference_count("shot-1.png").unwrap(), 0);
    }

    #[test]
    fn delete_version_removes_one_listed_entry() {
        let mut store = open_store();
        store.insert_pack(&sample_pack("100")).unwrap();

        let removed = store.delete_version("100", "v1").unwrap().unwrap();
        assert_eq!(removed.zip.as_deref(), Some("sample-1.zip"));

        let loaded = store.get_pack("100").unwrap();
        assert_eq!(loaded.versions.len(), 1);
        // the main version row must be untouched
        assert!(loaded.main_version.is_some());

        assert!(store.delete_version("100", "v1").unwrap().is_none());
    }

    #[test]
    fn reference_count_spans_all_asset_fields() {
        let mut store = open_store();
        store.insert_pack(&sample_pack("100")).unwrap();

        assert_eq!(store.asset_reference_count("thumb.png").unwrap(), 1);
        assert_eq!(store.asset_reference_count("bg.png").unwrap(), 1);
        assert_eq!(store.asset_reference_count("shot-2.png").unwrap(), 1);
        assert_eq!(store.asset_reference_count("sample-1.zip").unwrap(), 1);
        // main version and the listed copy both count
        assert_eq!(store.asset_reference_count("sample-2.zip").unwrap(), 2);
        assert_eq!(store.asset_reference_count("unknown.bin").unwrap(), 0);
    }

    #[test]
    fn usernames_are_unique() {
        let mut store = open_store();

        store.insert_username("alice").unwrap();
        assert!(store.insert_username("alice").is_err());
        assert!(store.username_exists("alice").unwrap());
        assert!(!store.username_exists("bob").unwrap());
        assert_eq!(store.get_usernames().unwrap(), vec!["alice".to_owned()]);
        assert_eq!(store.delete_username("alice").unwrap(), 1);
        assert_eq!(store.delete_username("alice").unwrap(), 0);
    }
}

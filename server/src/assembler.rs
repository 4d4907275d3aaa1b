use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::blobs::{base_name, BlobStore, Category};
use crate::error::AssetError;

/// Reassembles archives uploaded as a sequence of chunks.
///
/// Each chunk lands in `temp/<logical_filename>/<chunk_index>`; the staged
/// files are concatenated into the archives category once the final chunk
/// arrives. Re-sending a chunk index overwrites the staged file, so retries
/// are last-write-wins. Chunks for one logical filename are expected to come
/// from a single producer; nothing coordinates concurrent writers of the
/// same index beyond the filesystem itself.
pub struct ChunkAssembler {
    staging_root: PathBuf,
    dest_dir: PathBuf,
}

/// Result of [`ChunkAssembler::receive_chunk`].
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks are expected.
    Pending,
    /// The final chunk arrived and the destination file is complete.
    Assembled { final_path: PathBuf },
}

impl ChunkAssembler {
    #[must_use]
    pub fn new(blobs: &BlobStore) -> Self {
        Self {
            staging_root: blobs.staging_root(),
            dest_dir: blobs.dir(Category::Archives),
        }
    }

    fn staging_dir(&self, file_name: &str) -> PathBuf {
        self.staging_root.join(base_name(file_name))
    }

    /// Persists one chunk and assembles the destination file when the chunk
    /// carrying the final index arrives.
    ///
    /// Assembly is triggered by the identity of the last index, not by a
    /// count of distinct chunks received: if the final index arrives while an
    /// earlier index is still missing, the call fails with
    /// [`AssetError::MissingChunk`] and the staging directory is kept so the
    /// client can resubmit.
    pub fn receive_chunk(
        &self,
        file_name: &str,
        index: u64,
        total: u64,
        bytes: &[u8],
    ) -> Result<ChunkOutcome, AssetError> {
        if total == 0 || index >= total {
            return Err(AssetError::InvalidChunkRange { index, total });
        }

        let staging = self.staging_dir(file_name);
        fs::create_dir_all(&staging)?;
        fs::write(staging.join(index.to_string()), bytes)?;
        tracing::debug!("staged chunk {index}/{total} of '{file_name}'");

        if index + 1 == total {
            self.assemble(file_name, total)
        } else {
            Ok(ChunkOutcome::Pending)
        }
    }

    /// Concatenates staged chunks `0..total` in index order.
    ///
    /// The destination is only created after every staged chunk has been
    /// confirmed present, so no reader ever observes a partially written
    /// archive under its final name.
    fn assemble(&self, file_name: &str, total: u64) -> Result<ChunkOutcome, AssetError> {
        let staging = self.staging_dir(file_name);

        for index in 0..total {
            if !staging.join(index.to_string()).is_file() {
                return Err(AssetError::MissingChunk {
                    file: file_name.to_owned(),
                    index,
                });
            }
        }

        fs::create_dir_all(&self.dest_dir)?;
        let final_path = self.dest_dir.join(base_name(file_name));
        let mut dest = fs::File::create(&final_path)?;
        for index in 0..total {
            let mut chunk = fs::File::open(staging.join(index.to_string()))?;
            io::copy(&mut chunk, &mut dest)?;
        }
        dest.sync_all()?;
        drop(dest);

        fs::remove_dir_all(&staging)?;
        tracing::info!("assembled '{file_name}' from {total} chunks");

        Ok(ChunkOutcome::Assembled { final_path })
    }

    /// Removes staging directories whose newest entry is older than
    /// `max_age`. Bounds the disk held by abandoned uploads; an upload that
    /// is still receiving chunks keeps refreshing its mtimes and survives.
    pub fn sweep_stale(&self, max_age: Duration) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.staging_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(touched) = newest_mtime(&entry.path())? else {
                continue;
            };
            let age = now.duration_since(touched).unwrap_or_default();
            if age > max_age {
                fs::remove_dir_all(entry.path())?;
                tracing::info!("swept stale upload staging '{}'", entry.path().display());
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Newest modification time among a directory and its direct entries.
fn newest_mtime(dir: &PathBuf) -> io::Result<Option<SystemTime>> {
    let mut newest = fs::metadata(dir)?.modified().ok();
    for entry in fs::read_dir(dir)? {
        let modified = entry?.metadata()?.modified()?;
        if newest.map_or(true, |current| modified > current) {
            newest = Some(modified);
        }
    }
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::env;
    use uuid::Uuid;

    fn scratch() -> (BlobStore, ChunkAssembler) {
        let root = env::temp_dir().join(format!("packstore_chunks_{}", Uuid::new_v4()));
        let blobs = BlobStore::new(root);
        blobs.ensure_layout().unwrap();
        let assembler = ChunkAssembler::new(&blobs);
        (blobs, assembler)
    }

    #[rstest]
    #[case(0, 0)]
    #[case(3, 3)]
    #[case(7, 3)]
    #[trace]
    fn rejects_out_of_range_chunks(#[case] index: u64, #[case] total: u64) {
        let (_blobs, assembler) = scratch();

        let err = assembler
            .receive_chunk("pack.zip", index, total, b"data")
            .unwrap_err();

        assert!(matches!(err, AssetError::InvalidChunkRange { .. }));
    }

    #[test]
    fn assembles_in_index_order() {
        let (_blobs, assembler) = scratch();

        assert_eq!(
            assembler.receive_chunk("pack.zip", 0, 3, b"aa").unwrap(),
            ChunkOutcome::Pending
        );
        assert_eq!(
            assembler.receive_chunk("pack.zip", 1, 3, b"bb").unwrap(),
            ChunkOutcome::Pending
        );
        let outcome = assembler.receive_chunk("pack.zip", 2, 3, b"cc").unwrap();

        let ChunkOutcome::Assembled { final_path } = outcome else {
            panic!("expected assembly on the final index");
        };
        assert!(final_path.ends_with("pack.zip"));
        assert_eq!(fs::read(final_path).unwrap(), b"aabbcc");
    }

    #[test]
    fn out_of_order_delivery_matches_ascending_order() {
        // The sizes and send order of the reference upload scenario:
        // three chunks of 4096, 4096 and 10 bytes sent as [1, 0, 2].
        let (_blobs, assembler) = scratch();
        let first = vec![b'a'; 4096];
        let second = vec![b'b'; 4096];
        let last = vec![b'c'; 10];

        assert_eq!(
            assembler.receive_chunk("pack.zip", 1, 3, &second).unwrap(),
            ChunkOutcome::Pending
        );
        assert_eq!(
            assembler.receive_chunk("pack.zip", 0, 3, &first).unwrap(),
            ChunkOutcome::Pending
        );
        let outcome = assembler.receive_chunk("pack.zip", 2, 3, &last).unwrap();

        let ChunkOutcome::Assembled { final_path } = outcome else {
            panic!("expected assembly on the final index");
        };
        let assembled = fs::read(&final_path).unwrap();
        assert_eq!(assembled.len(), 8202);
        let mut expected = first;
        expected.extend_from_slice(&second);
        expected.extend_from_slice(&last);
        assert_eq!(assembled, expected);
    }

    #[test]
    fn resending_a_chunk_is_idempotent() {
        let (_blobs, assembler) = scratch();

        assembler.receive_chunk("pack.zip", 0, 2, b"xx").unwrap();
        assembler.receive_chunk("pack.zip", 0, 2, b"xx").unwrap();
        let outcome = assembler.receive_chunk("pack.zip", 1, 2, b"yy").unwrap();

        let ChunkOutcome::Assembled { final_path } = outcome else {
            panic!("expected assembly on the final index");
        };
        assert_eq!(fs::read(final_path).unwrap(), b"xxyy");
    }

    #[test]
    fn resend_with_different_bytes_is_last_write_wins() {
        let (_blobs, assembler) = scratch();

        assembler.receive_chunk("pack.zip", 0, 2, b"old").unwrap();
        assembler.receive_chunk("pack.zip", 0, 2, b"new").unwrap();
        let outcome = assembler.receive_chunk("pack.zip", 1, 2, b"!").unwrap();

        let ChunkOutcome::Assembled { final_path } = outcome else {
            panic!("expected assembly on the final index");
        };
        assert_eq!(fs::read(final_path).unwrap(), b"new!");
    }

    #[test]
    fn final_chunk_with_gap_fails_and_keeps_staging() {
        let (blobs, assembler) = scratch();

        assembler.receive_chunk("pack.zip", 0, 3, b"aa").unwrap();
        // index 1 never arrives
        let err = assembler.receive_chunk("pack.zip", 2, 3, b"cc").unwrap_err();

        assert!(matches!(err, AssetError::MissingChunk { index: 1, .. }));
        // destination must not exist, staging must survive for resubmission
        assert!(!blobs.path_in(Category::Archives, "pack.zip").exists());
        let staging = blobs.staging_root().join("pack.zip");
        assert!(staging.join("0").is_file());
        assert!(staging.join("2").is_file());

        // resubmitting the gap completes the upload
        assembler.receive_chunk("pack.zip", 1, 3, b"bb").unwrap();
        let outcome = assembler.receive_chunk("pack.zip", 2, 3, b"cc").unwrap();
        assert!(matches!(outcome, ChunkOutcome::Assembled { .. }));
        assert!(!staging.exists());
    }

    #[test]
    fn distinct_uploads_do_not_interfere() {
        let (_blobs, assembler) = scratch();

        assembler.receive_chunk("a.zip", 0, 2, b"a0").unwrap();
        assembler.receive_chunk("b.zip", 0, 2, b"b0").unwrap();
        let a = assembler.receive_chunk("a.zip", 1, 2, b"a1").unwrap();
        let b = assembler.receive_chunk("b.zip", 1, 2, b"b1").unwrap();

        let ChunkOutcome::Assembled { final_path: a_path } = a else {
            panic!("a.zip should have assembled");
        };
        let ChunkOutcome::Assembled { final_path: b_path } = b else {
            panic!("b.zip should have assembled");
        };
        assert_eq!(fs::read(a_path).unwrap(), b"a0a1");
        assert_eq!(fs::read(b_path).unwrap(), b"b0b1");
    }

    #[test]
    fn sweep_removes_only_aged_staging_dirs() {
        let (blobs, assembler) = scratch();

        assembler.receive_chunk("fresh.zip", 0, 2, b"aa").unwrap();

        let removed = assembler.sweep_stale(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(blobs.staging_root().join("fresh.zip").is_dir());

        // with a zero threshold everything qualifies
        let removed = assembler.sweep_stale(Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
        assert!(!blobs.staging_root().join("fresh.zip").exists());
    }
}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::AssetError;

/// Name of the staging tree for in-flight chunked uploads.
const STAGING_DIR: &str = "temp";

/// Storage categories an asset file can live in.
///
/// A file's category is not recorded anywhere; it is rediscovered by probing
/// the categories in [`Category::PROBE_ORDER`] at lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Screenshots,
    Thumbnails,
    Archives,
    Backgrounds,
    Root,
}

impl Category {
    /// Lookup order used when no category is known.
    pub const PROBE_ORDER: [Category; 5] = [
        Category::Screenshots,
        Category::Thumbnails,
        Category::Archives,
        Category::Backgrounds,
        Category::Root,
    ];

    /// Directory name under the uploads base dir. The archives directory
    /// keeps its historical `modpacks` name so existing deployments keep
    /// working; `Root` is the base dir itself.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Screenshots => "screenshots",
            Category::Thumbnails => "thumbnails",
            Category::Archives => "modpacks",
            Category::Backgrounds => "backgrounds",
            Category::Root => "",
        }
    }
}

/// Maps logical asset filenames to paths under the uploads base directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the base dir, every category dir and the staging tree.
    pub fn ensure_layout(&self) -> io::Result<()> {
        for category in Category::PROBE_ORDER {
            fs::create_dir_all(self.dir(category))?;
        }
        fs::create_dir_all(self.staging_root())
    }

    #[must_use]
    pub fn dir(&self, category: Category) -> PathBuf {
        match category {
            Category::Root => self.root.clone(),
            _ => self.root.join(category.dir_name()),
        }
    }

    /// Deterministic path of `filename` inside `category`. The filename is
    /// reduced to its final path component first, so callers can never
    /// address anything outside the uploads tree.
    #[must_use]
    pub fn path_in(&self, category: Category, filename: &str) -> PathBuf {
        self.dir(category).join(base_name(filename))
    }

    /// Finds the category currently holding `filename` by probing the fixed
    /// order. Read-only; `None` when no category has the file.
    #[must_use]
    pub fn resolve(&self, filename: &str) -> Option<(Category, PathBuf)> {
        Category::PROBE_ORDER.into_iter().find_map(|category| {
            let path = self.path_in(category, filename);
            path.is_file().then_some((category, path))
        })
    }

    /// Writes `bytes` as `filename` in `category`, overwriting any previous
    /// file with that name (collisions are last-write-wins by convention).
    pub fn write(
        &self,
        category: Category,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, AssetError> {
        let path = self.path_in(category, filename);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    #[must_use]
    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }
}

/// Final path component of a client-supplied name, tolerating both
/// separator styles.
#[must_use]
pub fn base_name(filename: &str) -> &str {
    if let Some(ix) = filename.rfind(['\\', '/']) {
        &filename[ix + 1..]
    } else {
        filename
    }
}

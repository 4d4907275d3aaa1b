use std::fmt::{Debug, Display};

use kernel::{Pack, PackVersion};

/// Record store behind the pack and username routes.
///
/// `asset_reference_count` is the garbage collector's single query: the
/// number of stored references (pack thumbnail, pack background, screenshot
/// slots, version archives) equal to a filename, recomputed on every call
/// rather than maintained incrementally.
pub trait Storage {
    type Err: Debug + Display;

    fn new_database(&self) -> Result<(), Self::Err>;

    fn insert_pack(&mut self, pack: &Pack) -> Result<(), Self::Err>;

    fn get_packs(&mut self) -> Result<Vec<Pack>, Self::Err>;

    fn get_pack(&mut self, id: &str) -> Result<Pack, Self::Err>;

    fn update_pack(&mut self, pack: &Pack) -> Result<(), Self::Err>;

    fn delete_pack(&mut self, id: &str) -> Result<usize, Self::Err>;

    /// Removes one listed version and returns it, `None` when absent.
    fn delete_version(
        &mut self,
        pack_id: &str,
        version_id: &str,
    ) -> Result<Option<PackVersion>, Self::Err>;

    fn asset_reference_count(&mut self, file_name: &str) -> Result<i64, Self::Err>;

    fn insert_username(&mut self, username: &str) -> Result<(), Self::Err>;

    fn username_exists(&mut self, username: &str) -> Result<bool, Self::Err>;

    fn get_usernames(&mut self) -> Result<Vec<String>, Self::Err>;

    fn delete_username(&mut self, username: &str) -> Result<usize, Self::Err>;
}

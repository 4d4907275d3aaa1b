#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A single release of a pack.
///
/// Every field is optional because versions are authored incrementally by the
/// management frontend; `zip` is the filename of the archive stored in the
/// archives category once the chunked upload has completed.
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PackVersion {
    /// Display name of the version
    pub name: Option<String>,
    /// Client-assigned version identifier
    pub id: Option<String>,
    /// Filename of the stored pack archive
    pub zip: Option<String>,
    /// Human-readable size label
    pub size: Option<String>,
    /// Changelog text shown to end users
    pub changelog: Option<String>,
    /// Release date label
    pub date: Option<String>,
    /// Whether the version is listed publicly
    pub visible: Option<bool>,
    /// Whether the version is a clean (vanilla-compatible) build
    pub clean: Option<bool>,
}

/// A pack record: the system of record for which asset files are referenced.
///
/// `thumbnail`, `background`, every entry of `screenshots` and the `zip` of
/// every version (the main one included) name files under the uploads tree.
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Pack {
    /// Unique pack identifier
    pub id: String,
    /// Ordering hint used by the frontend
    pub index: i64,
    /// Display name
    pub name: Option<String>,
    /// Filename of the thumbnail image
    pub thumbnail: Option<String>,
    /// Filename of the background image
    pub background: Option<String>,
    /// The version served by the main download route
    pub main_version: Option<PackVersion>,
    /// Publication status label
    pub status: Option<String>,
    /// JVM arguments recommended for this pack
    pub jvm_args: Option<String>,
    /// All authored versions
    pub versions: Vec<PackVersion>,
    /// Filenames of screenshot images
    pub screenshots: Vec<String>,
}

/// Partial update of a [`Pack`].
///
/// Absent fields keep their stored value; `versions: []` clears the list.
#[derive(Serialize, Deserialize, ToSchema, Clone, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PackPatch {
    pub index: Option<i64>,
    pub name: Option<String>,
    pub thumbnail: Option<String>,
    pub background: Option<String>,
    pub main_version: Option<PackVersion>,
    pub status: Option<String>,
    pub jvm_args: Option<String>,
    pub versions: Option<Vec<PackVersion>>,
    pub screenshots: Option<Vec<String>>,
}

/// Generic human-readable response body.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    #[must_use]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response carrying the affected pack alongside a message.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct PackResponse {
    pub message: String,
    pub modpack: Pack,
}

/// Response of the single-file upload route.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct UploadedFile {
    pub message: String,
    /// Name under which the file was stored
    pub filename: String,
}

/// Outcome of one chunk of a chunked archive upload.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ChunkReceipt {
    /// True once the final chunk arrived and the archive was assembled
    pub assembled: bool,
    /// Stored archive filename, present only when `assembled`
    pub filename: Option<String>,
}

/// Screenshot directory listing.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ScreenshotList {
    pub screenshots: Vec<String>,
}

/// All registered usernames.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct UsernameList {
    pub usernames: Vec<String>,
}

/// Request body for the username routes.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct UsernameRequest {
    pub username: String,
}

/// Response of a successful username registration.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct RegisteredUsername {
    pub message: String,
    pub username: String,
}

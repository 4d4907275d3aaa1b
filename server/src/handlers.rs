#![allow(clippy::unused_async)]
use crate::assembler::{ChunkAssembler, ChunkOutcome};
use crate::blobs::{base_name, Category};
use crate::collector;
use crate::domain::Storage;
use crate::file_reply::FileReply;
use crate::sqlite::{Mode, Sqlite};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use futures_util::{StreamExt, TryStreamExt};
use kernel::{
    ApiMessage, ChunkReceipt, Pack, PackPatch, PackResponse, RegisteredUsername, ScreenshotList,
    UploadedFile, UsernameList, UsernameRequest,
};
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::io::StreamReader;

use axum::{
    extract::{Multipart, Path},
    http::StatusCode,
};

/// Lists all packs.
#[utoipa::path(
    get,
    path = "/api/",
    tag = "packs",
    responses(
        (status = 200, description = "All pack records", body = [Pack]),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
)]
pub async fn get_packs(State(state): State<Arc<AppState>>) -> Response {
    let mut storage = match open_store(&state, Mode::ReadOnly) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match storage.get_packs() {
        Ok(packs) => Json(packs).into_response(),
        Err(e) => {
            tracing::error!("error fetching packs: {e}");
            server_error("Error fetching mod packs")
        }
    }
}

/// Creates an empty pack record with a timestamp id.
#[utoipa::path(
    post,
    path = "/api/template",
    tag = "packs",
    responses(
        (status = 201, description = "Template created", body = PackResponse),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
)]
pub async fn create_template(State(state): State<Arc<AppState>>) -> Response {
    let mut storage = match open_store(&state, Mode::ReadWrite) {
        Ok(s) => s,
        Err(response) => return response,
    };
    let pack = Pack {
        id: timestamp_id(),
        ..Pack::default()
    };
    match storage.insert_pack(&pack) {
        Ok(()) => {
            tracing::info!("created pack template {}", pack.id);
            (
                StatusCode::CREATED,
                Json(PackResponse {
                    message: "Modpack template created successfully".to_owned(),
                    modpack: pack,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("template not created: {e}");
            server_error("Internal Server Error")
        }
    }
}

/// Applies a partial update to a pack, then collects asset files the update
/// stopped referencing. Collection outcomes are logged; they never fail the
/// request once the record write has succeeded.
#[utoipa::path(
    put,
    path = "/api/{id}",
    tag = "packs",
    responses(
        (status = 200, description = "Pack updated", body = PackResponse),
        (status = 404, description = "Pack not found", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
    params(
        ("id" = String, Path, description = "Pack id")
    ),
)]
pub async fn update_pack(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<PackPatch>,
) -> Response {
    let mut storage = match open_store(&state, Mode::ReadWrite) {
        Ok(s) => s,
        Err(response) => return response,
    };
    let existing = match load_pack(&mut storage, &id) {
        Ok(pack) => pack,
        Err(response) => return response,
    };

    let updated = apply_patch(existing.clone(), patch);
    let candidates = dropped_assets(&existing, &updated);

    if let Err(e) = storage.update_pack(&updated) {
        tracing::error!("error updating pack {id}: {e}");
        return server_error("Error updating modpack");
    }
    collect_candidates(&mut storage, &state, candidates);

    (
        StatusCode::OK,
        Json(PackResponse {
            message: "Modpack updated successfully".to_owned(),
            modpack: updated,
        }),
    )
        .into_response()
}

/// Deletes a pack record, then collects every asset file it referenced.
#[utoipa::path(
    delete,
    path = "/api/{id}",
    tag = "packs",
    responses(
        (status = 200, description = "Pack deleted", body = ApiMessage),
        (status = 404, description = "Pack not found", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
    params(
        ("id" = String, Path, description = "Pack id")
    ),
)]
pub async fn delete_pack(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let mut storage = match open_store(&state, Mode::ReadWrite) {
        Ok(s) => s,
        Err(response) => return response,
    };
    let pack = match load_pack(&mut storage, &id) {
        Ok(pack) => pack,
        Err(response) => return response,
    };

    let mut candidates: Vec<String> = pack
        .versions
        .iter()
        .filter_map(|version| version.zip.clone())
        .collect();
    candidates.extend(
        pack.main_version
            .as_ref()
            .and_then(|version| version.zip.clone()),
    );
    candidates.extend(pack.thumbnail.clone());
    candidates.extend(pack.background.clone());

    if let Err(e) = storage.delete_pack(&id) {
        tracing::error!("error deleting pack {id}: {e}");
        return server_error("Error deleting modpack");
    }
    tracing::info!("pack {id} deleted");
    collect_candidates(&mut storage, &state, candidates);

    ok_message("Deleted modpack successfully")
}

/// Removes one version from a pack and collects its archive.
#[utoipa::path(
    delete,
    path = "/api/{id}/versions/{version_id}",
    tag = "packs",
    responses(
        (status = 200, description = "Version deleted", body = ApiMessage),
        (status = 404, description = "Pack or version not found", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
    params(
        ("id" = String, Path, description = "Pack id"),
        ("version_id" = String, Path, description = "Version id")
    ),
)]
pub async fn delete_version(
    Path((id, version_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let mut storage = match open_store(&state, Mode::ReadWrite) {
        Ok(s) => s,
        Err(response) => return response,
    };
    if let Err(response) = load_pack(&mut storage, &id) {
        return response;
    }

    match storage.delete_version(&id, &version_id) {
        Ok(Some(removed)) => {
            tracing::info!("version {version_id} of pack {id} deleted");
            let candidates: Vec<String> = removed.zip.into_iter().collect();
            collect_candidates(&mut storage, &state, candidates);
            ok_message("Version deleted successfully")
        }
        Ok(None) => not_found("Version not found"),
        Err(e) => {
            tracing::error!("error deleting version {version_id} of pack {id}: {e}");
            server_error("Error deleting version")
        }
    }
}

/// Streams the archive of a pack's main version.
#[utoipa::path(
    get,
    path = "/api/{id}/main",
    tag = "files",
    responses(
        (status = 200, response = FileReply),
        (status = 404, description = "Pack, main version or file not found", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
    params(
        ("id" = String, Path, description = "Pack id")
    ),
)]
pub async fn download_main(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let mut storage = match open_store(&state, Mode::ReadOnly) {
        Ok(s) => s,
        Err(response) => return response,
    };
    let pack = match load_pack(&mut storage, &id) {
        Ok(pack) => pack,
        Err(response) => return response,
    };

    let Some(zip) = pack.main_version.as_ref().and_then(|main| main.zip.clone()) else {
        return not_found("Main version file missing");
    };

    let path = state.blobs.path_in(Category::Archives, &zip);
    match FileReply::open(&path, &zip).await {
        Ok(reply) => reply.into_response(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => not_found("File not found"),
        Err(e) => {
            tracing::error!("error streaming '{zip}': {e}");
            server_error("Error downloading modpack")
        }
    }
}

/// Accepts one chunk of a chunked archive upload.
#[utoipa::path(
    post,
    path = "/api/upload-zip",
    tag = "files",
    responses(
        (status = 200, description = "Chunk accepted, archive possibly assembled", body = ChunkReceipt),
        (status = 400, description = "Malformed chunk upload", body = ApiMessage),
        (status = 500, description = "Assembly failure", body = ApiMessage)
    ),
)]
pub async fn upload_archive_chunk(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut file_name: Option<String> = None;
    let mut chunk_index: Option<u64> = None;
    let mut total_chunks: Option<u64> = None;
    let mut chunk_bytes: Option<Vec<u8>> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "chunk" => match read_from_stream(field).await {
                Ok((bytes, read_bytes)) => {
                    tracing::debug!("chunk field read: {read_bytes} bytes");
                    chunk_bytes = Some(bytes);
                }
                Err(e) => {
                    tracing::error!("{e}");
                    return server_error("Error during file upload");
                }
            },
            "fileName" => file_name = field.text().await.ok(),
            "chunkIndex" => chunk_index = parse_field(field.text().await.ok()),
            "totalChunks" => total_chunks = parse_field(field.text().await.ok()),
            other => tracing::debug!("ignoring unexpected upload field '{other}'"),
        }
    }

    let (Some(file_name), Some(index), Some(total), Some(bytes)) =
        (file_name, chunk_index, total_chunks, chunk_bytes)
    else {
        return bad_request("Missing chunk upload fields");
    };

    let assembler = ChunkAssembler::new(&state.blobs);
    match assembler.receive_chunk(&file_name, index, total, &bytes) {
        Ok(ChunkOutcome::Pending) => Json(ChunkReceipt {
            assembled: false,
            filename: None,
        })
        .into_response(),
        Ok(ChunkOutcome::Assembled { final_path }) => {
            tracing::info!("archive '{file_name}' assembled at {}", final_path.display());
            Json(ChunkReceipt {
                assembled: true,
                filename: Some(base_name(&file_name).to_owned()),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("error during file upload: {e}");
            (e.status(), Json(ApiMessage::new(e.to_string()))).into_response()
        }
    }
}

/// Stores a single image file; the multipart field name selects the category.
#[utoipa::path(
    post,
    path = "/api/upload",
    tag = "files",
    responses(
        (status = 200, description = "File stored", body = UploadedFile),
        (status = 400, description = "No file or unknown field name", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
)]
pub async fn upload_asset(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.file_name().is_none() {
            continue;
        }
        let field_name = field.name().unwrap_or_default().to_owned();
        let category = match field_name.as_str() {
            "thumbnailFile" => Category::Thumbnails,
            "screenshotFile" => Category::Screenshots,
            "backgroundFile" => Category::Backgrounds,
            other => {
                tracing::info!("invalid file field name: {other}");
                return bad_request("Invalid file field name");
            }
        };
        let original_name = field.file_name().unwrap_or_default().to_owned();

        return match read_from_stream(field).await {
            Ok((bytes, read_bytes)) => {
                match state.blobs.write(category, &original_name, &bytes) {
                    Ok(path) => {
                        tracing::info!(
                            "file: {original_name} read: {read_bytes} stored at {}",
                            path.display()
                        );
                        Json(UploadedFile {
                            message: "File uploaded successfully".to_owned(),
                            filename: base_name(&original_name).to_owned(),
                        })
                        .into_response()
                    }
                    Err(e) => {
                        tracing::error!("error saving uploaded file: {e}");
                        server_error("Error saving uploaded file")
                    }
                }
            }
            Err(e) => {
                tracing::error!("{e}");
                server_error("Error saving uploaded file")
            }
        };
    }

    bad_request("No file uploaded")
}

/// Lists image files currently in the screenshots category.
#[utoipa::path(
    get,
    path = "/api/screenshots",
    tag = "screenshots",
    responses(
        (status = 200, description = "Screenshot filenames", body = ScreenshotList),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
)]
pub async fn get_screenshots(State(state): State<Arc<AppState>>) -> Response {
    let dir = state.blobs.dir(Category::Screenshots);
    match fs::read_dir(&dir) {
        Ok(entries) => {
            let mut screenshots: Vec<String> = entries
                .filter_map(Result::ok)
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| is_image_file(name))
                .collect();
            screenshots.sort();
            Json(ScreenshotList { screenshots }).into_response()
        }
        Err(e) => {
            tracing::error!("error reading screenshots directory: {e}");
            server_error("Failed to read screenshots")
        }
    }
}

/// Removes a screenshot file directly, bypassing reference counting.
#[utoipa::path(
    delete,
    path = "/api/screenshots/{filename}",
    tag = "screenshots",
    responses(
        (status = 200, description = "Screenshot deleted", body = ApiMessage),
        (status = 404, description = "Screenshot not found", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
    params(
        ("filename" = String, Path, description = "Screenshot filename")
    ),
)]
pub async fn delete_screenshot(
    Path(filename): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let path = state.blobs.path_in(Category::Screenshots, &filename);
    if !path.is_file() {
        return not_found("Screenshot not found");
    }
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!("screenshot deleted: {}", path.display());
            ok_message("Screenshot deleted successfully")
        }
        Err(e) => {
            tracing::error!("error deleting screenshot: {e}");
            server_error("Error deleting screenshot")
        }
    }
}

/// Confirms the presented API key is valid.
#[utoipa::path(
    post,
    path = "/api/authenticate",
    tag = "auth",
    responses(
        (status = 200, description = "Key accepted", body = ApiMessage),
        (status = 401, description = "Key missing or invalid", body = ApiMessage)
    ),
)]
pub async fn authenticate() -> Response {
    ok_message("API key authenticated successfully")
}

/// Registers a new username.
#[utoipa::path(
    post,
    path = "/api/register",
    tag = "usernames",
    responses(
        (status = 201, description = "Username registered", body = RegisteredUsername),
        (status = 400, description = "Missing or empty username", body = ApiMessage),
        (status = 409, description = "Username already exists", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
)]
pub async fn register_username(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UsernameRequest>,
) -> Response {
    let Some(username) = normalized(&request.username) else {
        return bad_request("Username is required and must be a non-empty string");
    };
    let mut storage = match open_store(&state, Mode::ReadWrite) {
        Ok(s) => s,
        Err(response) => return response,
    };

    match storage.username_exists(username) {
        Ok(true) => {
            return (
                StatusCode::CONFLICT,
                Json(ApiMessage::new("Username already exists")),
            )
                .into_response()
        }
        Ok(false) => {}
        Err(e) => {
            tracing::error!("error registering username: {e}");
            return server_error("Error registering username");
        }
    }

    match storage.insert_username(username) {
        Ok(()) => (
            StatusCode::CREATED,
            Json(RegisteredUsername {
                message: "Username registered successfully".to_owned(),
                username: username.to_owned(),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("error registering username: {e}");
            server_error("Error registering username")
        }
    }
}

/// Lists registered usernames.
#[utoipa::path(
    get,
    path = "/api/usernames",
    tag = "usernames",
    responses(
        (status = 200, description = "Registered usernames", body = UsernameList),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
)]
pub async fn get_usernames(State(state): State<Arc<AppState>>) -> Response {
    let mut storage = match open_store(&state, Mode::ReadOnly) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match storage.get_usernames() {
        Ok(usernames) => Json(UsernameList { usernames }).into_response(),
        Err(e) => {
            tracing::error!("error fetching usernames: {e}");
            server_error("Error fetching usernames")
        }
    }
}

/// Tells whether a username is already taken.
#[utoipa::path(
    post,
    path = "/api/check-username",
    tag = "usernames",
    responses(
        (status = 200, description = "True when the username exists", body = bool),
        (status = 400, description = "Missing or empty username", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
)]
pub async fn check_username(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UsernameRequest>,
) -> Response {
    let Some(username) = normalized(&request.username) else {
        return bad_request("Username is required and must be a non-empty string");
    };
    let mut storage = match open_store(&state, Mode::ReadOnly) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match storage.username_exists(username) {
        Ok(exists) => Json(exists).into_response(),
        Err(e) => {
            tracing::error!("error checking username: {e}");
            server_error("Error checking username")
        }
    }
}

/// Deletes a registered username.
#[utoipa::path(
    post,
    path = "/api/delete-username",
    tag = "usernames",
    responses(
        (status = 200, description = "Username deleted", body = ApiMessage),
        (status = 400, description = "Missing or empty username", body = ApiMessage),
        (status = 404, description = "Username not found", body = ApiMessage),
        (status = 500, description = "Server error", body = ApiMessage)
    ),
)]
pub async fn delete_username(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UsernameRequest>,
) -> Response {
    let Some(username) = normalized(&request.username) else {
        return bad_request("Username is required and must be a non-empty string");
    };
    let mut storage = match open_store(&state, Mode::ReadWrite) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match storage.delete_username(username) {
        Ok(0) => not_found("Username not found"),
        Ok(_) => ok_message("Username deleted successfully"),
        Err(e) => {
            tracing::error!("error deleting username: {e}");
            server_error("Error deleting username")
        }
    }
}

fn open_store(state: &AppState, mode: Mode) -> Result<Sqlite, Response> {
    Sqlite::open(&state.db, mode).map_err(|e| {
        tracing::error!("{e}");
        server_error("Internal Server Error")
    })
}

fn load_pack(storage: &mut Sqlite, id: &str) -> Result<Pack, Response> {
    match storage.get_pack(id) {
        Ok(pack) => Ok(pack),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(not_found("Modpack not found")),
        Err(e) => {
            tracing::error!("error loading pack {id}: {e}");
            Err(server_error("Internal Server Error"))
        }
    }
}

/// Runs a collection pass over `candidates`, logging the per-file outcomes.
/// The caller's response does not depend on the result.
fn collect_candidates(storage: &mut Sqlite, state: &AppState, candidates: Vec<String>) {
    if candidates.is_empty() {
        return;
    }
    let reports = collector::collect(storage, &state.blobs, &candidates);
    tracing::debug!("collection pass over {} candidate(s): {reports:?}", candidates.len());
}

/// Replaces every field present in the patch; absent fields keep their value.
fn apply_patch(mut pack: Pack, patch: PackPatch) -> Pack {
    if let Some(index) = patch.index {
        pack.index = index;
    }
    if patch.name.is_some() {
        pack.name = patch.name;
    }
    if patch.thumbnail.is_some() {
        pack.thumbnail = patch.thumbnail;
    }
    if patch.background.is_some() {
        pack.background = patch.background;
    }
    if patch.main_version.is_some() {
        pack.main_version = patch.main_version;
    }
    if patch.status.is_some() {
        pack.status = patch.status;
    }
    if patch.jvm_args.is_some() {
        pack.jvm_args = patch.jvm_args;
    }
    if let Some(versions) = patch.versions {
        pack.versions = versions;
    }
    if let Some(screenshots) = patch.screenshots {
        pack.screenshots = screenshots;
    }
    pack
}

/// Filenames the update stopped referencing: version archives no longer
/// listed, plus a replaced thumbnail or background.
fn dropped_assets(old: &Pack, updated: &Pack) -> Vec<String> {
    let mut dropped = Vec::new();

    let kept: Vec<&str> = updated
        .versions
        .iter()
        .filter_map(|version| version.zip.as_deref())
        .collect();
    for version in &old.versions {
        if let Some(zip) = version.zip.as_deref() {
            if !kept.contains(&zip) {
                dropped.push(zip.to_owned());
            }
        }
    }

    if let (Some(old_thumb), Some(new_thumb)) = (&old.thumbnail, &updated.thumbnail) {
        if old_thumb != new_thumb {
            dropped.push(old_thumb.clone());
        }
    }
    if let (Some(old_bg), Some(new_bg)) = (&old.background, &updated.background) {
        if old_bg != new_bg {
            dropped.push(old_bg.clone());
        }
    }

    dropped
}

fn timestamp_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_owned())
}

fn parse_field(text: Option<String>) -> Option<u64> {
    text.and_then(|value| value.trim().parse().ok())
}

fn normalized(username: &str) -> Option<&str> {
    let trimmed = username.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Image filename filter of the screenshots listing: the usual web image
/// extensions, optionally carrying a trailing `-<digits>` de-dup suffix.
fn is_image_file(name: &str) -> bool {
    let base = match name.rsplit_once('-') {
        Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => name,
    };
    let Some((_, ext)) = base.rsplit_once('.') else {
        return false;
    };
    matches!(
        ext.to_ascii_lowercase().as_str(),
        "png" | "jpg" | "jpeg" | "webp" | "gif"
    )
}

fn ok_message(message: &str) -> Response {
    (StatusCode::OK, Json(ApiMessage::new(message))).into_response()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiMessage::new(message))).into_response()
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(ApiMessage::new(message))).into_response()
}

fn server_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiMessage::new(message)),
    )
        .into_response()
}

async fn read_from_stream<S, E>(stream: S) -> io::Result<(Vec<u8>, usize)>
where
    S: Stream<Item = Result<Bytes, E>> + StreamExt,
    E: Sync + std::error::Error + Send + 'static,
{
    // Convert the stream into an `AsyncRead`.
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);
    let mut buffer = Vec::new();

    let copied_bytes = tokio::io::copy(&mut body_reader, &mut buffer).await?;
    let copied_bytes = usize::try_from(copied_bytes).unwrap_or(usize::MAX);
    Ok((buffer, copied_bytes))
}

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use kernel::ApiMessage;

pub const TOKEN_FILE: &str = "apiToken.json";
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Serialize, Deserialize)]
struct ApiToken {
    token: String,
}

/// Loads the API key from `<dir>/apiToken.json`, generating and persisting a
/// fresh one when the file is missing, unreadable or holds an empty token.
/// Returns the active key so the operator can read it from the startup log.
pub fn ensure_api_token(dir: &Path) -> io::Result<String> {
    fs::create_dir_all(dir)?;
    let path = dir.join(TOKEN_FILE);

    if let Ok(data) = fs::read_to_string(&path) {
        if let Ok(existing) = serde_json::from_str::<ApiToken>(&data) {
            if !existing.token.is_empty() {
                tracing::info!("existing API key: {}", existing.token);
                return Ok(existing.token);
            }
        }
    }

    let token = generate_token();
    let json = serde_json::to_string_pretty(&ApiToken {
        token: token.clone(),
    })
    .map_err(io::Error::other)?;
    fs::write(&path, json)?;
    tracing::info!("generated API key: {token}");
    Ok(token)
}

/// Reads the current token from an existing token file.
pub fn read_api_token(path: &Path) -> io::Result<String> {
    let data = fs::read_to_string(path)?;
    let parsed: ApiToken = serde_json::from_str(&data).map_err(io::Error::other)?;
    if parsed.token.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty API token"));
    }
    Ok(parsed.token)
}

fn generate_token() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(128), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Middleware guarding the mutating routes.
///
/// The token file is re-read on every request so the key can be rotated by
/// replacing the file, exactly like the surrounding deployment expects.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let token = match read_api_token(&state.token_file) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("cannot read API token file: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiMessage::new("Internal Server Error")),
            )
                .into_response();
        }
    };

    let Some(key) = request.headers().get(API_KEY_HEADER) else {
        return unauthorized("API key is required");
    };
    match key.to_str() {
        Ok(key) if key == token => next.run(request).await,
        _ => unauthorized("Invalid API key"),
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiMessage::new(message))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use uuid::Uuid;

    #[test]
    fn token_is_generated_once_and_reused() {
        let dir = env::temp_dir().join(format!("packstore_token_{}", Uuid::new_v4()));

        let first = ensure_api_token(&dir).unwrap();
        let second = ensure_api_token(&dir).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 128);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(read_api_token(&dir.join(TOKEN_FILE)).unwrap(), first);
    }

    #[test]
    fn empty_token_file_is_regenerated() {
        let dir = env::temp_dir().join(format!("packstore_token_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(TOKEN_FILE), r#"{ "token": "" }"#).unwrap();

        let token = ensure_api_token(&dir).unwrap();

        assert_eq!(token.len(), 128);
        assert_eq!(read_api_token(&dir.join(TOKEN_FILE)).unwrap(), token);
    }
}

use axum::http::StatusCode;
use std::io;
use thiserror::Error;

/// Failure modes of the asset storage subsystem.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The chunk coordinates violate `0 <= index < total` or `total >= 1`.
    #[error("chunk index {index} out of range for {total} chunks")]
    InvalidChunkRange { index: u64, total: u64 },

    /// The final chunk arrived but an earlier index was never staged.
    /// The staging directory is kept so the client can resubmit the gap.
    #[error("chunk {index} of '{file}' has not been uploaded")]
    MissingChunk { file: String, index: u64 },

    /// No storage category holds a file with this name.
    #[error("no stored file named '{0}'")]
    AssetNotFound(String),

    /// Disk I/O failed while writing a chunk or assembling the file.
    #[error("storage failure: {0}")]
    StorageWrite(#[from] io::Error),
}

impl AssetError {
    /// HTTP status this failure maps to at the route boundary.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            AssetError::InvalidChunkRange { .. } => StatusCode::BAD_REQUEST,
            AssetError::AssetNotFound(_) => StatusCode::NOT_FOUND,
            AssetError::MissingChunk { .. } | AssetError::StorageWrite(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AssetError::InvalidChunkRange { index: 3, total: 3 }, StatusCode::BAD_REQUEST)]
    #[case(AssetError::MissingChunk { file: "a.zip".into(), index: 1 }, StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(AssetError::AssetNotFound("a.zip".into()), StatusCode::NOT_FOUND)]
    #[trace]
    fn status_mapping(#[case] err: AssetError, #[case] expected: StatusCode) {
        assert_eq!(err.status(), expected);
    }
}

use std::io;
use std::path::Path;

use axum::{
    body::Body,
    http::HeaderValue,
    response::{IntoResponse, Response},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use utoipa::{
    openapi::{
        self,
        content::ContentBuilder,
        schema::{KnownFormat, ObjectBuilder, Schema, SchemaFormat, Type},
        RefOr, ResponseBuilder,
    },
    ToResponse,
};

use crate::blobs::base_name;

/// Streams a stored file back as an octet-stream attachment.
pub struct FileReply {
    file: File,
    file_name: String,
    size: u64,
}

impl FileReply {
    /// Opens `path` for streaming; `file_name` is the name offered to the
    /// downloader in the `Content-Disposition` header.
    pub async fn open(path: &Path, file_name: &str) -> io::Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file,
            file_name: base_name(file_name).to_owned(),
            size,
        })
    }
}

impl IntoResponse for FileReply {
    fn into_response(self) -> Response {
        let mut res = Body::from_stream(ReaderStream::new(self.file)).into_response();
        res.headers_mut().insert(
            "content-type",
            HeaderValue::from_static("application/octet-stream"),
        );
        let attachment = format!(r#"attachment; filename="{}""#, self.file_name);
        if let Ok(val) = HeaderValue::from_str(attachment.as_str()) {
            res.headers_mut().insert("content-disposition", val);
        }
        let len = self.size.to_string();
        if let Ok(val) = HeaderValue::from_str(len.as_str()) {
            res.headers_mut().insert("Content-Length", val);
        }

        res
    }
}

impl ToResponse<'static> for FileReply {
    fn response() -> (&'static str, RefOr<openapi::Response>) {
        let object = ObjectBuilder::new()
            .schema_type(Type::String)
            .format(Some(SchemaFormat::KnownFormat(KnownFormat::Binary)))
            .build();
        let content = ContentBuilder::new()
            .schema(Some(Schema::Object(object)))
            .build();
        (
            "FileReply",
            ResponseBuilder::new()
                .description("File binary content")
                .content("application/octet-stream", content)
                .build()
                .into(),
        )
    }
}

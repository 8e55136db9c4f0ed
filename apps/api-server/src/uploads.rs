//! Multipart resources under `/api/multiparts`: files are stored flat in one
//! upload directory and listed back as a `multipart/form-data` body.

use std::io;
use std::path::{Path, PathBuf};

use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error, info, warn};

use crate::AppState;

/// Part always sent first by `GET /api/multiparts`.
const STATIC_PART: StoredPart<'static> = StoredPart {
    name: "abd",
    file_name: "abc.text",
    media_type: "text/plain",
};
const STATIC_PART_CONTENT: &[u8] = b"this is a text content";

struct StoredPart<'a> {
    name: &'a str,
    file_name: &'a str,
    media_type: &'a str,
}

/// Media type served for a stored file, from its extension.
pub fn media_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "txt" => "text/plain",
        "svg" => "application/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Extension given to an upload that arrives without a file name.
pub fn extension_for_media_type(media_type: &str) -> &'static str {
    let essence = media_type.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "text/plain" => "txt",
        "application/svg+xml" => "svg",
        _ => "bin",
    }
}

/// Last path component of a client-supplied file name. `None` for names
/// that would escape the upload directory or are empty.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// Directory that receives the uploaded files. Created on first write.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under the client's file name, or a generated
    /// `{uuid}.{ext}` when there is none. Existing files are replaced.
    pub async fn save(
        &self,
        file_name: Option<&str>,
        media_type: Option<&str>,
        bytes: &[u8],
    ) -> io::Result<String> {
        let name = file_name.and_then(sanitize_file_name).unwrap_or_else(|| {
            format!(
                "{}.{}",
                uuid::Uuid::new_v4(),
                extension_for_media_type(media_type.unwrap_or(""))
            )
        });
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        Ok(name)
    }

    /// Stored files sorted by name, with their contents.
    pub async fn list(&self) -> io::Result<Vec<(String, Vec<u8>)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            debug!(file = %name, "found uploaded file");
            out.push((name, tokio::fs::read(entry.path()).await?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

fn extension_of(file_name: &str) -> &str {
    file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

fn multipart_error(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(http_common::json_error_with_message("bad_request", message)),
    )
        .into_response()
}

fn io_error(e: io::Error) -> Response {
    error!(err = %e, "upload store failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(http_common::json_error_with_message(
            "internal",
            "server error",
        )),
    )
        .into_response()
}

enum SaveError {
    Multipart(MultipartError),
    Io(io::Error),
}

impl SaveError {
    fn respond(self) -> Response {
        match self {
            SaveError::Multipart(e) => multipart_error(&e.body_text()),
            SaveError::Io(e) => io_error(e),
        }
    }
}

async fn save_field(store: &UploadStore, field: Field<'_>) -> Result<String, SaveError> {
    let part = field.name().unwrap_or("").to_string();
    let file_name = field.file_name().map(str::to_string);
    let media_type = field.content_type().map(str::to_string);
    info!(
        part = %part,
        file_name = file_name.as_deref().unwrap_or("-"),
        media_type = media_type.as_deref().unwrap_or("-"),
        "uploading file"
    );
    let bytes = field.bytes().await.map_err(SaveError::Multipart)?;
    store
        .save(file_name.as_deref(), media_type.as_deref(), &bytes)
        .await
        .map_err(SaveError::Io)
}

/// `name` text field plus one file in the `part` field.
pub async fn upload_simple(
    State(state): State<AppState>,
    form: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut form = match form {
        Ok(f) => f,
        Err(rejection) => return multipart_error(&rejection.body_text()),
    };
    let mut saved = None;
    loop {
        let field = match form.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return multipart_error(&e.body_text()),
        };
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => match field.text().await {
                Ok(name) => info!(%name, "upload name"),
                Err(e) => return multipart_error(&e.body_text()),
            },
            Some("part") => match save_field(&state.uploads, field).await {
                Ok(stored) => saved = Some(stored),
                Err(e) => return e.respond(),
            },
            other => debug!(field = other.unwrap_or("-"), "ignoring form field"),
        }
    }
    match saved {
        Some(stored) => {
            info!(file = %stored, "upload stored");
            StatusCode::OK.into_response()
        }
        None => {
            warn!("simple upload without a `part` field");
            multipart_error("missing form field `part`")
        }
    }
}

/// Every part of the form is stored as a file.
pub async fn upload_list(
    State(state): State<AppState>,
    form: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut form = match form {
        Ok(f) => f,
        Err(rejection) => return multipart_error(&rejection.body_text()),
    };
    let mut count = 0usize;
    loop {
        match form.next_field().await {
            Ok(Some(field)) => {
                if let Err(e) = save_field(&state.uploads, field).await {
                    return e.respond();
                }
                count += 1;
            }
            Ok(None) => break,
            Err(e) => return multipart_error(&e.body_text()),
        }
    }
    info!(count, "uploaded files");
    StatusCode::OK.into_response()
}

fn write_part(body: &mut Vec<u8>, boundary: &str, part: &StoredPart<'_>, content: &[u8]) {
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: {}\r\n\r\n",
            part.name, part.file_name, part.media_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(b"\r\n");
}

/// The fixed text part followed by every stored file.
pub async fn list_uploads(State(state): State<AppState>) -> Response {
    let files = match state.uploads.list().await {
        Ok(files) => files,
        Err(e) => return io_error(e),
    };
    let boundary = uuid::Uuid::new_v4().simple().to_string();
    let mut body = Vec::new();
    write_part(&mut body, &boundary, &STATIC_PART, STATIC_PART_CONTENT);
    for (name, content) in &files {
        let part = StoredPart {
            name: name.as_str(),
            file_name: name.as_str(),
            media_type: media_type_for_extension(extension_of(name)),
        };
        write_part(&mut body, &boundary, &part, content);
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    debug!(count = files.len(), "listing uploads");
    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )],
        body,
    )
        .into_response()
}

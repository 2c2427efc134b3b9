use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

use common::ConversionJob;
use common::storage::{BoxReader, EntityKind, FileVault, IterationKey, resolve};

use crate::convert::spawn_conversion;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::state::AppState;
use crate::utils::download::{DownloadDescriptor, Precondition, evaluate_preconditions};
use crate::utils::filename::{validate_flat_filename, validate_sub_type};
use crate::utils::range::parse_range;

pub fn upload_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(512 * 1024 * 1024) // 512 MB
}

/// Query parameters tweaking a download response.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// Content-type override: a full MIME type or a bare file extension.
    #[serde(rename = "type")]
    pub type_override: Option<String>,
    /// `inline` serves the file for in-browser display instead of attachment.
    pub output: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/files/{workspace}/{entity_kind}/{entity_id}/{version}/{iteration}",
    tag = "Files",
    operation_id = "uploadFiles",
    summary = "Upload files to an iteration",
    description = "Multipart upload of one or more files onto a part or document iteration. \
        Each file part is reserved, streamed to the vault and finalized in order; a failing \
        part does not roll back files already stored. A single uploaded file answers 201 \
        with a Location header, several answer a bare 200.",
    request_body(content_type = "multipart/form-data", description = "One or more file parts"),
    responses(
        (status = 201, description = "Single file stored, Location points at it"),
        (status = 200, description = "All files stored"),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED, USER_NOT_ACTIVE, NOT_ALLOWED)", body = ErrorBody),
        (status = 404, description = "Iteration not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Conflicting file record (CONFLICT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, multipart))]
pub async fn upload_files(
    auth_user: AuthUser,
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path((workspace, entity_kind, entity_id, version, iteration)): Path<(
        String,
        String,
        String,
        String,
        u32,
    )>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let key = iteration_key(workspace, &entity_kind, entity_id, version, iteration)?;
    do_upload(state, auth_user, uri.path(), key, None, multipart).await
}

#[utoipa::path(
    post,
    path = "/api/v1/files/{workspace}/{entity_kind}/{entity_id}/{version}/{iteration}/{sub_type}",
    tag = "Files",
    operation_id = "uploadSubTypedFiles",
    summary = "Upload sub-typed files to an iteration",
    description = "Like `uploadFiles`, but places the files under a sub-type namespace. \
        On part iterations a sub type marks native CAD content: finalize goes through the \
        CAD-specific save and a conversion job is dispatched to the viewer-geometry converter.",
    request_body(content_type = "multipart/form-data", description = "One or more file parts"),
    responses(
        (status = 201, description = "Single file stored, Location points at it"),
        (status = 200, description = "All files stored"),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED, USER_NOT_ACTIVE, NOT_ALLOWED)", body = ErrorBody),
        (status = 404, description = "Iteration not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Conflicting file record (CONFLICT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, multipart))]
pub async fn upload_sub_typed_files(
    auth_user: AuthUser,
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path((workspace, entity_kind, entity_id, version, iteration, sub_type)): Path<(
        String,
        String,
        String,
        String,
        u32,
        String,
    )>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let key = iteration_key(workspace, &entity_kind, entity_id, version, iteration)?;
    do_upload(state, auth_user, uri.path(), key, Some(sub_type), multipart).await
}

#[utoipa::path(
    post,
    path = "/api/v1/shared/{token}/{entity_kind}/{iteration}",
    tag = "Shared Files",
    operation_id = "uploadSharedRejected",
    summary = "Uploads are rejected on shared-access routes",
    responses(
        (status = 405, description = "Shared tokens grant read access only (METHOD_NOT_ALLOWED)", body = ErrorBody),
    ),
)]
pub async fn upload_shared_rejected(
    Path((_token, _entity_kind, _iteration)): Path<(String, String, u32)>,
) -> Result<Response, AppError> {
    // A shared token is a read credential; presenting one on an upload route
    // is a protocol violation.
    Err(AppError::MethodNotAllowed)
}

#[utoipa::path(
    post,
    path = "/api/v1/shared/{token}/{entity_kind}/{iteration}/{sub_type}",
    tag = "Shared Files",
    operation_id = "uploadSharedSubTypedRejected",
    summary = "Uploads are rejected on shared-access routes",
    responses(
        (status = 405, description = "Shared tokens grant read access only (METHOD_NOT_ALLOWED)", body = ErrorBody),
    ),
)]
pub async fn upload_shared_sub_typed_rejected(
    Path((_token, _entity_kind, _iteration, _sub_type)): Path<(String, String, u32, String)>,
) -> Result<Response, AppError> {
    Err(AppError::MethodNotAllowed)
}

#[utoipa::path(
    get,
    path = "/api/v1/files/{workspace}/{entity_kind}/{entity_id}/{version}/{iteration}/{file_name}",
    tag = "Files",
    operation_id = "downloadFile",
    summary = "Download a file from an iteration",
    description = "Streams the file. Supports `Range` requests and the usual cache \
        validators (`If-None-Match`, `If-Modified-Since`); `type` and `output` query \
        parameters override the content type and disposition.",
    params(
        ("workspace" = String, Path, description = "Workspace ID"),
        ("entity_kind" = String, Path, description = "`parts` or `documents`"),
        ("entity_id" = String, Path, description = "Part number / document ID"),
        ("version" = String, Path, description = "Version label"),
        ("iteration" = u32, Path, description = "Iteration number"),
        ("file_name" = String, Path, description = "File name"),
    ),
    responses(
        (status = 200, description = "Full file content"),
        (status = 206, description = "Partial content for a satisfiable Range"),
        (status = 304, description = "Not modified (validator match)"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED, USER_NOT_ACTIVE)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
        (status = 412, description = "Precondition failed (PRECONDITION_FAILED)", body = ErrorBody),
        (status = 416, description = "Range not satisfiable, Content-Range carries the length", body = ErrorBody),
        (status = 500, description = "Storage fault (STORAGE_FAULT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, headers))]
pub async fn download_file(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((workspace, entity_kind, entity_id, version, iteration, file_name)): Path<(
        String,
        String,
        String,
        String,
        u32,
        String,
    )>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = iteration_key(workspace, &entity_kind, entity_id, version, iteration)?;
    require_read(&state, &auth_user, &key).await?;
    serve_file(&state, &key, None, &file_name, &headers, &query).await
}

#[utoipa::path(
    get,
    path = "/api/v1/files/{workspace}/{entity_kind}/{entity_id}/{version}/{iteration}/{sub_type}/{file_name}",
    tag = "Files",
    operation_id = "downloadSubTypedFile",
    summary = "Download a sub-typed file from an iteration",
    responses(
        (status = 200, description = "Full file content"),
        (status = 206, description = "Partial content for a satisfiable Range"),
        (status = 304, description = "Not modified (validator match)"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED, USER_NOT_ACTIVE)", body = ErrorBody),
        (status = 404, description = "File not found (NOT_FOUND)", body = ErrorBody),
        (status = 412, description = "Precondition failed (PRECONDITION_FAILED)", body = ErrorBody),
        (status = 416, description = "Range not satisfiable, Content-Range carries the length", body = ErrorBody),
        (status = 500, description = "Storage fault (STORAGE_FAULT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, headers))]
pub async fn download_sub_typed_file(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((workspace, entity_kind, entity_id, version, iteration, sub_type, file_name)): Path<(
        String,
        String,
        String,
        String,
        u32,
        String,
        String,
    )>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = iteration_key(workspace, &entity_kind, entity_id, version, iteration)?;
    require_read(&state, &auth_user, &key).await?;
    serve_file(&state, &key, Some(&sub_type), &file_name, &headers, &query).await
}

#[utoipa::path(
    get,
    path = "/api/v1/shared/{token}/{entity_kind}/{iteration}/{file_name}",
    tag = "Shared Files",
    operation_id = "downloadSharedFile",
    summary = "Download a file through a share token",
    description = "The token alone is the credential: it pins a workspace, entity and \
        version, and no per-user access check is performed. The iteration comes from the \
        request path. Unknown or expired tokens answer 404; a token pinned to a different \
        entity kind than the one requested answers 403.",
    responses(
        (status = 200, description = "Full file content"),
        (status = 206, description = "Partial content for a satisfiable Range"),
        (status = 304, description = "Not modified (validator match)"),
        (status = 403, description = "Entity kind mismatch (NOT_ALLOWED)", body = ErrorBody),
        (status = 404, description = "Unknown token or file (NOT_FOUND)", body = ErrorBody),
        (status = 416, description = "Range not satisfiable, Content-Range carries the length", body = ErrorBody),
        (status = 500, description = "Storage fault (STORAGE_FAULT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers))]
pub async fn download_shared_file(
    State(state): State<AppState>,
    Path((token, entity_kind, iteration, file_name)): Path<(String, String, u32, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = resolve_shared(&state, &token, &entity_kind, iteration).await?;
    serve_file(&state, &key, None, &file_name, &headers, &query).await
}

#[utoipa::path(
    get,
    path = "/api/v1/shared/{token}/{entity_kind}/{iteration}/{sub_type}/{file_name}",
    tag = "Shared Files",
    operation_id = "downloadSharedSubTypedFile",
    summary = "Download a sub-typed file through a share token",
    responses(
        (status = 200, description = "Full file content"),
        (status = 206, description = "Partial content for a satisfiable Range"),
        (status = 304, description = "Not modified (validator match)"),
        (status = 403, description = "Entity kind mismatch (NOT_ALLOWED)", body = ErrorBody),
        (status = 404, description = "Unknown token or file (NOT_FOUND)", body = ErrorBody),
        (status = 416, description = "Range not satisfiable, Content-Range carries the length", body = ErrorBody),
        (status = 500, description = "Storage fault (STORAGE_FAULT)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers))]
pub async fn download_shared_sub_typed_file(
    State(state): State<AppState>,
    Path((token, entity_kind, iteration, sub_type, file_name)): Path<(
        String,
        String,
        u32,
        String,
        String,
    )>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let key = resolve_shared(&state, &token, &entity_kind, iteration).await?;
    serve_file(&state, &key, Some(&sub_type), &file_name, &headers, &query).await
}

fn iteration_key(
    workspace: String,
    kind_segment: &str,
    entity_id: String,
    version: String,
    iteration: u32,
) -> Result<IterationKey, AppError> {
    let kind = EntityKind::from_segment(kind_segment)
        .ok_or_else(|| AppError::NotFound(format!("Unknown entity kind: {kind_segment}")))?;
    Ok(IterationKey {
        workspace,
        kind,
        entity_id,
        version,
        iteration,
    })
}

async fn require_read(
    state: &AppState,
    auth_user: &AuthUser,
    key: &IterationKey,
) -> Result<(), AppError> {
    auth_user.require_active()?;
    if !state.gate.can_read(&auth_user.login, key).await {
        return Err(AppError::PermissionDenied);
    }
    Ok(())
}

/// Resolve a share token into the iteration key it grants access to. The
/// pinned entity supplies everything but the iteration number, which comes
/// from the request path.
async fn resolve_shared(
    state: &AppState,
    token: &str,
    kind_segment: &str,
    iteration: u32,
) -> Result<IterationKey, AppError> {
    let kind = EntityKind::from_segment(kind_segment)
        .ok_or_else(|| AppError::NotFound(format!("Unknown entity kind: {kind_segment}")))?;
    let token =
        Uuid::parse_str(token).map_err(|_| AppError::Validation("Invalid share token".into()))?;

    let target = state.shares.resolve(token).await?;
    if target.kind != kind {
        return Err(AppError::NotAllowed(
            "Share token does not grant access to this entity kind".into(),
        ));
    }

    Ok(IterationKey {
        workspace: target.workspace,
        kind: target.kind,
        entity_id: target.entity_id,
        version: target.version,
        iteration,
    })
}

async fn do_upload(
    state: AppState,
    auth_user: AuthUser,
    request_path: &str,
    key: IterationKey,
    sub_type: Option<String>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    auth_user.require_active()?;
    if !state.gate.can_write(&auth_user.login, &key).await {
        return Err(AppError::PermissionDenied);
    }

    let sub_type = match sub_type.as_deref() {
        Some(s) => Some(
            validate_sub_type(s)
                .map_err(|e| AppError::Validation(e.into()))?
                .to_string(),
        ),
        None => None,
    };

    let mut stored: Vec<String> = Vec::new();
    let mut attempted = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        // Only file parts carry a filename; other form fields are ignored.
        let Some(file_name) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        attempted += 1;

        match save_part(&state, &key, sub_type.as_deref(), &file_name, field).await {
            Ok(name) => stored.push(name),
            Err(e) if stored.is_empty() => return Err(e),
            Err(e) => {
                // Already-finalized parts stay; the client has to know the
                // request was only partially applied.
                return Err(e.with_context(&format!(
                    "stored {} of {} uploaded files before failure",
                    stored.len(),
                    attempted
                )));
            }
        }
    }

    match stored.as_slice() {
        [] => Err(AppError::Validation("Missing file part".into())),
        [file_name] => {
            let location = format!("{}/{}", request_path.trim_end_matches('/'), file_name);
            Ok((StatusCode::CREATED, [(header::LOCATION, location)]).into_response())
        }
        // Several files were stored; a single Location would be ambiguous.
        _ => Ok(StatusCode::OK.into_response()),
    }
}

/// Save one uploaded file part: reserve the record at length 0, stream the
/// bytes into the vault (atomic publish), then finalize with the counted
/// length. Native CAD parts finalize through the CAD-specific save and
/// dispatch a conversion job.
async fn save_part(
    state: &AppState,
    key: &IterationKey,
    sub_type: Option<&str>,
    file_name: &str,
    field: Field<'_>,
) -> Result<String, AppError> {
    let file_name = validate_flat_filename(file_name)
        .map_err(|e| AppError::Validation(e.message().into()))?
        .to_string();

    let native_cad = key.kind == EntityKind::Parts && sub_type.is_some();

    let record = match (native_cad, sub_type) {
        (true, Some(sub)) => {
            state
                .registry
                .save_native_cad(key, sub, &file_name, 0)
                .await?
        }
        _ => state.registry.save_file(key, sub_type, &file_name, 0).await?,
    };

    let length = stream_field_to_vault(
        field,
        &*state.vault,
        &record.path,
        state.config.storage.max_file_size,
    )
    .await?;

    match (native_cad, sub_type) {
        (true, Some(sub)) => {
            state
                .registry
                .save_native_cad(key, sub, &file_name, length)
                .await?;
            spawn_conversion(
                state.converter.clone(),
                ConversionJob::new(key.clone(), sub, record.path.clone()),
            );
        }
        _ => {
            state
                .registry
                .save_file(key, sub_type, &file_name, length)
                .await?;
        }
    }

    Ok(file_name)
}

/// Stream a multipart field into the vault via a spool file, so the vault
/// sees one contiguous reader and memory use stays bounded.
async fn stream_field_to_vault(
    mut field: Field<'_>,
    vault: &dyn FileVault,
    path: &str,
    max_size: u64,
) -> Result<u64, AppError> {
    let spool_path = std::env::temp_dir().join(format!("plmvault-upload-{}", Uuid::new_v4()));

    let result = async {
        let mut spool = tokio::fs::File::create(&spool_path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create spool file: {e}")))?;

        let mut total: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
        {
            total += chunk.len() as u64;
            if total > max_size {
                return Err(AppError::Validation(format!(
                    "File exceeds maximum size of {max_size} bytes"
                )));
            }
            spool
                .write_all(&chunk)
                .await
                .map_err(|e| AppError::Storage(format!("spool write failed: {e}")))?;
        }

        spool
            .flush()
            .await
            .map_err(|e| AppError::Storage(format!("spool flush failed: {e}")))?;
        drop(spool);

        let file = tokio::fs::File::open(&spool_path)
            .await
            .map_err(|e| AppError::Storage(format!("failed to reopen spool file: {e}")))?;
        let reader: BoxReader = Box::new(file);
        let length = vault.put_stream(path, reader).await?;

        Ok(length)
    }
    .await;

    // Best effort.
    let _ = tokio::fs::remove_file(&spool_path).await;

    result
}

/// Serve one file: load the record, evaluate cache validators before touching
/// storage, then answer with partial or full content.
async fn serve_file(
    state: &AppState,
    key: &IterationKey,
    sub_type: Option<&str>,
    file_name: &str,
    headers: &HeaderMap,
    query: &DownloadQuery,
) -> Result<Response, AppError> {
    let file_name = validate_flat_filename(file_name)
        .map_err(|e| AppError::Validation(e.message().into()))?;
    if let Some(sub) = sub_type {
        validate_sub_type(sub).map_err(|e| AppError::Validation(e.into()))?;
    }

    let path = resolve(key, sub_type, file_name)?;
    let record = state.registry.binary_resource(&path).await?;

    let descriptor = DownloadDescriptor::new(
        &record,
        file_name,
        sub_type,
        query.type_override.as_deref(),
        query.output.as_deref(),
    );

    match evaluate_preconditions(headers, &descriptor) {
        Precondition::NotModified => return Ok(StatusCode::NOT_MODIFIED.into_response()),
        Precondition::Failed => return Err(AppError::PreconditionFailed),
        Precondition::Proceed => {}
    }

    let range = parse_range(headers.get(header::RANGE), record.length)?;

    let mut builder = Response::builder()
        .header(header::ETAG, &descriptor.etag)
        .header(header::LAST_MODIFIED, descriptor.last_modified_http())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, &descriptor.content_type)
        .header(header::CONTENT_DISPOSITION, &descriptor.content_disposition)
        .header(header::CACHE_CONTROL, "private, max-age=3600");
    if let Some(sub) = &descriptor.sub_resource_path {
        builder = builder.header("X-Sub-Resource-Path", sub);
    }

    let response = if let Some((start, end)) = range {
        let span = end - start + 1;
        let reader = state
            .vault
            .get_range(&path, start, span)
            .await
            .map_err(|e| AppError::Storage(format!("range read {path}: {e}")))?;
        builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{}", record.length),
            )
            .header(header::CONTENT_LENGTH, span.to_string())
            .body(Body::from_stream(ReaderStream::new(reader)))
    } else if record.length == 0 {
        // Reserved placeholder or genuinely empty file: nothing to stream.
        builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, "0")
            .body(Body::empty())
    } else {
        // The record resolved, so missing bytes from here on are a storage
        // fault, not a 404.
        let reader = state
            .vault
            .get_stream(&path)
            .await
            .map_err(|e| AppError::Storage(format!("read {path}: {e}")))?;
        builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, record.length.to_string())
            .body(Body::from_stream(ReaderStream::new(reader)))
    };

    response.map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

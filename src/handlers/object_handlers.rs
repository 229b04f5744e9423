//! HTTP handlers for object operations.
//! Thin marshaling around `ObjectStore`: every rule about identity, payloads
//! and tokens lives there.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::object::{ObjectInfo, ObjectRecord},
};
use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;

/// Request header selecting the tenant schema; falls back to the configured default.
pub const SCHEMA_HEADER: &str = "x-object-schema";

/// Query params accepted by the download route.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub token: Option<String>,
}

fn schema_from(headers: &HeaderMap, state: &AppState) -> String {
    headers
        .get(SCHEMA_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| state.default_schema.clone())
}

async fn find_object(
    state: &AppState,
    schema: &str,
    bucket: &str,
    key: &str,
) -> Result<ObjectRecord, AppError> {
    state
        .store
        .get_metadata(schema, bucket, key)
        .await?
        .ok_or_else(|| AppError::not_found("not found"))
}

/// Upload an object to `/objects/{bucket}/{*key}`.
///
/// Raw bodies (no content type, `text/plain`, `application/octet-stream`)
/// are stored under the key's last segment; `multipart/form-data` uploads
/// use the `file` field and its file name.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    request: Request,
) -> Result<Json<ObjectInfo>, AppError> {
    let schema = schema_from(request.headers(), &state);
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (file_name, payload) = if content_type.is_empty()
        || content_type.starts_with("text/plain")
        || content_type.starts_with("application/octet-stream")
    {
        let file_name = key.rsplit('/').next().unwrap_or(&key).to_string();
        let payload = axum::body::to_bytes(request.into_body(), state.max_object_size)
            .await
            .map_err(|e| AppError::bad_request(format!("read object: {}", e)))?;
        (file_name, payload)
    } else if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::bad_request(format!("read object: {}", e.body_text())))?;
        read_file_field(&mut multipart).await?
    } else {
        return Err(AppError::bad_request(format!(
            "invalid content type {}",
            content_type
        )));
    };

    let record = state
        .store
        .put(&schema, &bucket, &key, &file_name, payload)
        .await?;
    Ok(Json(state.store.object_info(record)))
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("read object: {}", e.body_text())))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("file field has no file name"))?;
        let payload = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(format!("read object: {}", e.body_text())))?;
        return Ok((file_name, payload));
    }
    Err(AppError::bad_request("missing multipart field `file`"))
}

/// GET `/info/{bucket}/{*key}`: metadata plus a fresh download URL.
///
/// The URL names only bucket and key. Objects outside the default schema
/// must be fetched with the same `x-object-schema` header used here.
pub async fn get_object_info(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<ObjectInfo>, AppError> {
    let schema = schema_from(&headers, &state);
    let record = find_object(&state, &schema, &bucket, &key).await?;
    Ok(Json(state.store.object_info(record)))
}

/// GET `/objects/{bucket}/{*key}?token=`: download authorized by token alone.
///
/// The schema comes from the `x-object-schema` header, not the URL, so a
/// download URL for a non-default schema only resolves when that header is sent.
pub async fn download_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let schema = schema_from(&headers, &state);
    let record = find_object(&state, &schema, &bucket, &key).await?;
    let token = query
        .token
        .ok_or_else(|| AppError::unauthorized("unauthorized"))?;
    state.store.authorize_download(&record, &token)?;

    let content = state.store.get_content(Some(&record)).await?;

    let mut response = Response::new(Body::from(content));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&record.file_name),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Disposition"),
    );
    Ok(response)
}

/// `attachment` disposition with `file_name` as a quoted string; `"` and `\`
/// are backslash-escaped.
fn content_disposition(file_name: &str) -> HeaderValue {
    let mut quoted = String::with_capacity(file_name.len());
    for c in file_name.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", quoted))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// DELETE `/objects/{bucket}/{*key}`
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let schema = schema_from(&headers, &state);
    let record = find_object(&state, &schema, &bucket, &key).await?;
    state.store.remove_by_id(&record.schema, record.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

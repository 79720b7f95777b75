//! Material routes for the app-server.
//!
//! Thin adapters from HTTP requests onto [`WatchController`]. Every JSON
//! route answers with the [`ApiResponse`] envelope.

use std::path::{Path as FsPath, PathBuf};

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use sau_folder_watcher::{MaterialRecord, WatchStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::response::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetFileParams {
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetWatchFolderRequest {
    pub folder_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMaterial {
    pub id: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchFolderSet {
    pub folder_path: PathBuf,
}

/// `GET /getFiles`
pub async fn get_files(State(state): State<AppState>) -> Json<ApiResponse<Vec<MaterialRecord>>> {
    let records = state.controller.list().await;
    Json(ApiResponse::success("success", records))
}

/// `POST /uploadSave`
pub async fn upload_save(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ApiResponse<MaterialRecord>>> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut custom_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                let original = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                upload = Some((original, bytes.to_vec()));
            }
            Some("filename") => {
                custom_name = Some(field.text().await.map_err(multipart_error)?);
            }
            other => debug!("Ignoring multipart field {other:?}"),
        }
    }

    let Some((original, bytes)) = upload else {
        return Err(ApiError::bad_request("No file part in the request"));
    };
    if original.trim().is_empty() {
        return Err(ApiError::bad_request("No selected file"));
    }

    let file_name = stored_file_name(&original, custom_name.as_deref());
    let record = state.controller.pipeline().upload(&file_name, &bytes).await?;
    info!("Uploaded {} ({} bytes)", record.file_name, record.size_bytes);

    Ok(Json(ApiResponse::success("File uploaded successfully", record)))
}

/// `GET /deleteFile?id=<id>`
pub async fn delete_file(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<Json<ApiResponse<DeletedMaterial>>> {
    let id = params
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("File ID is required"))?;

    let record = state.controller.pipeline().delete(&id).await?;
    Ok(Json(ApiResponse::success(
        "File deleted successfully",
        DeletedMaterial {
            id: record.id,
            file_name: record.file_name,
        },
    )))
}

/// `GET /download/{*filePath}`
pub async fn download(
    State(state): State<AppState>,
    Path(file_path): Path<String>,
) -> ApiResult<Response> {
    let (record, bytes) = state.controller.pipeline().read(&file_path).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        record.file_name.replace('"', "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, record.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// `GET /getFile?filename=<name>`
pub async fn get_file(
    State(state): State<AppState>,
    Query(params): Query<GetFileParams>,
) -> ApiResult<Response> {
    let file_name = params
        .filename
        .ok_or_else(|| ApiError::bad_request("filename is required"))?;

    let (record, bytes) = state.controller.pipeline().read(&file_name).await?;
    Ok(([(header::CONTENT_TYPE, record.mime_type)], bytes).into_response())
}

/// `GET /getWatchFolder`
pub async fn get_watch_folder(State(state): State<AppState>) -> Json<ApiResponse<WatchStatus>> {
    Json(ApiResponse::success("success", state.controller.status().await))
}

/// `POST /setWatchFolder`
pub async fn set_watch_folder(
    State(state): State<AppState>,
    Json(request): Json<SetWatchFolderRequest>,
) -> ApiResult<Json<ApiResponse<WatchFolderSet>>> {
    let folder_path = state
        .controller
        .start_watch(FsPath::new(&request.folder_path))
        .await?;
    Ok(Json(ApiResponse::success(
        "Watch folder set",
        WatchFolderSet { folder_path },
    )))
}

/// `POST /stopWatchFolder`
pub async fn stop_watch_folder(State(state): State<AppState>) -> ApiResult<Json<ApiResponse<()>>> {
    state.controller.stop_watch().await?;
    Ok(Json(ApiResponse::empty("Watch folder stopped")))
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::new(err.status(), format!("Malformed upload: {}", err.body_text()))
}

/// Name to store an upload under.
///
/// A non-empty custom name replaces the uploaded name but keeps its
/// extension.
fn stored_file_name(original: &str, custom: Option<&str>) -> String {
    let Some(custom) = custom.map(str::trim).filter(|c| !c.is_empty()) else {
        return original.to_string();
    };
    match FsPath::new(original).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{custom}.{ext}"),
        _ => custom.to_string(),
    }
}

//! External object (asset) endpoints.
//!
//! Assets live under `<asset_root>/<slot>/<oid>` on disk, written with
//! `dm_core::asset::write_atomic` so a concurrent reader never observes a
//! partially-uploaded file, and served with a `gzip`/`deflate` negotiated
//! `Content-Encoding` plus a SHA-256 `ETag`. Download requires `monitor`;
//! upload and delete require `operate:w`.

use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode as HttpStatusCode};
use axum::Json;

use dm_core::asset::{
    decompress, safe_relative_path, write_atomic, AssetEncoding, ExternalObjectPayload,
};
use dm_core::error::DmStatus;
use dm_core::Scope;

use crate::auth::authorizer_from_headers;
use crate::error::{HttpError, HttpResult};
use crate::AppState;

fn negotiate_encoding(headers: &HeaderMap) -> AssetEncoding {
    let accept = headers
        .get(axum::http::header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if accept.contains("gzip") {
        AssetEncoding::Gzip
    } else if accept.contains("deflate") {
        AssetEncoding::Deflate
    } else {
        AssetEncoding::Identity
    }
}

fn request_encoding(headers: &HeaderMap) -> AssetEncoding {
    let header = headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());
    AssetEncoding::from_content_encoding_header(header)
}

fn asset_fqoid(slot: u32, oid: &str) -> String {
    let oid = oid.trim_start_matches('/');
    format!("/{slot}/{oid}")
}

fn asset_path(state: &AppState, slot: u32, oid: &str) -> HttpResult<std::path::PathBuf> {
    let fqoid = asset_fqoid(slot, oid);
    let relative = safe_relative_path(&fqoid)?;
    Ok(state.asset_root.join(relative))
}

pub async fn get_asset(
    State(state): State<AppState>,
    AxumPath((slot, oid)): AxumPath<(u32, String)>,
    headers: HeaderMap,
) -> HttpResult<Json<ExternalObjectPayload>> {
    let authz = authorizer_from_headers(&headers, state.authz_disabled)?;
    if !authz.read_authz(&(Scope::Monitor, false)) {
        return Err(HttpError(DmStatus::permission_denied(
            "Not authorized to download assets",
        )));
    }
    let path = asset_path(&state, slot, &oid)?;
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|_| HttpError(DmStatus::not_found(format!("No asset at {oid}"))))?;

    let encoding = negotiate_encoding(&headers);
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("asset")
        .to_string();
    let payload = ExternalObjectPayload::new(&filename, &raw, encoding)?;
    Ok(Json(payload))
}

pub async fn post_asset(
    State(state): State<AppState>,
    AxumPath((slot, oid)): AxumPath<(u32, String)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> HttpResult<HttpStatusCode> {
    let authz = authorizer_from_headers(&headers, state.authz_disabled)?;
    if !authz.write_authz(&(Scope::Operate, false)) {
        return Err(HttpError(DmStatus::permission_denied(
            "Not authorized to upload assets",
        )));
    }
    let path = asset_path(&state, slot, &oid)?;
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(HttpError(DmStatus::already_exists(format!(
            "Asset already exists at {oid}"
        ))));
    }
    let raw = decompress(&body, request_encoding(&headers))?;
    let fqoid = asset_fqoid(slot, &oid);
    write_atomic(&state.asset_root, &fqoid, &raw).await?;
    Ok(HttpStatusCode::NO_CONTENT)
}

pub async fn put_asset(
    State(state): State<AppState>,
    AxumPath((slot, oid)): AxumPath<(u32, String)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> HttpResult<HttpStatusCode> {
    let authz = authorizer_from_headers(&headers, state.authz_disabled)?;
    if !authz.write_authz(&(Scope::Operate, false)) {
        return Err(HttpError(DmStatus::permission_denied(
            "Not authorized to upload assets",
        )));
    }
    let path = asset_path(&state, slot, &oid)?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(HttpError(DmStatus::not_found(format!("No asset at {oid}"))));
    }
    let raw = decompress(&body, request_encoding(&headers))?;
    let fqoid = asset_fqoid(slot, &oid);
    write_atomic(&state.asset_root, &fqoid, &raw).await?;
    Ok(HttpStatusCode::NO_CONTENT)
}

pub async fn delete_asset(
    State(state): State<AppState>,
    AxumPath((slot, oid)): AxumPath<(u32, String)>,
    headers: HeaderMap,
) -> HttpResult<HttpStatusCode> {
    let authz = authorizer_from_headers(&headers, state.authz_disabled)?;
    if !authz.write_authz(&(Scope::Operate, false)) {
        return Err(HttpError(DmStatus::permission_denied(
            "Not authorized to delete assets",
        )));
    }
    let path = asset_path(&state, slot, &oid)?;
    tokio::fs::remove_file(&path)
        .await
        .map_err(|_| HttpError(DmStatus::not_found(format!("No asset at {oid}"))))?;
    Ok(HttpStatusCode::NO_CONTENT)
}

//! Compression, digest, and atomic-write helpers backing the HTTP asset
//! controller.

use std::io::{Read, Write};
use std::path::{Path as FsPath, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::error::{DmResult, DmStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetEncoding {
    Identity,
    Deflate,
    Gzip,
}

impl AssetEncoding {
    pub fn content_encoding_header(self) -> Option<&'static str> {
        match self {
            AssetEncoding::Identity => None,
            AssetEncoding::Deflate => Some("deflate"),
            AssetEncoding::Gzip => Some("gzip"),
        }
    }

    pub fn from_content_encoding_header(header: Option<&str>) -> Self {
        match header.unwrap_or("") {
            "gzip" => AssetEncoding::Gzip,
            "deflate" => AssetEncoding::Deflate,
            _ => AssetEncoding::Identity,
        }
    }
}

/// Compresses `body` per `encoding`. `Identity` is a passthrough copy.
pub fn compress(body: &[u8], encoding: AssetEncoding) -> DmResult<Vec<u8>> {
    match encoding {
        AssetEncoding::Identity => Ok(body.to_vec()),
        AssetEncoding::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            Ok(encoder.finish()?)
        }
        AssetEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Reverses `compress`: decodes an upload body declared under `encoding` via
/// `Content-Encoding` back to its raw bytes before it is written to disk.
pub fn decompress(body: &[u8], encoding: AssetEncoding) -> DmResult<Vec<u8>> {
    let mut out = Vec::new();
    match encoding {
        AssetEncoding::Identity => Ok(body.to_vec()),
        AssetEncoding::Deflate => {
            DeflateDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| DmStatus::internal(format!("Failed to decompress asset body: {e}")))?;
            Ok(out)
        }
        AssetEncoding::Gzip => {
            GzDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| DmStatus::internal(format!("Failed to decompress asset body: {e}")))?;
            Ok(out)
        }
    }
}

/// Hex-encoded SHA-256 digest, used as the asset's `ETag`.
pub fn sha256_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Rejects an fqoid that would escape `root` once joined: empty segments,
/// `.`/`..` segments, and absolute (re-rooting) segments are all refused.
pub fn safe_relative_path(fqoid: &str) -> DmResult<String> {
    let relative = fqoid.trim_start_matches('/');
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(DmStatus::invalid_argument(format!(
                "Invalid asset path '{fqoid}'"
            )));
        }
    }
    Ok(relative.to_string())
}

/// Writes `body` to `<root>/<fqoid>` atomically: stage into a sibling
/// `.tmp-<uuid>` file, `fsync`-free rename over the destination. A reader
/// never observes a partially-written asset.
pub async fn write_atomic(root: &FsPath, fqoid: &str, body: &[u8]) -> DmResult<PathBuf> {
    let relative = safe_relative_path(fqoid)?;
    let dest = root.join(relative);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_name = format!(
        "{}.tmp-{}",
        dest.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("asset"),
        uuid::Uuid::new_v4()
    );
    let tmp_path = dest.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, body).await?;
    tokio::fs::rename(&tmp_path, &dest).await.map_err(|e| {
        DmStatus::internal(format!("Failed to publish asset {fqoid}: {e}"))
    })?;
    Ok(dest)
}

/// `{filename, size}` — part of the `ExternalObjectPayload` envelope.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub filename: String,
    pub size: u64,
}

/// The encoded body plus its digest and metadata.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPayload {
    pub encoding: String,
    pub metadata: AssetMetadata,
    pub digest: String,
    /// Base64-encoded, possibly-compressed bytes.
    pub payload: String,
}

/// Wire envelope for `AssetRequest` GET responses.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalObjectPayload {
    pub cachable: bool,
    pub payload: AssetPayload,
}

impl ExternalObjectPayload {
    pub fn new(filename: &str, raw: &[u8], encoding: AssetEncoding) -> DmResult<Self> {
        let digest = sha256_hex(raw);
        let encoded = compress(raw, encoding)?;
        Ok(Self {
            cachable: true,
            payload: AssetPayload {
                encoding: encoding
                    .content_encoding_header()
                    .unwrap_or("identity")
                    .to_string(),
                metadata: AssetMetadata {
                    filename: filename.to_string(),
                    size: raw.len() as u64,
                },
                digest,
                payload: BASE64.encode(encoded),
            },
        })
    }
}

//! Request parsing boundary
//!
//! SWORD headers are validated once here and turned into typed
//! [`DepositRequest`] / [`DeleteRequest`] values. Bodies are size-checked
//! against the configured ceiling before they are buffered.

use crate::error::{ErrorKind, SwordError};
use crate::request::{Auth, DeleteRequest, DepositRequest};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderMap};
use tracing::debug;

/// The SWORD-relevant headers of a request
#[derive(Debug, Clone, Default)]
pub struct SwordHeaders {
    pub on_behalf_of: Option<String>,
    pub packaging: Option<String>,
    pub in_progress: bool,
    pub metadata_relevant: bool,
    pub content_md5: Option<String>,
    pub slug: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_bool(headers: &HeaderMap, name: &str, default: bool) -> Result<bool, SwordError> {
    match header_str(headers, name) {
        None => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(SwordError::bad_request(format!(
            "{} must be 'true' or 'false', got '{}'",
            name, v
        ))),
    }
}

impl SwordHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, SwordError> {
        let content_length = match header_str(headers, header::CONTENT_LENGTH.as_str()) {
            Some(v) => Some(v.parse::<u64>().map_err(|_| {
                SwordError::bad_request(format!("Content-Length is not a number: '{}'", v))
            })?),
            None => None,
        };

        Ok(Self {
            on_behalf_of: header_str(headers, "on-behalf-of").map(str::to_string),
            packaging: header_str(headers, "packaging").map(str::to_string),
            in_progress: parse_bool(headers, "in-progress", false)?,
            metadata_relevant: parse_bool(headers, "metadata-relevant", true)?,
            content_md5: header_str(headers, "content-md5").map(str::to_string),
            slug: header_str(headers, "slug").map(str::to_string),
            filename: header_str(headers, header::CONTENT_DISPOSITION.as_str())
                .and_then(extract_filename),
            content_type: header_str(headers, header::CONTENT_TYPE.as_str()).map(str::to_string),
            content_length,
        })
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/"))
    }

    pub fn is_entry(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/atom+xml"))
    }

    /// 413 if the declared length is over the ceiling
    pub fn check_size(&self, max_upload_size: u64) -> Result<(), SwordError> {
        match self.content_length {
            Some(len) if len > max_upload_size => Err(too_large(max_upload_size)),
            _ => Ok(()),
        }
    }

    fn base_request(&self, auth: Auth) -> DepositRequest {
        let mut req = DepositRequest {
            in_progress: self.in_progress,
            metadata_relevant: self.metadata_relevant,
            content_md5: self.content_md5.clone(),
            slug: self.slug.clone(),
            auth,
            ..DepositRequest::default()
        };
        if let Some(packaging) = &self.packaging {
            req.packaging = packaging.clone();
        }
        if let Some(filename) = &self.filename {
            req.filename = filename.clone();
        }
        req
    }

    pub fn delete_request(&self, auth: Auth) -> DeleteRequest {
        DeleteRequest {
            in_progress: self.in_progress,
            metadata_relevant: self.metadata_relevant,
            auth,
        }
    }
}

fn too_large(max_upload_size: u64) -> SwordError {
    SwordError::new(
        ErrorKind::MaxUploadSizeExceeded,
        format!("Request body exceeds the maximum upload size of {} bytes", max_upload_size),
    )
}

/// `attachment; filename="thesis.zip"` -> `thesis.zip`
pub fn extract_filename(content_disposition: &str) -> Option<String> {
    content_disposition.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Buffer a body, failing with 413 once it passes the ceiling
pub async fn read_body<B>(body: B, max_upload_size: u64) -> Result<Bytes, SwordError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let limit = usize::try_from(max_upload_size).unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(too_large(max_upload_size)),
        Err(e) => Err(SwordError::bad_request(format!("Failed to read body: {}", e))),
    }
}

/// How a body is interpreted for a given route
#[derive(Debug, Clone, Copy)]
pub struct BodyMode {
    pub allow_multipart: bool,
    /// An `application/atom+xml` body is an entry rather than opaque content
    pub detect_entry: bool,
}

impl BodyMode {
    pub const CONTAINER: BodyMode = BodyMode {
        allow_multipart: true,
        detect_entry: true,
    };
    pub const MEDIA: BodyMode = BodyMode {
        allow_multipart: true,
        detect_entry: false,
    };
    pub const MEDIA_REPLACE: BodyMode = BodyMode {
        allow_multipart: false,
        detect_entry: false,
    };
}

/// Build a deposit from the headers and the buffered body
pub async fn deposit_request(
    headers: &SwordHeaders,
    body: Bytes,
    auth: Auth,
    mode: BodyMode,
) -> Result<DepositRequest, SwordError> {
    let mut req = headers.base_request(auth);
    req.content_length = headers.content_length.unwrap_or(body.len() as u64);

    if body.is_empty() {
        return Ok(req);
    }

    if headers.is_multipart() {
        if !mode.allow_multipart {
            return Err(SwordError::bad_request(
                "Multipart deposits are not allowed on the media resource",
            ));
        }
        let content_type = headers.content_type.as_deref().unwrap_or_default();
        read_multipart(&mut req, content_type, body).await?;
    } else if mode.detect_entry && headers.is_entry() {
        req.atom = Some(body.to_vec());
    } else {
        req.content = Some(body.to_vec());
    }
    Ok(req)
}

/// Fill `atom` and `content` from a two-part `atom` + `payload` body
async fn read_multipart(
    req: &mut DepositRequest,
    content_type: &str,
    body: Bytes,
) -> Result<(), SwordError> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| SwordError::bad_request(format!("Invalid multipart Content-Type: {}", e)))?;
    let stream = futures_util::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let malformed = |e: multer::Error| SwordError::bad_request(format!("Malformed multipart body: {}", e));
    let mut parts = 0usize;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        parts += 1;
        let name = field.name().map(str::to_string);
        let base64_encoded = field
            .headers()
            .get("content-transfer-encoding")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("base64"));
        let packaging = field
            .headers()
            .get("packaging")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string());
        let filename = field.file_name().map(str::to_string);

        let data = field.bytes().await.map_err(malformed)?;
        let data = if base64_encoded {
            decode_base64_part(&data)?
        } else {
            data.to_vec()
        };

        match name.as_deref() {
            Some("atom") => req.atom = Some(data),
            Some("payload") => {
                req.content = Some(data);
                if let Some(filename) = filename.filter(|f| !f.is_empty()) {
                    req.filename = filename;
                }
                if let Some(packaging) = packaging.filter(|p| !p.is_empty()) {
                    req.packaging = packaging;
                }
            }
            other => {
                return Err(SwordError::bad_request(format!(
                    "Unexpected multipart part {:?}; expected 'atom' and 'payload'",
                    other.unwrap_or("<unnamed>")
                )))
            }
        }
    }

    if parts != 2 || req.atom.is_none() || req.content.is_none() {
        return Err(SwordError::bad_request(
            "Multipart deposit must contain exactly two parts: 'atom' and 'payload'",
        ));
    }
    debug!(filename = %req.filename, "Parsed multipart deposit");
    Ok(())
}

fn decode_base64_part(data: &[u8]) -> Result<Vec<u8>, SwordError> {
    let compact: Vec<u8> = data.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| SwordError::bad_request(format!("Invalid base64 in multipart part: {}", e)))
}

//! Integration tests for the HTTP surface
//!
//! Requests are driven straight through `HttpServer::handle`, no socket
//! involved.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{header, Request, Response, StatusCode};
use md5::{Digest, Md5};
use std::sync::Arc;
use sword_server::namespaces::packaging;
use sword_server::{Config, FileStore, HttpServer, ObjectStore, State, SwordServer};
use tempfile::TempDir;

const BASE: &str = "http://localhost:8080";

const ENTRY: &str = r#"<entry xmlns="http://www.w3.org/2005/Atom" xmlns:dcterms="http://purl.org/dc/terms/">
  <title>Multipart Thesis</title>
  <author><name>A. Author</name></author>
  <summary>About things</summary>
  <dcterms:publisher>Test Press</dcterms:publisher>
</entry>"#;

/// Helper to create a server over a temporary store with one collection `c1`
async fn setup(mutate: impl FnOnce(&mut Config)) -> (HttpServer, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage_dir = temp_dir.path().to_path_buf();
    mutate(&mut config);

    let store = FileStore::new(config.store_dir()).await.unwrap();
    store.create_collection("c1").await.unwrap();
    let engine = Arc::new(SwordServer::new(Arc::new(config), Arc::new(store)));
    (HttpServer::new(engine, "127.0.0.1:0".parse().unwrap()), temp_dir)
}

fn basic() -> String {
    format!("Basic {}", general_purpose::STANDARD.encode("sword:sword"))
}

fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Full::new(body.into())).unwrap()
}

fn authed(method: &str, uri: &str, headers: &[(&str, &str)], body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    let auth = basic();
    let mut all = vec![(header::AUTHORIZATION.as_str(), auth.as_str())];
    all.extend_from_slice(headers);
    request(method, uri, &all, body)
}

async fn body_string(response: Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn location(response: &Response<Full<Bytes>>) -> String {
    response.headers()[header::LOCATION].to_str().unwrap().to_string()
}

/// `http://localhost:8080/edit-uri/c1/x` -> `/edit-uri/c1/x`
fn path_of(uri: &str) -> String {
    uri.strip_prefix(BASE).unwrap().to_string()
}

/// Deposit a small binary file, returning the edit path
async fn deposit_binary(server: &HttpServer) -> String {
    let response = server
        .handle(authed(
            "POST",
            "/col-uri/c1",
            &[
                ("content-type", "text/plain"),
                ("content-disposition", "attachment; filename=hello.txt"),
                ("in-progress", "false"),
            ],
            "hello world",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    path_of(&location(&response))
}

fn multipart(atom: &str, payload: &[u8]) -> (String, Vec<u8>) {
    let boundary = "===============sword==";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/atom+xml\r\nContent-Disposition: attachment; name=\"atom\"\r\n\r\n{atom}\r\n\
             --{b}\r\nContent-Type: application/zip\r\nContent-Disposition: attachment; name=\"payload\"; filename=\"example.zip\"\r\n\r\n",
            b = boundary,
            atom = atom
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (
        format!("multipart/related; boundary=\"{}\"; type=\"application/atom+xml\"", boundary),
        body,
    )
}

#[tokio::test]
async fn test_binary_deposit_end_to_end() {
    let (server, _temp) = setup(|_| {}).await;

    let response = server
        .handle(authed(
            "POST",
            "/col-uri/c1",
            &[
                ("content-type", "text/plain"),
                ("content-disposition", "attachment; filename=hello.txt"),
                ("in-progress", "false"),
            ],
            "hello world",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let edit = path_of(&location(&response));
    assert!(edit.starts_with("/edit-uri/c1/"));

    let receipt = body_string(response).await;
    assert_eq!(receipt.matches("<sword:originalDeposit").count(), 1);

    // Pull the original deposit URI out of the embedded statement
    let start = receipt.find("/part-uri/").unwrap();
    let end = start + receipt[start..].find('"').unwrap();
    let deposit_path = &receipt[start..end];

    let response = server
        .handle(authed("GET", &edit, &[("accept", "application/rdf+xml")], Bytes::new()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/rdf+xml");
    let rdf = body_string(response).await;
    assert!(rdf.contains(deposit_path));
    assert!(rdf.contains(State::Archived.uri()));

    // The deposited file itself
    let response = server.handle(request("GET", deposit_path, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello world");
}

#[tokio::test]
async fn test_authentication_failures() {
    let (server, _temp) = setup(|_| {}).await;

    let response = server.handle(request("GET", "/sd-uri", &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic realm=\"SSS\"");

    let wrong = format!("Basic {}", general_purpose::STANDARD.encode("sword:nope"));
    let response = server
        .handle(request("GET", "/sd-uri", &[("authorization", wrong.as_str())], Bytes::new()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));

    let response = server
        .handle(authed("POST", "/col-uri/c1", &[("on-behalf-of", "stranger")], "data"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_string(response).await.contains("TargetOwnerUnknown"));
}

#[tokio::test]
async fn test_mediation_disabled() {
    let (server, _temp) = setup(|c| c.mediation = false).await;
    let response = server
        .handle(authed("POST", "/col-uri/c1", &[("on-behalf-of", "obo")], "data"))
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert!(body_string(response).await.contains("MediationNotAllowed"));

    // Deletes are refused the same way and leave the container alone
    let edit = deposit_binary(&server).await;
    let em = edit.replace("/edit-uri/", "/em-uri/");
    for target in [&edit, &em] {
        let response = server
            .handle(authed("DELETE", target, &[("on-behalf-of", "obo")], Bytes::new()))
            .await;
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert!(body_string(response).await.contains("MediationNotAllowed"));
    }

    let response = server.handle(authed("GET", &edit, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = server
        .handle(request("GET", &format!("{}.atom", em), &[], Bytes::new()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("hello.txt"));
}

#[tokio::test]
async fn test_slug_with_representation_suffix_stays_reachable() {
    let (server, _temp) = setup(|_| {}).await;

    let response = server
        .handle(authed(
            "POST",
            "/col-uri/c1",
            &[
                ("content-type", "text/plain"),
                ("content-disposition", "attachment; filename=hello.txt"),
                ("slug", "item.atom"),
            ],
            "hello world",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let edit = path_of(&location(&response));
    assert!(!edit.ends_with(".atom"));

    let em = edit.replace("/edit-uri/", "/em-uri/");
    let response = server.handle(request("GET", &em, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.starts_with("PK"));

    let response = server
        .handle(request("GET", &format!("{}.atom", em), &[], Bytes::new()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("hello.txt"));

    let cont = edit.replace("/edit-uri/", "/cont-uri/");
    let response = server.handle(request("GET", &cont, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_checksum_mismatch_creates_nothing() {
    let (server, _temp) = setup(|_| {}).await;

    let response = server
        .handle(authed(
            "POST",
            "/col-uri/c1",
            &[("content-md5", "00000000000000000000000000000000")],
            "data",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    assert!(body_string(response).await.contains("ErrorChecksumMismatch"));

    let response = server.handle(authed("GET", "/col-uri/c1", &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await.matches("rel=\"edit\"").count(), 0);

    // A correct checksum goes through
    let md5 = hex::encode(Md5::digest(b"data"));
    let response = server
        .handle(authed("POST", "/col-uri/c1", &[("content-md5", md5.as_str())], "data"))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_error_content_packaging() {
    let (server, _temp) = setup(|_| {}).await;
    let response = server
        .handle(authed("POST", "/col-uri/c1", &[("packaging", packaging::ERROR)], "data"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("ErrorContent"));
}

#[tokio::test]
async fn test_header_validation_and_size() {
    let (server, _temp) = setup(|c| c.max_upload_size = 8).await;

    let response = server
        .handle(authed("POST", "/col-uri/c1", &[("in-progress", "perhaps")], "data"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = server
        .handle(authed("POST", "/col-uri/c1", &[("content-length", "100")], vec![b'x'; 100]))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body_string(response).await.contains("MaxUploadSizeExceeded"));

    // No declared length: the buffered read is capped instead
    let response = server.handle(authed("POST", "/col-uri/c1", &[], vec![b'x'; 100])).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = server.handle(authed("POST", "/col-uri/c1", &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_disabled_operations_checked_before_auth() {
    let (server, _temp) = setup(|c| {
        c.allow_update = false;
        c.allow_delete = false;
    })
    .await;

    let response = server.handle(request("PUT", "/edit-uri/c1/x", &[], "data")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(body_string(response).await.contains("Update operations not currently permitted"));

    let response = server.handle(request("DELETE", "/edit-uri/c1/x", &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(body_string(response).await.contains("Delete operations not currently permitted"));
}

#[tokio::test]
async fn test_in_progress_then_complete() {
    let (server, _temp) = setup(|_| {}).await;

    let response = server
        .handle(authed("POST", "/col-uri/c1", &[("in-progress", "true")], "part one"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let edit = path_of(&location(&response));
    let state = edit.replace("/edit-uri/", "/state-uri/") + ".rdf";

    let rdf = body_string(server.handle(authed("GET", &state, &[], Bytes::new())).await).await;
    assert!(rdf.contains(State::InProgress.uri()));

    let response = server
        .handle(authed("POST", &edit, &[("in-progress", "false")], Bytes::new()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let rdf = body_string(server.handle(authed("GET", &state, &[], Bytes::new())).await).await;
    assert!(rdf.contains(State::Archived.uri()));
    assert_eq!(rdf.matches("<sword:originalDeposit").count(), 1);
}

#[tokio::test]
async fn test_multipart_deposit() {
    let (server, _temp) = setup(|_| {}).await;
    let (content_type, body) = multipart(ENTRY, b"not really a zip");

    let response = server
        .handle(authed("POST", "/col-uri/c1", &[("content-type", content_type.as_str())], body))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let receipt = body_string(response).await;
    assert!(receipt.contains("<title>Multipart Thesis</title>"));
    assert!(receipt.contains("<dcterms:publisher>Test Press</dcterms:publisher>"));
    assert!(receipt.contains("example.zip"));
}

#[tokio::test]
async fn test_multipart_refused_on_media_replace() {
    let (server, _temp) = setup(|_| {}).await;
    let edit = deposit_binary(&server).await;
    let em = edit.replace("/edit-uri/", "/em-uri/");
    let (content_type, body) = multipart(ENTRY, b"payload");

    let response = server
        .handle(authed("PUT", &em, &[("content-type", content_type.as_str())], body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_media_resource_operations() {
    let (server, _temp) = setup(|_| {}).await;
    let edit = deposit_binary(&server).await;
    let em = edit.replace("/edit-uri/", "/em-uri/");

    // Add a file: 201 with the part as Location
    let response = server
        .handle(authed(
            "POST",
            &em,
            &[("content-disposition", "attachment; filename=extra.txt")],
            "extra",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(location(&response).contains("/part-uri/"));

    // Replace: 204
    let response = server
        .handle(authed(
            "PUT",
            &em,
            &[("content-disposition", "attachment; filename=new.txt")],
            "new content",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Clear: 204, container still there
    let response = server.handle(authed("DELETE", &em, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = server.handle(authed("GET", &edit, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_media_replace_keeps_entry_metadata() {
    let (server, _temp) = setup(|_| {}).await;
    let response = server
        .handle(authed(
            "POST",
            "/col-uri/c1",
            &[("content-type", "application/atom+xml;type=entry")],
            ENTRY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let edit = path_of(&location(&response));
    let em = edit.replace("/edit-uri/", "/em-uri/");

    let response = server
        .handle(authed(
            "PUT",
            &em,
            &[
                ("content-type", "text/plain"),
                ("content-disposition", "attachment; filename=new.txt"),
            ],
            "new content",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = server.handle(authed("GET", &edit, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let receipt = body_string(response).await;
    assert!(receipt.contains("Multipart Thesis"));
    assert!(!receipt.contains("SWORD Deposit"));
}

#[tokio::test]
async fn test_media_resource_negotiation() {
    let (server, _temp) = setup(|_| {}).await;
    let edit = deposit_binary(&server).await;
    let em = edit.replace("/edit-uri/", "/em-uri/");
    let cont = edit.replace("/edit-uri/", "/cont-uri/");

    // Default package, unauthenticated
    let response = server.handle(request("GET", &cont, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert_eq!(response.headers()["packaging"], packaging::SIMPLE_ZIP);
    assert!(body_string(response).await.starts_with("PK"));

    let response = server.handle(request("GET", &em, &[("accept", "text/html")], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).contains("/html/c1/"));

    let response = server.handle(request("GET", &em, &[("accept", "image/png")], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

    let response = server
        .handle(request("GET", &format!("{}.atom", em), &[("accept", "image/png")], Bytes::new()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("/part-uri/"));
}

#[tokio::test]
async fn test_container_negotiation() {
    let (server, _temp) = setup(|_| {}).await;
    let edit = deposit_binary(&server).await;

    let response = server.handle(authed("GET", &edit, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/atom+xml;type=entry");

    let response = server
        .handle(authed("GET", &edit, &[("accept", "application/atom+xml;type=feed")], Bytes::new()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/atom+xml;type=feed");

    let response = server.handle(authed("GET", &edit, &[("accept", "image/png")], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_metadata_update_on_edit_uri() {
    let (server, _temp) = setup(|_| {}).await;
    let edit = deposit_binary(&server).await;

    let response = server
        .handle(authed(
            "PUT",
            &edit,
            &[("content-type", "application/atom+xml;type=entry")],
            ENTRY,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("<title>Multipart Thesis</title>"));

    // The cached receipt now carries the new metadata
    let receipt = body_string(server.handle(authed("GET", &edit, &[], Bytes::new())).await).await;
    assert!(receipt.contains("<title>Multipart Thesis</title>"));
}

#[tokio::test]
async fn test_no_receipt_when_disabled() {
    let (server, _temp) = setup(|c| c.return_deposit_receipt = false).await;
    let response = server.handle(authed("POST", "/col-uri/c1", &[], "data")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key(header::LOCATION));
    assert!(body_string(response).await.is_empty());
}

#[tokio::test]
async fn test_delete_container_and_not_found() {
    let (server, _temp) = setup(|_| {}).await;
    let edit = deposit_binary(&server).await;

    let response = server.handle(authed("DELETE", &edit, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = server.handle(authed("GET", &edit, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server.handle(authed("POST", "/col-uri/missing", &[], "data")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server.handle(request("GET", "/nothing-here", &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_aggregation_and_parts() {
    let (server, _temp) = setup(|_| {}).await;
    let edit = deposit_binary(&server).await;

    let agg = edit.replace("/edit-uri/", "/agg-uri/");
    let response = server.handle(request("GET", &agg, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(path_of(&location(&response)), edit);

    let part = edit.replace("/edit-uri/", "/part-uri/") + "/sword_receipt.xml";
    let response = server.handle(request("GET", &part, &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server.handle(request("PUT", &part, &[], "data")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_service_document_and_health() {
    let (server, _temp) = setup(|_| {}).await;

    let response = server.handle(authed("GET", "/sd-uri", &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let sd = body_string(response).await;
    assert!(sd.contains("http://localhost:8080/col-uri/c1"));
    assert!(sd.contains("<sword:service>"));

    let response = server.handle(authed("GET", "/sd-uri/sub", &[], Bytes::new())).await;
    assert!(!body_string(response).await.contains("<sword:service>"));

    let response = server.handle(request("GET", "/health", &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["collections"], 1);

    let response = server.handle(request("GET", "/", &[], Bytes::new())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("c1"));
}

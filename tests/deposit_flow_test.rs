//! Integration tests for container lifecycles through the engine

use std::io::Write;
use std::sync::Arc;
use sword_server::namespaces::{packaging, rel};
use sword_server::{
    Auth, ContainerId, Config, DeleteRequest, DepositRequest, DepositResponse, FileStore,
    ObjectStore, StatementFormat, SwordServer,
};
use tempfile::TempDir;

/// Helper to create an engine over a temporary store with one collection `c1`
async fn create_engine(mutate: impl FnOnce(&mut Config)) -> (Arc<SwordServer>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage_dir = temp_dir.path().to_path_buf();
    mutate(&mut config);

    let store = FileStore::new(config.store_dir()).await.unwrap();
    store.create_collection("c1").await.unwrap();
    (Arc::new(SwordServer::new(Arc::new(config), Arc::new(store))), temp_dir)
}

fn entry(title: &str, publisher: &str) -> Vec<u8> {
    format!(
        r#"<entry xmlns="http://www.w3.org/2005/Atom" xmlns:dcterms="http://purl.org/dc/terms/">
  <title>{}</title>
  <dcterms:publisher>{}</dcterms:publisher>
</entry>"#,
        title, publisher
    )
    .into_bytes()
}

fn zip_package(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn auth() -> Auth {
    Auth::new("sword", None)
}

fn oid_of(engine: &SwordServer, response: &DepositResponse) -> ContainerId {
    let location = response.location().unwrap();
    let path = engine.uris().relative_path(location).unwrap();
    sword_server::uri_manager::interpret_oid(path.strip_prefix("edit-uri/").unwrap()).unwrap()
}

#[tokio::test]
async fn test_simple_zip_deposit_derives_resources() {
    let (engine, _temp) = create_engine(|_| {}).await;
    let package = zip_package(&[("data/a.txt", b"alpha"), ("b.txt", b"beta")]);
    let req = DepositRequest::binary(package, "package.zip")
        .with_packaging(packaging::SIMPLE_ZIP)
        .with_auth(auth());

    let response = engine.deposit_new("c1", &req).await.unwrap().unwrap();
    assert!(response.is_created());
    let oid = oid_of(&engine, &response);

    // Response copy is augmented, the cached receipt is not
    let receipt = response.receipt().unwrap();
    assert_eq!(receipt.matches(&format!("rel=\"{}\"", rel::ORIGINAL_DEPOSIT)).count(), 1);
    assert_eq!(receipt.matches(&format!("rel=\"{}\"", rel::DERIVED_RESOURCE)).count(), 2);
    let cached = engine.store().read_receipt(&oid).await.unwrap().unwrap();
    assert!(!cached.contains(rel::DERIVED_RESOURCE));

    let statement = engine.store().load_statement(&oid).await.unwrap();
    assert_eq!(statement.original_deposits.len(), 1);
    assert_eq!(statement.original_deposits[0].packaging, packaging::SIMPLE_ZIP);
    assert_eq!(statement.aggregates.len(), 2);

    let mut content = engine.store().list_content(&oid).await.unwrap();
    content.sort();
    assert_eq!(content.len(), 3);
    assert!(content.contains(&"a.txt".to_string()));
    assert_eq!(engine.get_part(&oid, "b.txt").await.unwrap().unwrap(), b"beta");
}

#[tokio::test]
async fn test_metadata_merges_on_additional_deposit() {
    let (engine, _temp) = create_engine(|_| {}).await;
    let req = DepositRequest::entry(entry("First", "Press A")).with_auth(auth());
    let oid = oid_of(&engine, &engine.deposit_new("c1", &req).await.unwrap().unwrap());

    let req = DepositRequest::entry(entry("First", "Press B")).with_auth(auth());
    engine.deposit_existing(&oid, &req).await.unwrap().unwrap();

    let metadata = engine.store().load_metadata(&oid).await.unwrap();
    assert_eq!(metadata["title"], vec!["First".to_string()]);
    assert_eq!(metadata["publisher"], vec!["Press A".to_string(), "Press B".to_string()]);

    // A metadata update replaces rather than merges
    let req = DepositRequest::entry(entry("Second", "Press C")).with_auth(auth());
    engine.update_metadata(&oid, &req).await.unwrap().unwrap();
    let metadata = engine.store().load_metadata(&oid).await.unwrap();
    assert_eq!(metadata["publisher"], vec!["Press C".to_string()]);
}

#[tokio::test]
async fn test_media_operations_keep_container_metadata() {
    let (engine, _temp) = create_engine(|_| {}).await;
    let req = DepositRequest::multipart(entry("Kept", "Press"), b"v1".to_vec(), "v1.txt").with_auth(auth());
    let oid = oid_of(&engine, &engine.deposit_new("c1", &req).await.unwrap().unwrap());

    // Binary replace with default headers leaves the metadata alone
    let req = DepositRequest::binary(b"v2".to_vec(), "v2.txt").with_auth(auth());
    engine.replace(&oid, &req).await.unwrap().unwrap();

    let metadata = engine.store().load_metadata(&oid).await.unwrap();
    assert_eq!(metadata["title"], vec!["Kept".to_string()]);
    let content = engine.store().list_content(&oid).await.unwrap();
    assert_eq!(content.len(), 1);
    assert!(content[0].ends_with("v2.txt"));
    let receipt = engine.store().read_receipt(&oid).await.unwrap().unwrap();
    assert!(receipt.contains("<title>Kept</title>"));

    // So does clearing the media resource
    let delete = DeleteRequest {
        auth: auth(),
        ..DeleteRequest::default()
    };
    engine.delete_content(&oid, &delete).await.unwrap().unwrap();
    assert!(engine.store().list_content(&oid).await.unwrap().is_empty());
    assert_eq!(engine.store().load_metadata(&oid).await.unwrap()["title"], vec!["Kept".to_string()]);

    // A replace carrying a new entry swaps the metadata
    let req = DepositRequest::multipart(entry("Fresh", "Other"), b"v3".to_vec(), "v3.txt").with_auth(auth());
    engine.replace(&oid, &req).await.unwrap().unwrap();
    let metadata = engine.store().load_metadata(&oid).await.unwrap();
    assert_eq!(metadata["title"], vec!["Fresh".to_string()]);
    assert_eq!(metadata["publisher"], vec!["Other".to_string()]);
}

#[tokio::test]
async fn test_statement_records_on_behalf_of() {
    let (engine, _temp) = create_engine(|_| {}).await;
    let req = DepositRequest::binary(b"data".to_vec(), "data.bin").with_auth(Auth::new("sword", Some("obo".to_string())));
    let oid = oid_of(&engine, &engine.deposit_new("c1", &req).await.unwrap().unwrap());

    let rdf = engine.get_statement(&oid, StatementFormat::Rdf).await.unwrap().unwrap();
    assert!(rdf.body.contains("<sword:depositedOnBehalfOf"));
    assert!(rdf.body.contains(">obo<"));

    let atom = engine.get_statement(&oid, StatementFormat::Atom).await.unwrap().unwrap();
    assert_eq!(atom.content_type, "application/atom+xml;type=feed");
}

#[tokio::test]
async fn test_slug_is_honoured_once() {
    let (engine, _temp) = create_engine(|_| {}).await;
    let mut req = DepositRequest::binary(b"data".to_vec(), "data.bin").with_auth(auth());
    req.slug = Some("my-thesis".to_string());

    let first = oid_of(&engine, &engine.deposit_new("c1", &req).await.unwrap().unwrap());
    assert_eq!(first.id, "my-thesis");

    let second = oid_of(&engine, &engine.deposit_new("c1", &req).await.unwrap().unwrap());
    assert_ne!(second.id, "my-thesis");
}

#[tokio::test]
async fn test_delete_content_then_container() {
    let (engine, _temp) = create_engine(|_| {}).await;
    let req = DepositRequest::binary(b"data".to_vec(), "data.bin").with_auth(auth());
    let oid = oid_of(&engine, &engine.deposit_new("c1", &req).await.unwrap().unwrap());

    let delete = DeleteRequest {
        auth: auth(),
        ..DeleteRequest::default()
    };
    engine.delete_content(&oid, &delete).await.unwrap().unwrap();
    assert!(engine.exists(&oid).await.unwrap());
    assert!(engine.store().read_receipt(&oid).await.unwrap().is_some());

    engine.delete_container(&oid, &delete).await.unwrap().unwrap();
    assert!(!engine.exists(&oid).await.unwrap());
    assert!(engine.deposit_existing(&oid, &req).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_deposits_keep_full_history() {
    let (engine, _temp) = create_engine(|_| {}).await;
    let req = DepositRequest::binary(b"seed".to_vec(), "seed.bin").with_auth(auth());
    let oid = oid_of(&engine, &engine.deposit_new("c1", &req).await.unwrap().unwrap());

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        let oid = oid.clone();
        handles.push(tokio::spawn(async move {
            let req = DepositRequest::binary(format!("file {}", i).into_bytes(), format!("f{}.txt", i))
                .with_auth(auth());
            engine.deposit_existing(&oid, &req).await.unwrap().unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_created());
    }

    let statement = engine.store().load_statement(&oid).await.unwrap();
    assert_eq!(statement.original_deposits.len(), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_with_one_slug_get_distinct_containers() {
    let (engine, _temp) = create_engine(|_| {}).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let mut req = DepositRequest::binary(format!("file {}", i).into_bytes(), format!("f{}.txt", i))
                .with_auth(auth());
            req.slug = Some("shared".to_string());
            engine.deposit_new("c1", &req).await.unwrap().unwrap()
        }));
    }

    let mut locations = std::collections::HashSet::new();
    for handle in handles {
        let response = handle.await.unwrap();
        assert!(locations.insert(response.location().unwrap().to_string()));
    }
    assert_eq!(locations.len(), 8);

    // Every container holds exactly its own deposit
    for location in &locations {
        let path = engine.uris().relative_path(location).unwrap();
        let oid = sword_server::uri_manager::interpret_oid(path.strip_prefix("edit-uri/").unwrap()).unwrap();
        let statement = engine.store().load_statement(&oid).await.unwrap();
        assert_eq!(statement.original_deposits.len(), 1);
        assert_eq!(engine.store().list_content(&oid).await.unwrap().len(), 1);
    }
}

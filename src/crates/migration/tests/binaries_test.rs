//! Binary transfer between in-memory controllers

mod common;

use common::*;
use model_migration::backend::memory::{Controller, LoopbackConnection, State};
use model_migration::{
    export_description, get_charm_storage_path, import_description, upload_binaries,
    MigrationError, MigrationSettings, UploadBinariesConfig,
};

/// Source model plus a target that already holds its imported copy
async fn imported_pair() -> (State, model_description::Model, Controller, LoopbackConnection) {
    let (_source, state) = populated_source().await;
    let model = export_description(&state).await.unwrap();
    let target = Controller::with_uuid("target-controller");
    import_description(&target, &model).await.unwrap();
    let connection = LoopbackConnection::new(target.clone()).await;
    (state, model, target, connection)
}

#[tokio::test]
async fn test_upload_copies_every_binary() {
    init_tracing();
    let (state, model, target, connection) = imported_pair().await;

    let config = UploadBinariesConfig::new(&state, &model, &connection);
    let summary = upload_binaries(&config).await.unwrap();

    assert_eq!(
        summary.tools,
        vec![
            binary("2.0.1-trusty-amd64"),
            binary("2.0.3-trusty-amd64"),
            binary("2.0.5-trusty-amd64"),
        ]
    );
    assert_eq!(summary.charms.len(), 2);

    let expected_bytes: usize = ["2.0.1-trusty-amd64", "2.0.3-trusty-amd64", "2.0.5-trusty-amd64"]
        .iter()
        .map(|v| tools_content(v).len())
        .chain(
            ["local:trusty/magic", "cs:trusty/postgresql-42"]
                .iter()
                .map(|u| charm_content(u).len()),
        )
        .sum();
    assert_eq!(summary.bytes, expected_bytes as u64);

    let copy = target.state_for(MODEL_UUID).await.unwrap();
    assert_eq!(
        copy.charm_content(&charm("local:trusty/magic")).await.unwrap(),
        Some(charm_content("local:trusty/magic"))
    );
}

#[tokio::test]
async fn test_upload_again_replaces_rather_than_duplicates() {
    let (state, model, target, connection) = imported_pair().await;
    let config = UploadBinariesConfig::new(&state, &model, &connection)
        .with_settings(&MigrationSettings::default().with_upload_concurrency(3));

    upload_binaries(&config).await.unwrap();
    upload_binaries(&config).await.unwrap();

    assert_eq!(target.blob_count().await, 2);
}

#[tokio::test]
async fn test_tampered_tools_are_not_stored() {
    let (state, model, target, connection) = imported_pair().await;
    state
        .add_tools(binary("2.0.5-trusty-amd64"), b"tampered".to_vec())
        .await
        .unwrap();

    let config = UploadBinariesConfig::new(&state, &model, &connection);
    let err = upload_binaries(&config).await.unwrap_err();
    assert!(
        matches!(&err, MigrationError::ToolsUpload { version, .. } if version.to_string() == "2.0.5-trusty-amd64"),
        "{}",
        err
    );

    let copy = target.state_for(MODEL_UUID).await.unwrap();
    assert_eq!(
        copy.tools_content(&binary("2.0.5-trusty-amd64"))
            .await
            .unwrap(),
        None
    );
    assert_eq!(target.blob_count().await, 0);

    let config = config.with_verify_checksums(false);
    upload_binaries(&config).await.unwrap();
    assert_eq!(
        copy.tools_content(&binary("2.0.5-trusty-amd64"))
            .await
            .unwrap(),
        Some(b"tampered".to_vec())
    );
}

#[tokio::test]
async fn test_upload_into_missing_target_model_fails() {
    let (_source, state) = populated_source().await;
    let model = export_description(&state).await.unwrap();
    let connection = LoopbackConnection::new(Controller::new()).await;

    let err = upload_binaries(&UploadBinariesConfig::new(&state, &model, &connection))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"), "{}", err);
}

#[tokio::test]
async fn test_charm_storage_path_points_at_stored_archive() {
    let (_source, state) = populated_source().await;

    let path = get_charm_storage_path(&state, &charm("local:trusty/magic"))
        .await
        .unwrap();
    assert!(path.starts_with("charms/local:trusty/magic-"), "{}", path);

    let err = get_charm_storage_path(&state, &charm("cs:trusty/missing-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::CharmRead { .. }));
}

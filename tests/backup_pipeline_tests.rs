//! End-to-end pipeline tests that run without a database.
//!
//! These exercise the seal/open artifact path and the storage gateway with
//! filesystem-backed providers rooted in temp directories.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use ledgerbook_backend::services::crypto::{self, BackupCrypto};
use ledgerbook_backend::services::platform_backup::seal_artifact;
use ledgerbook_backend::services::restore::open_artifact;
use ledgerbook_backend::services::storage_gateway::{
    FilesystemStore, ObjectMetadata, Provider, StorageGateway,
};

fn test_gateway() -> (StorageGateway, TempDir, TempDir) {
    let primary_dir = TempDir::new().unwrap();
    let secondary_dir = TempDir::new().unwrap();
    let gateway = StorageGateway::new(
        Arc::new(FilesystemStore::new(primary_dir.path().to_path_buf())),
        Arc::new(FilesystemStore::new(secondary_dir.path().to_path_buf())),
    );
    (gateway, primary_dir, secondary_dir)
}

fn test_metadata(tenant_id: Uuid, checksum: &str) -> ObjectMetadata {
    ObjectMetadata {
        tenant_id: Some(tenant_id),
        backup_kind: "tenant".to_string(),
        checksum: checksum.to_string(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn seal_upload_download_open_roundtrip() {
    let work = TempDir::new().unwrap();
    let (gateway, _p, _s) = test_gateway();
    let tenant_id = Uuid::new_v4();

    let script = b"BEGIN;\nINSERT INTO \"customers\" (\"id\", \"name\") VALUES (1, 'Acme');\nCOMMIT;\n";
    let dump = work.path().join("tenant.sql");
    tokio::fs::write(&dump, script).await.unwrap();

    let backup_crypto = BackupCrypto::new("integration-secret");
    let key = backup_crypto.derive_tenant_key(tenant_id);
    let sealed = seal_artifact(&dump, &key, work.path()).await.unwrap();

    let object_key = format!("tenant-backups/{}/nightly.sql.gz.enc", tenant_id);
    let metadata = test_metadata(tenant_id, &sealed.checksum);

    // Upload to both providers, then pull back from each independently.
    for provider in Provider::ALL {
        let location = gateway
            .upload(provider, &sealed.path, &object_key, &metadata)
            .await
            .unwrap();
        assert_eq!(location, object_key);
    }

    for provider in Provider::ALL {
        let fetched = work.path().join(format!("fetched-{}.bin", provider));
        gateway.download(provider, &object_key, &fetched).await.unwrap();
        assert_eq!(crypto::checksum_file(&fetched).unwrap(), sealed.checksum);

        let restored = work.path().join(format!("restored-{}.sql", provider));
        open_artifact(&fetched, &key, &restored).await.unwrap();
        assert_eq!(tokio::fs::read(&restored).await.unwrap(), script);
    }
}

#[tokio::test]
async fn tampered_artifact_fails_to_open() {
    let work = TempDir::new().unwrap();
    let tenant_id = Uuid::new_v4();

    let dump = work.path().join("tenant.sql");
    tokio::fs::write(&dump, b"INSERT INTO t VALUES (1);").await.unwrap();

    let backup_crypto = BackupCrypto::new("integration-secret");
    let key = backup_crypto.derive_tenant_key(tenant_id);
    let sealed = seal_artifact(&dump, &key, work.path()).await.unwrap();

    let mut bytes = tokio::fs::read(&sealed.path).await.unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    let tampered = work.path().join("tampered.bin");
    tokio::fs::write(&tampered, &bytes).await.unwrap();

    let out = work.path().join("out.sql");
    assert!(open_artifact(&tampered, &key, &out).await.is_err());
    // Checksum catches the tamper before decryption would
    assert_ne!(crypto::checksum(&bytes), sealed.checksum);
}

use anyhow::Result;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use securevault::{
    container,
    file_ops::VaultFileOps,
    kdf::{Kdf, KdfParams},
    ledger::{FileRecord, Operation},
    pepper::Pepper,
    registry::{UserIdentity, UserRegistry},
    VaultEngine, VaultError,
};

fn fast_params() -> KdfParams {
    KdfParams::new(64, 1, 1)
}

/// Helper to create a test environment with a registry, an engine and two users
async fn setup_test_env() -> Result<(TempDir, VaultFileOps, UserIdentity, UserIdentity)> {
    let tmp = TempDir::new()?;
    let registry = UserRegistry::open(tmp.path().join("users.json"), fast_params()).await?;
    registry.register("alice", "alice-pw").await?;
    registry.register("bob", "bob-pw").await?;
    let alice = registry.authenticate("alice", "alice-pw").await?;
    let bob = registry.authenticate("bob", "bob-pw").await?;

    let engine = VaultEngine::new(Kdf::new(fast_params()));
    let ops = VaultFileOps::new(engine, Arc::new(registry), tmp.path().join("user_data"));

    Ok((tmp, ops, alice, bob))
}

#[tokio::test]
async fn upload_roundtrip_writes_files_and_ledger() -> Result<()> {
    let (tmp, ops, alice, _bob) = setup_test_env().await?;

    let enc_path = ops
        .encrypt_upload(&alice, "notes.txt", Some(b"hello vault".to_vec()))
        .await?;
    assert_eq!(enc_path, tmp.path().join("user_data").join("alice").join("notes.txt.enc"));

    let container = fs::read(&enc_path)?;
    assert_eq!(container.len(), 1 + 16 + 24 + 11 + 16);

    let dec_path = ops
        .decrypt_upload(&alice, "notes.txt.enc", Some(container))
        .await?;
    assert_eq!(dec_path, tmp.path().join("user_data").join("alice").join("notes.txt"));
    assert_eq!(fs::read(&dec_path)?, b"hello vault");

    assert_eq!(
        ops.list_files(&alice).await,
        vec![
            FileRecord::new("notes.txt", Operation::Encrypted),
            FileRecord::new("notes.txt", Operation::Decrypted),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn wrong_user_decrypt_is_rejected_and_not_recorded() -> Result<()> {
    let (tmp, ops, alice, bob) = setup_test_env().await?;

    let enc_path = ops
        .encrypt_upload(&alice, "secret.bin", Some(vec![7u8; 4096]))
        .await?;
    let container = fs::read(&enc_path)?;

    let err = ops
        .decrypt_upload(&bob, "secret.bin.enc", Some(container))
        .await
        .unwrap_err();
    let vault_err = err.downcast_ref::<VaultError>().expect("vault error");
    assert!(matches!(vault_err, VaultError::Authentication));

    assert!(ops.list_files(&bob).await.is_empty());
    assert!(!tmp.path().join("user_data").join("bob").join("secret.bin").exists());
    Ok(())
}

#[tokio::test]
async fn missing_upload_is_invalid_but_empty_upload_roundtrips() -> Result<()> {
    let (_tmp, ops, alice, _bob) = setup_test_env().await?;

    let err = ops.encrypt_upload(&alice, "none.txt", None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::InvalidInput(_))
    ));

    let enc_path = ops.encrypt_upload(&alice, "empty.txt", Some(Vec::new())).await?;
    let container = fs::read(&enc_path)?;
    let dec_path = ops
        .decrypt_upload(&alice, "empty.txt.enc", Some(container))
        .await?;
    assert!(fs::read(dec_path)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn garbage_upload_is_malformed() -> Result<()> {
    let (_tmp, ops, alice, _bob) = setup_test_env().await?;

    let err = ops
        .decrypt_upload(&alice, "junk.enc", Some(b"not a container".to_vec()))
        .await
        .unwrap_err();
    let vault_err = err.downcast_ref::<VaultError>().expect("vault error");
    assert!(matches!(vault_err, VaultError::MalformedContainer(_)));
    assert_eq!(vault_err.user_message(), "cannot process file");
    Ok(())
}

#[tokio::test]
async fn client_paths_cannot_escape_data_dir() -> Result<()> {
    let (tmp, ops, alice, _bob) = setup_test_env().await?;

    let path = ops
        .encrypt_upload(&alice, "../../escape.txt", Some(b"x".to_vec()))
        .await?;
    assert_eq!(path, tmp.path().join("user_data").join("alice").join("escape.txt.enc"));
    Ok(())
}

#[tokio::test]
async fn outputs_of_different_users_never_collide() -> Result<()> {
    let (tmp, ops, _alice, _bob) = setup_test_env().await?;
    let registry = ops.registry();
    registry.register("a", "a-pw").await?;
    registry.register("a_b", "ab-pw").await?;
    let a = registry.authenticate("a", "a-pw").await?;
    let a_b = registry.authenticate("a_b", "ab-pw").await?;

    // "a" + "b_c" and "a_b" + "c" both flattened to "a_b_c" under a shared prefix.
    let first = ops.encrypt_upload(&a, "b_c", Some(b"from a".to_vec())).await?;
    let second = ops.encrypt_upload(&a_b, "c", Some(b"from a_b".to_vec())).await?;
    assert_ne!(first, second);

    let data_dir = tmp.path().join("user_data");
    assert_eq!(first, data_dir.join("a").join("b_c.enc"));
    assert_eq!(second, data_dir.join("a_b").join("c.enc"));

    let plain_a = ops.decrypt_upload(&a, "b_c.enc", Some(fs::read(&first)?)).await?;
    let plain_ab = ops.decrypt_upload(&a_b, "c.enc", Some(fs::read(&second)?)).await?;
    assert_eq!(fs::read(plain_a)?, b"from a");
    assert_eq!(fs::read(plain_ab)?, b"from a_b");
    Ok(())
}

#[tokio::test]
async fn path_like_username_cannot_register() -> Result<()> {
    let (tmp, ops, _alice, _bob) = setup_test_env().await?;

    assert!(ops.registry().register("../escaped", "pw").await.is_err());
    assert!(ops.registry().authenticate("../escaped", "pw").await.is_err());
    assert!(!tmp.path().join("escaped").exists());
    Ok(())
}

#[tokio::test]
async fn output_removed_when_ledger_cannot_be_saved() -> Result<()> {
    let (tmp, ops, alice, _bob) = setup_test_env().await?;

    // A directory where the registry file should be makes every save fail.
    let registry_path = tmp.path().join("users.json");
    fs::remove_file(&registry_path)?;
    fs::create_dir(&registry_path)?;

    assert!(ops
        .encrypt_upload(&alice, "x.txt", Some(b"unrecorded".to_vec()))
        .await
        .is_err());
    assert!(!tmp.path().join("user_data").join("alice").join("x.txt.enc").exists());
    assert!(ops.list_files(&alice).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_operations() -> Result<()> {
    let (_tmp, ops, alice, bob) = setup_test_env().await?;
    let ops = Arc::new(ops);

    let mut handles = Vec::new();
    for i in 0..6 {
        let ops = Arc::clone(&ops);
        let identity = if i % 2 == 0 { alice.clone() } else { bob.clone() };
        handles.push(tokio::spawn(async move {
            let name = format!("concurrent_{}.txt", i);
            let data = format!("content for file {}", i).into_bytes();
            let enc = ops.encrypt_upload(&identity, &name, Some(data.clone())).await?;
            let container = tokio::fs::read(enc).await?;
            let dec = ops
                .decrypt_upload(&identity, &format!("{}.enc", name), Some(container))
                .await?;
            assert_eq!(tokio::fs::read(dec).await?, data);
            Ok::<(), anyhow::Error>(())
        }));
    }

    for handle in handles {
        handle.await??;
    }

    assert_eq!(ops.list_files(&alice).await.len(), 6);
    assert_eq!(ops.list_files(&bob).await.len(), 6);
    Ok(())
}

#[tokio::test]
async fn peppered_engine_roundtrip_and_compression() -> Result<()> {
    let tmp = TempDir::new()?;
    let pepper = Pepper::load_or_create(tmp.path().join("vault.pepper")).await?;

    let engine = VaultEngine::new(Kdf::new(fast_params()).with_pepper(pepper.as_bytes()))
        .with_compression(true);
    let plaintext = b"compressible ".repeat(1000);

    let sealed = engine.encrypt_file("alice", &plaintext)?;
    assert_eq!(sealed[0], container::VERSION_V2_COMPRESSED);
    assert_eq!(engine.decrypt_file("alice", &sealed)?, plaintext);

    // Same identity, no pepper: a different key.
    let unpeppered = VaultEngine::new(Kdf::new(fast_params()));
    assert!(matches!(
        unpeppered.decrypt_file("alice", &sealed),
        Err(VaultError::Authentication)
    ));
    Ok(())
}

//! End-to-end vault scenarios over the memory ledger and network.

use std::sync::Arc;
use std::time::Duration;

use capseal::core::{Clock, ManualClock};
use capseal::gateway::{GatewayConfig, RetryPolicy};
use capseal::registry::{LedgerCall, Registry, RegistryExt, SqliteRegistryStore};
use capseal::{
    CapabilityId, ContentPointer, ErrorKind, Revealed, SecretState, Vault, VaultError,
};
use capseal_testkit::{DecliningSigner, FixtureBuilder, TestFixture, WatchOnlySigner};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn secret(bytes: &[u8]) -> Revealed {
    Revealed::Secret(bytes.to_vec().into())
}

#[tokio::test]
async fn test_alice_bob_carol() -> anyhow::Result<()> {
    init_tracing();
    let f = TestFixture::new().await?;
    let vault = &f.vault;

    let sealed = vault.seal(&f.alice, b"hello").await?;
    let id = sealed.capability_id;
    assert_eq!(f.ledger.owner_of(id).await?, f.alice.identity());
    assert_eq!(f.ledger.creator_of(id).await?, f.alice.identity());

    assert_eq!(vault.reveal(&f.alice, id).await?, secret(b"hello"));

    let err = vault.reveal(&f.bob, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    vault.transfer(&f.alice, id, f.carol.identity()).await?;
    assert_eq!(f.ledger.owner_of(id).await?, f.carol.identity());
    assert_eq!(f.ledger.creator_of(id).await?, f.alice.identity());

    assert_eq!(vault.reveal(&f.carol, id).await?, secret(b"hello"));
    assert_eq!(vault.reveal(&f.alice, id).await?, secret(b"hello"));

    let err = vault.reveal(&f.bob, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    Ok(())
}

#[tokio::test]
async fn test_resale_revokes_previous_owner() -> anyhow::Result<()> {
    init_tracing();
    let f = TestFixture::new().await?;
    let vault = &f.vault;

    let id = vault.seal(&f.alice, b"hello").await?.capability_id;
    vault.transfer(&f.alice, id, f.carol.identity()).await?;
    assert_eq!(vault.reveal(&f.carol, id).await?, secret(b"hello"));

    vault.transfer(&f.carol, id, f.bob.identity()).await?;
    assert_eq!(f.ledger.owner_of(id).await?, f.bob.identity());

    let err = vault.reveal(&f.carol, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert!(!f.ledger.evaluate(id, &f.carol.identity()).await?);

    assert_eq!(vault.reveal(&f.bob, id).await?, secret(b"hello"));
    assert_eq!(vault.reveal(&f.alice, id).await?, secret(b"hello"));
    Ok(())
}

#[tokio::test]
async fn test_denial_message_differs_from_failures() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"x").await.unwrap().capability_id;

    let err = f.vault.reveal(&f.bob, id).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.user_message().starts_with("Access denied"));
}

#[tokio::test]
async fn test_reveal_is_idempotent() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"same").await.unwrap().capability_id;

    let first = f.vault.reveal(&f.alice, id).await.unwrap();
    let second = f.vault.reveal(&f.alice, id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unknown_capability() {
    let f = TestFixture::new().await.unwrap();

    let err = f.vault.reveal(&f.alice, CapabilityId::new(42)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = f.vault.status(CapabilityId::new(42)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_created_but_unsealed_reveals_pending() {
    let f = TestFixture::new().await.unwrap();
    let id = f.ledger.create(&f.alice.identity(), WAIT).await.unwrap();

    assert_eq!(f.vault.status(id).await.unwrap(), SecretState::Created(id));
    assert_eq!(f.vault.reveal(&f.bob, id).await.unwrap(), Revealed::Pending);

    f.vault.seal_existing(&f.alice, id, b"late").await.unwrap();
    assert_eq!(f.vault.status(id).await.unwrap(), SecretState::Sealed(id));
    assert_eq!(f.vault.reveal(&f.alice, id).await.unwrap(), secret(b"late"));
}

#[tokio::test]
async fn test_network_failure_after_create_is_unsealed() {
    init_tracing();
    let f = TestFixture::new().await.unwrap();
    f.network.set_offline(true);

    let err = f.vault.seal(&f.alice, b"retry me").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsealed);
    assert!(err.is_retryable());
    let id = err.unsealed_capability().unwrap();
    match &err {
        VaultError::Unsealed { source, .. } => {
            assert_eq!(source.kind(), ErrorKind::NetworkUnavailable)
        }
        other => panic!("unexpected error: {other}"),
    }

    // The ID is allocated and visible, just not sealed.
    assert_eq!(f.vault.status(id).await.unwrap(), SecretState::Created(id));

    f.network.set_offline(false);
    f.vault.seal_existing(&f.alice, id, b"retry me").await.unwrap();
    assert_eq!(f.vault.reveal(&f.alice, id).await.unwrap(), secret(b"retry me"));
}

#[tokio::test]
async fn test_seal_existing_twice_is_rejected() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"once").await.unwrap().capability_id;

    let err = f.vault.seal_existing(&f.alice, id, b"twice").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_seal_existing_by_non_owner() {
    let f = TestFixture::new().await.unwrap();
    let id = f.ledger.create(&f.alice.identity(), WAIT).await.unwrap();

    let err = f.vault.seal_existing(&f.bob, id, b"mine now").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(f.vault.status(id).await.unwrap(), SecretState::Created(id));
}

#[tokio::test]
async fn test_unconfirmed_create() {
    let f = FixtureBuilder::default()
        .auto_mine(false)
        .confirmation_timeout(Duration::from_millis(50))
        .build()
        .await
        .unwrap();

    let err = f.vault.seal(&f.alice, b"stuck").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unconfirmed);
    assert!(err.unsealed_capability().is_none());
    assert_eq!(f.ledger.pending_count().await, 1);

    // Mining later finalizes the create; the ID is leaked, not reused.
    f.ledger.mine().await.unwrap();
    assert_eq!(
        f.vault.status(CapabilityId::FIRST).await.unwrap(),
        SecretState::Created(CapabilityId::FIRST)
    );
}

#[tokio::test]
async fn test_non_allowlisted_creator() {
    let f = TestFixture::new().await.unwrap();

    let err = f.vault.seal(&f.bob, b"nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(err.unsealed_capability().is_none());
}

#[tokio::test]
async fn test_open_creation() {
    let f = FixtureBuilder::default().open_creation().build().await.unwrap();

    let id = f.vault.seal(&f.bob, b"bob's").await.unwrap().capability_id;
    assert_eq!(f.vault.reveal(&f.bob, id).await.unwrap(), secret(b"bob's"));
    assert_eq!(
        f.vault.reveal(&f.alice, id).await.unwrap_err().kind(),
        ErrorKind::AccessDenied
    );
}

#[tokio::test]
async fn test_transfer_by_non_owner() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"x").await.unwrap().capability_id;

    let err = f
        .vault
        .transfer(&f.bob, id, f.bob.identity())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_tampered_ciphertext() {
    init_tracing();
    let f = TestFixture::new().await.unwrap();
    let id = f.ledger.create(&f.alice.identity(), WAIT).await.unwrap();

    let mut bundle = f
        .vault
        .gateway()
        .encrypt_under_predicate(b"original", &f.vault.conditions().build(id))
        .await
        .unwrap();
    bundle.ciphertext[0] ^= 0x80;
    let pointer = ContentPointer::encode(id, &bundle).unwrap();
    f.ledger
        .execute(
            &f.alice.identity(),
            LedgerCall::SetContentPointer { id, pointer },
            WAIT,
        )
        .await
        .unwrap();

    let err = f.vault.reveal(&f.alice, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BundleCorrupt);
}

#[tokio::test]
async fn test_bundle_copied_from_another_capability() {
    let f = TestFixture::new().await.unwrap();
    let original = f.vault.seal(&f.alice, b"alice's").await.unwrap();
    let copy = f.ledger.create(&f.alice.identity(), WAIT).await.unwrap();

    let pointer = ContentPointer::encode(copy, &original.bundle).unwrap();
    f.ledger
        .execute(
            &f.alice.identity(),
            LedgerCall::SetContentPointer { id: copy, pointer },
            WAIT,
        )
        .await
        .unwrap();

    let err = f.vault.reveal(&f.alice, copy).await.unwrap_err();
    assert!(matches!(err, VaultError::PredicateMismatch { id } if id == copy));
    assert_eq!(err.kind(), ErrorKind::BundleCorrupt);
}

#[tokio::test]
async fn test_foreign_pointer_format() {
    let f = TestFixture::new().await.unwrap();
    let id = f.ledger.create(&f.alice.identity(), WAIT).await.unwrap();
    f.ledger
        .execute(
            &f.alice.identity(),
            LedgerCall::SetContentPointer {
                id,
                pointer: "ipfs://QmSomething".into(),
            },
            WAIT,
        )
        .await
        .unwrap();

    let err = f.vault.reveal(&f.alice, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BundleCorrupt);
}

#[tokio::test]
async fn test_stale_signer_clock_is_challenge_invalid() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"x").await.unwrap().capability_id;

    // Challenges from this vault are two hours old by the network's clock.
    let stale = Arc::new(ManualClock::new(
        f.clock.now_millis() - 2 * 60 * 60 * 1000,
    ));
    let vault = Vault::with_clock(
        f.ledger.clone(),
        f.network.clone(),
        f.vault.config().clone(),
        stale,
    );

    let err = vault.reveal(&f.alice, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChallengeInvalid);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_signer_declines() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"x").await.unwrap().capability_id;

    let declining = DecliningSigner(f.alice.identity());
    let err = f.vault.reveal(&declining, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SigningDeclined);
}

#[tokio::test]
async fn test_signer_without_identity() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"x").await.unwrap().capability_id;

    let err = f.vault.seal(&WatchOnlySigner, b"x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSigningCapability);

    let err = f.vault.reveal(&WatchOnlySigner, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSigningCapability);
}

#[tokio::test]
async fn test_network_down_during_reveal() {
    let f = FixtureBuilder::default()
        .gateway(GatewayConfig {
            request_timeout: Duration::from_secs(1),
            retry: RetryPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
            },
        })
        .build()
        .await
        .unwrap();
    let id = f.vault.seal(&f.alice, b"x").await.unwrap().capability_id;

    f.network.set_offline(true);
    let err = f.vault.reveal(&f.alice, id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkUnavailable);
    assert!(err.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reveals() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"shared").await.unwrap().capability_id;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let vault = f.vault.clone();
            let alice = f.alice.clone();
            tokio::spawn(async move { vault.reveal(&alice, id).await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), secret(b"shared"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_seals_get_distinct_ids() {
    let f = TestFixture::new().await.unwrap();

    let tasks: Vec<_> = (0..6u8)
        .map(|i| {
            let vault = f.vault.clone();
            let alice = f.alice.clone();
            tokio::spawn(async move { vault.seal(&alice, &[i]).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().capability_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
}

#[tokio::test]
async fn test_predicate_agrees_with_registry() {
    let f = TestFixture::new().await.unwrap();
    let id = f.vault.seal(&f.alice, b"x").await.unwrap().capability_id;
    f.vault.transfer(&f.alice, id, f.carol.identity()).await.unwrap();

    let predicate = f.vault.conditions().build(id);
    for party in [&f.alice, &f.bob, &f.carol] {
        let caller = party.identity();
        let call = predicate.resolve(&caller).unwrap();
        let via_predicate =
            predicate.accepts(f.ledger.evaluate(call.capability_id, &call.identity).await.unwrap());
        let direct = f.ledger.evaluate(id, &caller).await.unwrap();
        assert_eq!(via_predicate, direct);
    }
}

#[tokio::test]
async fn test_sqlite_backed_vault() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.db");

    let id = {
        let f = FixtureBuilder::default()
            .build_with_store(SqliteRegistryStore::open(&path).unwrap())
            .await
            .unwrap();
        let id = f.vault.seal(&f.alice, b"durable").await.unwrap().capability_id;
        assert_eq!(f.vault.reveal(&f.alice, id).await.unwrap(), secret(b"durable"));
        f.vault.transfer(&f.alice, id, f.carol.identity()).await.unwrap();
        id
    };

    let f = FixtureBuilder::default()
        .build_with_store(SqliteRegistryStore::open(&path).unwrap())
        .await
        .unwrap();
    assert_eq!(f.vault.status(id).await.unwrap(), SecretState::Sealed(id));
    assert_eq!(f.ledger.owner_of(id).await.unwrap(), f.carol.identity());
    assert_eq!(f.ledger.creator_of(id).await.unwrap(), f.alice.identity());

    let next = f.ledger.create(&f.alice.identity(), WAIT).await.unwrap();
    assert_eq!(next, id.next());
}

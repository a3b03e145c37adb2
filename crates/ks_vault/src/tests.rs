//! End-to-end scenarios against the in-memory relay.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ks_auth::MasterKey;
use ks_crypto::{Clock, SigningKeyPair};

use crate::error::Error;
use crate::record::{KeyKind, KeyRecord};
use crate::sync::{Cipher, Event, NoopReceiver, ReceiveContext, Receiver};
use crate::testutil::{TestEnv, TestMessage};
use crate::vault::Status;

/// Receiver that decodes `TestMessage` events into a list.
#[derive(Default)]
struct Collect {
    msgs: std::sync::Mutex<Vec<TestMessage>>,
}

impl Collect {
    fn messages(&self) -> Vec<TestMessage> {
        self.msgs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Receiver for Collect {
    async fn apply(
        &self,
        _ctx: &mut ReceiveContext<'_, '_>,
        events: &[Event],
    ) -> Result<(), Error> {
        let mut msgs = self.msgs.lock().unwrap();
        for event in events {
            msgs.push(TestMessage::unmarshal(&event.data));
        }
        Ok(())
    }
}

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn setup_lock_unlock() {
    let env = TestEnv::new();
    let vault = env.vault("a").await;
    let mk = MasterKey::from_bytes([0x01; 32]);

    assert_eq!(vault.status().await, Status::SetupNeeded);
    assert!(matches!(vault.unlock(&mk).await, Err(Error::SetupNeeded)));

    vault.setup(&mk, None).await.unwrap();
    assert!(!vault.needs_setup());
    assert_eq!(vault.status().await, Status::Locked);
    assert!(matches!(vault.setup(&mk, None).await, Err(Error::AlreadySetup)));

    vault.unlock(&mk).await.unwrap();
    assert_eq!(vault.status().await, Status::Unlocked);
    // Unlock is idempotent.
    vault.unlock(&mk).await.unwrap();

    vault.lock().await.unwrap();
    assert_eq!(vault.status().await, Status::Locked);

    vault.unlock(&mk).await.unwrap();
    assert_eq!(vault.status().await, Status::Unlocked);
    vault.lock().await.unwrap();
}

#[tokio::test]
async fn password_roundtrip() {
    let env = TestEnv::new();
    let vault = env.vault("a").await;

    let mk = vault.setup_password("testpassword", None).await.unwrap();
    assert!(!vault.needs_setup());

    let mko = vault.unlock_with_password("testpassword").await.unwrap();
    assert_eq!(mko, mk);
    vault.lock().await.unwrap();

    assert!(matches!(
        vault.unlock_with_password("invalidpassword").await,
        Err(Error::InvalidAuth)
    ));
    assert!(matches!(vault.unlock_with_password("").await, Err(Error::InvalidAuth)));
}

#[tokio::test]
async fn unlock_with_wrong_master_key() {
    let env = TestEnv::new();
    let vault = env.vault("a").await;

    vault.setup(&MasterKey::from_bytes([0x01; 32]), None).await.unwrap();
    assert!(matches!(
        vault.unlock(&MasterKey::from_bytes([0x02; 32])).await,
        Err(Error::InvalidAuth)
    ));
    // The right key still works afterwards.
    vault.unlock(&MasterKey::from_bytes([0x01; 32])).await.unwrap();
    vault.lock().await.unwrap();
}

#[tokio::test]
async fn locked_isolation() {
    let env = TestEnv::new();
    let vault = env.vault("a").await;
    let key = SigningKeyPair::from_seed_byte(0xb0);

    // Before setup everything reports SetupNeeded.
    assert!(matches!(
        vault.add(&key, b"x", Cipher::None).await,
        Err(Error::SetupNeeded)
    ));

    vault.setup(&MasterKey::from_bytes([0x01; 32]), None).await.unwrap();

    // After setup but before unlock: Locked.
    assert!(matches!(vault.add(&key, b"x", Cipher::None).await, Err(Error::Locked)));
    assert!(matches!(vault.keyring().keys().await, Err(Error::Locked)));
    assert!(matches!(vault.changes().await, Err(Error::Locked)));
    assert!(matches!(vault.client_key().await, Err(Error::Locked)));
    assert!(matches!(
        vault.keyring().sync(&cancel()).await,
        Err(Error::Locked)
    ));
}

// ── Keyring sync ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_device_keyring() -> anyhow::Result<()> {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    // Device A adds a labeled key and syncs.
    let v1 = env.vault_with_setup("a", "testpassword1", &ck).await;
    let alice = KeyRecord::from_signing_key(&account, env.clock.now_millis())
        .with_labels(["alice"]);
    v1.keyring().set(&alice).await?;
    v1.keyring().sync(&cancel()).await?;

    let outs = v1.keyring().keys_with_label("alice").await?;
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].id, account.vid());

    // Device B with the same client key sees it after sync.
    let v2 = env.vault_with_setup("b", "testpassword2", &ck).await;
    v2.keyring().sync(&cancel()).await?;

    let out = v2.keyring().key(&account.vid()).await?;
    assert_eq!(out.id, alice.id);
    assert_eq!(out.labels, vec!["alice".to_string()]);

    // B updates notes; A observes the update.
    let updated = out.with_notes("testing");
    v2.keyring().set(&updated).await?;
    v2.keyring().sync(&cancel()).await?;

    v1.keyring().sync(&cancel()).await?;
    let out2 = v1.keyring().key(&account.vid()).await?;
    assert_eq!(out2.notes, "testing");
    Ok(())
}

#[tokio::test]
async fn tombstone_propagates() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    let v2 = env.vault_with_setup("b", "pw2", &ck).await;

    let key = KeyRecord::from_signing_key(&SigningKeyPair::from_seed_byte(0x05), 0);
    v1.keyring().set(&key).await.unwrap();
    v1.keyring().sync(&cancel()).await.unwrap();

    v2.keyring().sync(&cancel()).await.unwrap();
    assert!(v2.keyring().get(&key.id).await.unwrap().is_some());

    // Remove on A; B sees the delete after sync.
    v1.keyring().remove(&key.id).await.unwrap();
    assert!(v1.keyring().get(&key.id).await.unwrap().is_none());
    v1.keyring().sync(&cancel()).await.unwrap();

    v2.keyring().sync(&cancel()).await.unwrap();
    assert!(v2.keyring().get(&key.id).await.unwrap().is_none());
    assert!(matches!(
        v2.keyring().key(&key.id).await,
        Err(Error::NotFound(_))
    ));

    // Re-sync is a no-op.
    v2.keyring().sync(&cancel()).await.unwrap();
    assert!(v2.keyring().get(&key.id).await.unwrap().is_none());
}

#[tokio::test]
async fn keyring_set_is_idempotent_under_duplicate_events() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    let key = KeyRecord::from_signing_key(&SigningKeyPair::from_seed_byte(0x05), 0);

    // The same record staged twice yields two remote events with one id.
    v1.keyring().set(&key).await.unwrap();
    v1.keyring().set(&key).await.unwrap();
    v1.keyring().sync(&cancel()).await.unwrap();
    assert_eq!(env.relay.event_count(&ck.vid()), 2);

    let v2 = env.vault_with_setup("b", "pw2", &ck).await;
    v2.keyring().sync(&cancel()).await.unwrap();
    let keys = v2.keyring().keys().await.unwrap();
    assert_eq!(keys.len(), 1);
}

#[tokio::test]
async fn keys_by_kind() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xaf);
    env.register_client(&ck, &account).await;
    let vault = env.vault_with_setup("a", "testpassword", &ck).await;
    let kr = vault.keyring();

    let alice = KeyRecord::from_signing_key(&SigningKeyPair::from_seed_byte(0x01), 0)
        .with_labels(["alice"]);
    kr.set(&alice).await.unwrap();

    let bob_public = KeyRecord::public_only(SigningKeyPair::from_seed_byte(0x02).vid(), 0).unwrap();
    kr.set(&bob_public).await.unwrap();

    let charlie = KeyRecord::from_x25519_secret(
        &x25519_dalek::StaticSecret::from([0x03; 32]),
        0,
    )
    .with_labels(["charlie"]);
    kr.set(&charlie).await.unwrap();

    let sks = kr.keys_by_kind(KeyKind::X25519).await.unwrap();
    assert_eq!(sks.len(), 1);
    assert_eq!(sks[0].id, charlie.id);

    assert_eq!(kr.keys().await.unwrap().len(), 3);
}

#[tokio::test]
async fn find_syncs_on_miss() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0xaf);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let channel = SigningKeyPair::from_seed_byte(0xb0);

    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    v1.register(&channel, &account).await.unwrap();
    v1.keyring().sync(&cancel()).await.unwrap();

    let out = v1.keyring().key(&channel.vid()).await.unwrap();
    assert_eq!(out.id, channel.vid());

    // Device B has never synced; find pulls the keyring on the miss.
    let v2 = env.vault_with_setup("b", "pw2", &ck).await;
    let out2 = v2.keyring().find(&channel.vid()).await.unwrap().unwrap();
    assert_eq!(out2.id, channel.vid());
    assert!(!out2.token.is_empty());
}

// ── Channel sync ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn multi_writer_convergence() -> anyhow::Result<()> {
    let env = TestEnv::new();
    let channel = SigningKeyPair::from_seed_byte(0xb0);

    // Alice.
    let alice = SigningKeyPair::from_seed_byte(0x01);
    let cka = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&cka, &alice).await;
    let v1 = env.vault_with_setup("alice", "testpassword1", &cka).await;
    v1.register(&channel, &alice).await?;

    v1.add(&channel, &TestMessage::new("hi bob", alice.vid()).marshal(), Cipher::None)
        .await?;
    v1.add(
        &channel,
        &TestMessage::new("what's for lunch?", alice.vid()).marshal(),
        Cipher::None,
    )
    .await?;

    let alice_recv = Collect::default();
    v1.sync(&channel.vid(), &alice_recv, &cancel()).await?;

    // Bob (own account, own keyring) joins the same channel.
    let bob = SigningKeyPair::from_seed_byte(0x02);
    let ckb = SigningKeyPair::from_seed_byte(0xa1);
    env.register_client(&ckb, &bob).await;
    let v2 = env.vault_with_setup("bob", "testpassword2", &ckb).await;
    v2.register(&channel, &bob).await?;

    let bob_recv = Collect::default();
    v2.sync(&channel.vid(), &bob_recv, &cancel()).await?;

    v2.add(&channel, &TestMessage::new("homemade mcribs", bob.vid()).marshal(), Cipher::None)
        .await?;
    v2.sync(&channel.vid(), &bob_recv, &cancel()).await?;

    // Alice pulls Bob's message.
    v1.sync(&channel.vid(), &alice_recv, &cancel()).await?;

    let alice_msgs = alice_recv.messages();
    let bob_msgs = bob_recv.messages();
    assert_eq!(alice_msgs.len(), 3);
    assert_eq!(alice_msgs, bob_msgs);
    assert_eq!(alice_msgs[0].text, "hi bob");
    assert_eq!(alice_msgs[1].text, "what's for lunch?");
    assert_eq!(alice_msgs[2].text, "homemade mcribs");
    Ok(())
}

#[tokio::test]
async fn truncated_pull_pages_to_completion() {
    let env = TestEnv::with_page_limit(2);
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let channel = SigningKeyPair::from_seed_byte(0xb0);
    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    v1.register(&channel, &account).await.unwrap();

    for i in 0..5 {
        let msg = TestMessage::new(&format!("msg{i}"), account.vid());
        v1.add(&channel, &msg.marshal(), Cipher::None).await.unwrap();
    }
    v1.sync(&channel.vid(), &NoopReceiver, &cancel()).await.unwrap();

    let v2 = env.vault_with_setup("b", "pw2", &ck).await;
    let recv = Collect::default();
    v2.sync(&channel.vid(), &recv, &cancel()).await.unwrap();

    let msgs = recv.messages();
    assert_eq!(msgs.len(), 5);
    for (i, msg) in msgs.iter().enumerate() {
        assert_eq!(msg.text, format!("msg{i}"));
    }

    // No gaps: the local pull table has consecutive server indices.
    let pulled = v2.pulled(&channel.vid(), 0).await.unwrap();
    let indices: Vec<i64> = pulled.iter().map(|e| e.remote_index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn re_pull_is_idempotent() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let channel = SigningKeyPair::from_seed_byte(0xb0);
    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    v1.register(&channel, &account).await.unwrap();
    v1.add(&channel, &TestMessage::new("once", account.vid()).marshal(), Cipher::None)
        .await
        .unwrap();

    let recv = Collect::default();
    v1.sync(&channel.vid(), &recv, &cancel()).await.unwrap();
    assert_eq!(recv.messages().len(), 1);

    // Nothing new on the server: the receiver must not run again.
    v1.sync(&channel.vid(), &recv, &cancel()).await.unwrap();
    assert_eq!(recv.messages().len(), 1);
}

#[tokio::test]
async fn sealed_cipher_roundtrip_through_relay() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let channel = SigningKeyPair::from_seed_byte(0xb0);
    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    v1.register(&channel, &account).await.unwrap();

    let msg = TestMessage::new("sealed", account.vid());
    v1.add(&channel, &msg.marshal(), Cipher::Sealed).await.unwrap();
    v1.sync(&channel.vid(), &NoopReceiver, &cancel()).await.unwrap();

    // The pulled row is ciphertext; the channel key opens it.
    let pulled = v1.pulled(&channel.vid(), 0).await.unwrap();
    assert_eq!(pulled.len(), 1);
    assert_ne!(pulled[0].data, msg.marshal());
    let opened = Cipher::Sealed.decrypt(&pulled[0].data, &channel).unwrap();
    assert_eq!(TestMessage::unmarshal(&opened), msg);
}

#[tokio::test]
async fn cancelled_sync_returns_promptly() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let channel = SigningKeyPair::from_seed_byte(0xb0);
    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    v1.register(&channel, &account).await.unwrap();
    v1.add(&channel, b"staged", Cipher::None).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    assert!(matches!(
        v1.sync_with_key(&channel, &NoopReceiver, &token).await,
        Err(Error::Cancelled)
    ));
    // The staged row is untouched and goes out on the next sync.
    v1.sync_with_key(&channel, &NoopReceiver, &cancel()).await.unwrap();
    assert_eq!(env.relay.event_count(&channel.vid()), 1);
}

// ── Changes ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn changes_ordering() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0xaf);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let channels = [
        SigningKeyPair::from_seed_byte(0xb1),
        SigningKeyPair::from_seed_byte(0xb2),
        SigningKeyPair::from_seed_byte(0xb3),
        SigningKeyPair::from_seed_byte(0xb4),
    ];

    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    for (i, channel) in channels.iter().enumerate() {
        env.clock.advance(20 + 10 * i as i64);
        v1.register(channel, &account).await.unwrap();
        v1.add(channel, &TestMessage::new("msg1", account.vid()).marshal(), Cipher::None)
            .await
            .unwrap();
        v1.sync(&channel.vid(), &NoopReceiver, &cancel()).await.unwrap();
    }
    v1.keyring().sync(&cancel()).await.unwrap();

    // A is fully synced: nothing outstanding.
    assert!(v1.changes().await.unwrap().is_empty());

    // B syncs the keyring only; every channel is ahead remotely.
    let v2 = env.vault_with_setup("b", "pw2", &ck).await;
    v2.keyring().sync(&cancel()).await.unwrap();

    let changes = v2.changes().await.unwrap();
    assert_eq!(changes.len(), 4);
    let vids: Vec<_> = changes.iter().map(|c| c.vid.clone()).collect();
    assert_eq!(
        vids,
        vec![
            channels[3].vid(),
            channels[2].vid(),
            channels[1].vid(),
            channels[0].vid()
        ]
    );
    for change in &changes {
        assert_eq!(change.local, 0);
        assert_eq!(change.remote, 1);
        assert!(!change.push);
    }
    // Newest first.
    assert!(changes.windows(2).all(|w| w[0].timestamp > w[1].timestamp));

    // After B syncs a channel it drops out of the changes list.
    v2.sync(&channels[3].vid(), &NoopReceiver, &cancel()).await.unwrap();
    let changes = v2.changes().await.unwrap();
    assert_eq!(changes.len(), 3);
    assert!(!changes.iter().any(|c| c.vid == channels[3].vid()));
}

#[tokio::test]
async fn changes_reports_pending_push() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0xaf);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let channel = SigningKeyPair::from_seed_byte(0xb0);
    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    v1.register(&channel, &account).await.unwrap();

    // Staged but not synced.
    v1.add(&channel, b"pending", Cipher::None).await.unwrap();

    let changes = v1.changes().await.unwrap();
    let change = changes.iter().find(|c| c.vid == channel.vid()).unwrap();
    assert!(change.push);
    assert_eq!(change.local, 0);
    assert_eq!(change.remote, 0);
}

// ── Vault registration ───────────────────────────────────────────────────────

#[tokio::test]
async fn register_stores_tokened_key() {
    let env = TestEnv::new();
    let account = SigningKeyPair::from_seed_byte(0x01);
    let ck = SigningKeyPair::from_seed_byte(0xa0);
    env.register_client(&ck, &account).await;

    let channel = SigningKeyPair::from_seed_byte(0xb0);
    let v1 = env.vault_with_setup("a", "pw1", &ck).await;
    let record = v1.register(&channel, &account).await.unwrap();

    assert_eq!(record.id, channel.vid());
    assert!(!record.token.is_empty());
    assert!(record.has_label(crate::record::LABEL_VAULT));

    let tokens = v1.keyring().tokens().await.unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].vid, channel.vid());
    assert_eq!(tokens[0].token, record.token);
}

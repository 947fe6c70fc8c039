use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use consent_ledger::{
    ConsentRegistry, ConsentType, FieldValue, FieldsBuilder, LedgerBackend, LedgerConfig,
    LedgerEntry, LedgerError, LedgerEvent, MemoryBackend, PersistenceError, SystemClock,
};
use serde_json::Value;

async fn open_file(path: &Path) -> consent_ledger::Result<ConsentRegistry> {
    ConsentRegistry::open(&LedgerConfig::with_file(path), Arc::new(SystemClock)).await
}

async fn populate(registry: &ConsentRegistry) {
    for i in 0..3 {
        let req = registry
            .request_consent(
                "SupplyChainBOT",
                "SOpLead",
                ConsentType::DataAccess,
                &format!("inventory:{i}"),
                "reconcile stock",
                None,
            )
            .await
            .unwrap();
        registry
            .grant_consent(&req.id, None, None, true, vec![])
            .await
            .unwrap();
    }
}

fn rewrite_line(path: &Path, index: usize, edit: impl FnOnce(&mut Value)) {
    let raw = std::fs::read_to_string(path).unwrap();
    let mut lines: Vec<String> = raw.lines().map(str::to_string).collect();
    let mut value: Value = serde_json::from_str(&lines[index]).unwrap();
    edit(&mut value);
    lines[index] = serde_json::to_string(&value).unwrap();
    std::fs::write(path, lines.join("\n") + "\n").unwrap();
}

fn integrity_sequence(err: LedgerError) -> u64 {
    match err {
        LedgerError::Integrity(err) => err.sequence,
        other => panic!("expected integrity error, got {other:?}"),
    }
}

#[tokio::test]
async fn reload_verifies_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.jsonl");

    let registry = open_file(&path).await.unwrap();
    populate(&registry).await;
    let tail = registry.store().tail_digest();
    drop(registry);

    let registry = open_file(&path).await.unwrap();
    assert_eq!(registry.store().len(), 6);
    assert_eq!(registry.store().tail_digest(), tail);
    assert_eq!(registry.verify().await.unwrap(), 6);
    assert_eq!(registry.active_grants().len(), 3);
}

#[tokio::test]
async fn tampered_payload_fails_at_its_sequence() {
    for target in [1usize, 4, 6] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consent.jsonl");

        let registry = open_file(&path).await.unwrap();
        populate(&registry).await;
        drop(registry);

        rewrite_line(&path, target - 1, |entry| {
            let event = entry["event"].as_object_mut().unwrap();
            if event.contains_key("purpose") {
                event.insert("purpose".into(), Value::from("something else"));
            } else {
                event.insert("revocable".into(), Value::from(false));
            }
        });

        let err = open_file(&path).await.unwrap_err();
        assert_eq!(integrity_sequence(err), target as u64);
    }
}

#[tokio::test]
async fn tampered_digest_and_reordering_are_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.jsonl");

    let registry = open_file(&path).await.unwrap();
    populate(&registry).await;
    drop(registry);

    rewrite_line(&path, 2, |entry| {
        entry["chain_digest"] = Value::from("00".repeat(32));
    });
    assert_eq!(integrity_sequence(open_file(&path).await.unwrap_err()), 3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.jsonl");
    let registry = open_file(&path).await.unwrap();
    populate(&registry).await;
    drop(registry);

    let raw = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<&str> = raw.lines().collect();
    lines.swap(3, 4);
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    assert_eq!(integrity_sequence(open_file(&path).await.unwrap_err()), 4);
}

#[tokio::test]
async fn torn_trailing_line_is_an_integrity_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.jsonl");

    let registry = open_file(&path).await.unwrap();
    populate(&registry).await;
    drop(registry);

    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str(r#"{"sequence_number":7,"timest"#);
    std::fs::write(&path, raw).unwrap();

    assert_eq!(integrity_sequence(open_file(&path).await.unwrap_err()), 7);
}

#[tokio::test]
async fn verification_failure_seals_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.jsonl");

    let registry = open_file(&path).await.unwrap();
    populate(&registry).await;

    rewrite_line(&path, 1, |entry| {
        entry["event"]["scope"] = Value::from("inventory:*");
    });

    assert_eq!(integrity_sequence(registry.verify().await.unwrap_err()), 2);
    assert!(registry.store().is_sealed());

    let err = registry
        .append_redacted_record(&FieldsBuilder::new().field("note", "after").build())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(integrity_sequence(err), 2);
}

#[tokio::test]
async fn second_writer_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.jsonl");

    let _first = open_file(&path).await.unwrap();
    let err = open_file(&path).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Persistence(PersistenceError::Locked { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_stay_gapless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.jsonl");
    let registry = Arc::new(open_file(&path).await.unwrap());

    let mut handles = Vec::new();
    for i in 0..32i64 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry
                .append_redacted_record_for(
                    "MemoryWriter",
                    &FieldsBuilder::new().field("n", i).build(),
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let entries = registry.store().load_and_verify().await.unwrap();
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence_number).collect();
    assert_eq!(sequences, (1..=32).collect::<Vec<u64>>());
    for pair in entries.windows(2) {
        assert_eq!(pair[1].prev_chain_digest, pair[0].chain_digest);
    }
}

/// Memory backend whose writes can be made to fail.
#[derive(Debug, Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    failing: AtomicBool,
}

#[async_trait]
impl LedgerBackend for FlakyBackend {
    async fn persist(&self, entry: &LedgerEntry) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("disk full".into()));
        }
        self.inner.persist(entry).await
    }

    async fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.load().await
    }

    fn label(&self) -> String {
        "flaky".into()
    }
}

#[tokio::test]
async fn persistence_failure_does_not_advance_the_tail() {
    let backend = Arc::new(FlakyBackend::default());
    let registry = ConsentRegistry::with_backend(
        backend.clone(),
        Arc::new(SystemClock),
        &LedgerConfig::in_memory(),
    )
    .await
    .unwrap();
    let store = registry.store().clone();

    let req = registry
        .request_consent("a", "b", ConsentType::Collaboration, "task:*", "pair", None)
        .await
        .unwrap();
    let tail = store.tail_digest();

    backend.failing.store(true, Ordering::SeqCst);
    let err = registry
        .grant_consent(&req.id, None, None, true, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Persistence(_)));
    assert!(!err.is_fatal());
    assert_eq!(store.tail_digest(), tail);
    assert_eq!(store.len(), 1);
    assert!(registry.active_grants().is_empty());

    backend.failing.store(false, Ordering::SeqCst);
    let grant = registry
        .grant_consent(&req.id, None, None, true, vec![])
        .await
        .unwrap();
    let entries = store.load_and_verify().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].sequence_number, 2);
    assert_eq!(entries[1].prev_chain_digest, tail);
    assert_eq!(registry.get_grant(&grant.id).unwrap().id, grant.id);
}

#[tokio::test]
async fn stale_registry_cannot_issue_a_second_active_grant() {
    let backend = Arc::new(MemoryBackend::new());
    let config = LedgerConfig::in_memory();
    let first = ConsentRegistry::with_backend(backend.clone(), Arc::new(SystemClock), &config)
        .await
        .unwrap();
    let req = first
        .request_consent("a", "b", ConsentType::DataAccess, "db:*", "export", None)
        .await
        .unwrap();
    let second = ConsentRegistry::with_backend(backend.clone(), Arc::new(SystemClock), &config)
        .await
        .unwrap();

    first
        .grant_consent(&req.id, None, None, true, vec![])
        .await
        .unwrap();
    let err = second
        .grant_consent(&req.id, None, None, true, vec![])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Persistence(PersistenceError::OutOfOrder {
            expected: 3,
            got: 2
        })
    ));

    assert_eq!(backend.len(), 2);
    assert_eq!(first.verify().await.unwrap(), 2);
    assert_eq!(first.active_grants().len(), 1);
}

#[tokio::test]
async fn float_payloads_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("consent.jsonl");
    let score = -9.478233064610241e172_f64;
    let values = [score, 0.1 + 0.2, f64::MIN_POSITIVE, 1.0e-300 / 3.0, -0.0];

    {
        let registry = open_file(&path).await.unwrap();
        for value in values {
            let raw = FieldsBuilder::new().field("score", value).build();
            registry.append_redacted_record(&raw).await.unwrap();
        }
    }

    let registry = open_file(&path).await.unwrap();
    assert_eq!(registry.verify().await.unwrap(), values.len());
    let stored: Vec<u64> = registry
        .store()
        .entries()
        .iter()
        .filter_map(|entry| match &entry.event {
            LedgerEvent::RedactedRecord(record) => match record.fields.get("score") {
                Some(FieldValue::Float(value)) => Some(value.to_bits()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(stored[0], score.to_bits());
    assert_eq!(stored.len(), values.len());
}

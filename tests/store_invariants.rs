//! Version store invariants across restarts, tampering and contention

use std::sync::Arc;
use std::thread;

use anvil::domain::{AuditVerdict, ExecutionResult, GeneratedBy, Signature, VersionState};
use anvil::error::AnvilError;
use anvil::store::VersionStore;
use tempfile::TempDir;

fn sig() -> Signature {
    Signature::parse("(symbol: string) -> number").unwrap()
}

fn source(n: usize) -> String {
    format!("def run(symbol):\n    return float(len(symbol)) * {}\n", n)
}

/// Append, verify, audit and promote one version
fn ship(store: &VersionStore, n: usize) -> String {
    let v = store.append_candidate("stock", &source(n), GeneratedBy::Fix).unwrap();
    store.mark_verified(&v.id, ExecutionResult::success("1.0", 3)).unwrap();
    store.mark_audited(&v.id, AuditVerdict::approved(vec![])).unwrap();
    store.promote(&v.id).unwrap().id
}

#[test]
fn test_sequences_continue_after_restart() {
    let temp = TempDir::new().unwrap();
    {
        let store = VersionStore::open(temp.path()).unwrap();
        store.register("stock", "latest share price", &sig()).unwrap();
        ship(&store, 1);
        ship(&store, 2);
        store.append_candidate("stock", &source(3), GeneratedBy::Fix).unwrap();
    }

    let store = VersionStore::open(temp.path()).unwrap();
    assert_eq!(store.active_sequence("stock").unwrap(), Some(2));
    assert_eq!(store.get_active("stock").unwrap().source, source(2));

    let next = store.append_candidate("stock", &source(4), GeneratedBy::Fix).unwrap();
    assert_eq!(next.sequence, 4);

    let states: Vec<VersionState> = store.history("stock").unwrap().iter().map(|v| v.state).collect();
    assert_eq!(
        states,
        vec![
            VersionState::Superseded,
            VersionState::Active,
            VersionState::Candidate,
            VersionState::Candidate
        ]
    );
}

#[test]
fn test_two_active_versions_is_corruption() {
    let temp = TempDir::new().unwrap();
    {
        let store = VersionStore::open(temp.path()).unwrap();
        store.register("stock", "latest share price", &sig()).unwrap();
        ship(&store, 1);
        ship(&store, 2);
    }
    let path = temp.path().join("lifecycle.jsonl");
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("\"superseded\""));
    std::fs::write(&path, content.replace("\"superseded\"", "\"active\"")).unwrap();
    // No pointer left to say which one was promoted last
    std::fs::remove_file(temp.path().join("active.jsonl")).unwrap();

    match VersionStore::open(temp.path()) {
        Err(AnvilError::Corruption(msg)) => assert!(msg.contains("2 active versions")),
        other => panic!("expected corruption, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_pointer_wins_over_stale_active_lifecycle() {
    let temp = TempDir::new().unwrap();
    {
        let store = VersionStore::open(temp.path()).unwrap();
        store.register("stock", "latest share price", &sig()).unwrap();
        ship(&store, 1);
        ship(&store, 2);
    }
    // Lifecycles as they were before the second promotion's lifecycle write
    let path = temp.path().join("lifecycle.jsonl");
    let content = std::fs::read_to_string(&path).unwrap();
    let rewound: Vec<String> = content
        .lines()
        .map(|line| {
            if line.contains("stock@1") {
                line.replace("\"superseded\"", "\"active\"")
            } else if line.contains("stock@2") {
                line.replace("\"active\"", "\"audited\"")
            } else {
                line.to_string()
            }
        })
        .collect();
    std::fs::write(&path, rewound.join("\n") + "\n").unwrap();

    let store = VersionStore::open(temp.path()).unwrap();
    assert_eq!(store.get_active("stock").unwrap().source, source(2));
    assert_eq!(
        store.get_version_by_sequence("stock", 1).unwrap().state,
        VersionState::Superseded
    );
    let active = store
        .history("stock")
        .unwrap()
        .iter()
        .filter(|v| v.state == VersionState::Active)
        .count();
    assert_eq!(active, 1);
}

#[test]
fn test_dangling_active_pointer_is_corruption() {
    let temp = TempDir::new().unwrap();
    {
        let store = VersionStore::open(temp.path()).unwrap();
        store.register("stock", "latest share price", &sig()).unwrap();
        ship(&store, 1);
        store.append_candidate("stock", &source(2), GeneratedBy::Fix).unwrap();
    }
    let path = temp.path().join("active.jsonl");
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, content.replace("stock@1", "stock@2")).unwrap();

    assert!(matches!(VersionStore::open(temp.path()), Err(AnvilError::Corruption(_))));
}

#[test]
fn test_concurrent_promotions_leave_one_active() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(VersionStore::open(temp.path()).unwrap());
    store.register("stock", "latest share price", &sig()).unwrap();

    let handles: Vec<_> = (1..=8)
        .map(|n| {
            let store = Arc::clone(&store);
            thread::spawn(move || ship(&store, n))
        })
        .collect();
    let promoted: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(promoted.len(), 8);

    let history = store.history("stock").unwrap();
    let sequences: Vec<u64> = history.iter().map(|v| v.sequence).collect();
    assert_eq!(sequences, (1..=8).collect::<Vec<u64>>());

    let active: Vec<_> = history.iter().filter(|v| v.state == VersionState::Active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(
        history.iter().filter(|v| v.state == VersionState::Superseded).count(),
        7
    );
    assert_eq!(store.get_active("stock").unwrap().id, active[0].id);

    drop(store);
    let reopened = VersionStore::open(temp.path()).unwrap();
    assert_eq!(reopened.get_active("stock").unwrap().id, active[0].id);
}

#[test]
fn test_deactivated_tool_refuses_new_versions() {
    let temp = TempDir::new().unwrap();
    let store = VersionStore::open(temp.path()).unwrap();
    store.register("stock", "latest share price", &sig()).unwrap();
    ship(&store, 1);
    store.deactivate("stock").unwrap();

    assert!(matches!(
        store.append_candidate("stock", &source(2), GeneratedBy::Fix),
        Err(AnvilError::UnknownTool(_))
    ));
    // Existing history stays readable
    assert_eq!(store.get_active("stock").unwrap().sequence, 1);
}

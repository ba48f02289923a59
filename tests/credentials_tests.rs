use edge_http::config::CredentialConfig;
use edge_http::credentials::{
    ConnPool, CredentialConnection, CredentialConnector, CredentialStore, MemoryUserDb,
    PooledCredentialStore,
};
use edge_http::error::{ServerError, ServerResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn config(pool_size: usize) -> CredentialConfig {
    CredentialConfig {
        pool_size,
        ..CredentialConfig::default()
    }
}

#[test]
fn test_login_and_register() {
    let users = MemoryUserDb::new().with_user("alice", "secret");
    let store = PooledCredentialStore::init(&users, &config(2)).unwrap();

    assert!(store.verify("alice", "secret", true));
    assert!(!store.verify("alice", "nope", true));
    assert!(!store.verify("bob", "pw", true));

    assert!(store.verify("bob", "pw", false));
    assert!(users.contains("bob"));
    assert!(store.verify("bob", "pw", true));
    // Name already taken
    assert!(!store.verify("alice", "other", false));
}

#[test]
fn test_empty_fields_are_rejected() {
    let users = MemoryUserDb::new().with_user("alice", "secret");
    let store = PooledCredentialStore::init(&users, &config(1)).unwrap();

    assert!(!store.verify("", "secret", true));
    assert!(!store.verify("alice", "", true));
    assert!(!store.verify("", "", false));
    assert!(!users.contains(""));
}

#[test]
fn test_pool_connections_are_returned() {
    let users = MemoryUserDb::new();
    let store = PooledCredentialStore::init(&users, &config(3)).unwrap();
    assert_eq!(store.pool().capacity(), 3);

    for i in 0..10 {
        store.verify(&format!("user{}", i), "pw", false);
    }
    assert_eq!(store.pool().free_count(), 3);
}

#[test]
fn test_acquire_blocks_until_release() {
    let pool = Arc::new(ConnPool::new(vec![1u32]));
    let guard = pool.acquire();
    assert_eq!(*guard, 1);
    assert_eq!(pool.free_count(), 0);
    assert!(pool.acquire_timeout(Duration::from_millis(20)).is_none());

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let value = *pool.acquire();
            value
        })
    };
    thread::sleep(Duration::from_millis(50));
    drop(guard);

    assert_eq!(waiter.join().unwrap(), 1);
    assert_eq!(pool.free_count(), 1);
}

/// Connector whose sessions always fail, counting attempts
struct Unreachable {
    attempts: AtomicUsize,
}

struct NeverConn;

impl CredentialConnection for NeverConn {
    fn find_password(&mut self, _username: &str) -> ServerResult<Option<String>> {
        Err(ServerError::Credential("gone".to_string()))
    }

    fn insert_user(&mut self, _username: &str, _password: &str) -> ServerResult<()> {
        Err(ServerError::Credential("gone".to_string()))
    }
}

impl CredentialConnector for Unreachable {
    type Conn = NeverConn;

    fn connect(&self, config: &CredentialConfig) -> ServerResult<NeverConn> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        // Only the first session opens
        if attempt == 0 {
            Ok(NeverConn)
        } else {
            Err(ServerError::Credential(format!("refused by {}", config.host)))
        }
    }
}

#[test]
fn test_init_keeps_sessions_that_opened() {
    let connector = Unreachable { attempts: AtomicUsize::new(0) };
    let store = PooledCredentialStore::init(&connector, &config(4)).unwrap();
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(store.pool().capacity(), 1);

    // Backend errors read as a failed check
    assert!(!store.verify("alice", "secret", true));
    assert_eq!(store.pool().free_count(), 1);
}

#[test]
fn test_init_fails_without_any_session() {
    let connector = Unreachable { attempts: AtomicUsize::new(1) };
    let result = PooledCredentialStore::init(&connector, &config(2));
    assert!(matches!(result, Err(ServerError::Credential(_))));
}

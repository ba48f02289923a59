use crate::config::CredentialConfig;
use crate::error::{ServerError, ServerResult};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Checks or registers a username/password pair
pub trait CredentialStore: Send + Sync {
    /// With `is_login`, true when the stored password matches. Otherwise
    /// registers the pair, true only when the username was free.
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool;
}

/// A single backend session handed out by [`ConnPool`]
pub trait CredentialConnection: Send {
    fn find_password(&mut self, username: &str) -> ServerResult<Option<String>>;
    fn insert_user(&mut self, username: &str, password: &str) -> ServerResult<()>;
}

/// Opens backend sessions from a [`CredentialConfig`]
pub trait CredentialConnector {
    type Conn: CredentialConnection;

    fn connect(&self, config: &CredentialConfig) -> ServerResult<Self::Conn>;
}

/// Fixed-capacity pool; `acquire` blocks until a connection is returned
pub struct ConnPool<T> {
    idle: Mutex<VecDeque<T>>,
    returned: Condvar,
    capacity: usize,
}

impl<T> ConnPool<T> {
    pub fn new(conns: Vec<T>) -> Self {
        let capacity = conns.len();
        Self {
            idle: Mutex::new(conns.into()),
            returned: Condvar::new(),
            capacity,
        }
    }

    /// Take a connection, waiting for one to be released if none is free
    pub fn acquire(&self) -> PooledConn<'_, T> {
        let mut idle = self.idle.lock();
        loop {
            if let Some(conn) = idle.pop_front() {
                return PooledConn { pool: self, conn: Some(conn) };
            }
            self.returned.wait(&mut idle);
        }
    }

    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PooledConn<'_, T>> {
        let deadline = Instant::now() + timeout;
        let mut idle = self.idle.lock();
        loop {
            if let Some(conn) = idle.pop_front() {
                return Some(PooledConn { pool: self, conn: Some(conn) });
            }
            if self.returned.wait_until(&mut idle, deadline).timed_out() {
                return idle
                    .pop_front()
                    .map(|conn| PooledConn { pool: self, conn: Some(conn) });
            }
        }
    }

    pub fn free_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self, conn: T) {
        self.idle.lock().push_back(conn);
        self.returned.notify_one();
    }
}

/// Connection borrowed from a [`ConnPool`], returned on drop
pub struct PooledConn<'a, T> {
    pool: &'a ConnPool<T>,
    conn: Option<T>,
}

impl<T> Deref for PooledConn<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<T> DerefMut for PooledConn<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<T> Drop for PooledConn<'_, T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// [`CredentialStore`] backed by a bounded pool of backend sessions
pub struct PooledCredentialStore<C> {
    pool: ConnPool<C>,
}

impl<C: CredentialConnection> PooledCredentialStore<C> {
    /// Open `config.pool_size` sessions. Sessions that fail to open are
    /// logged and skipped; at least one must succeed.
    pub fn init<K>(connector: &K, config: &CredentialConfig) -> ServerResult<Self>
    where
        K: CredentialConnector<Conn = C>,
    {
        if config.pool_size == 0 {
            return Err(ServerError::Credential("pool size must be positive".to_string()));
        }

        let mut conns = Vec::with_capacity(config.pool_size);
        for i in 0..config.pool_size {
            match connector.connect(config) {
                Ok(conn) => conns.push(conn),
                Err(e) => warn!("Failed to open credential connection {}: {}", i, e),
            }
        }

        if conns.is_empty() {
            return Err(ServerError::Credential(format!(
                "could not connect to {}:{}/{}",
                config.host, config.port, config.database
            )));
        }

        info!(
            "Credential pool ready with {} of {} connections",
            conns.len(),
            config.pool_size
        );
        Ok(Self { pool: ConnPool::new(conns) })
    }

    pub fn pool(&self) -> &ConnPool<C> {
        &self.pool
    }

    fn check(&self, username: &str, password: &str, is_login: bool) -> ServerResult<bool> {
        let mut conn = self.pool.acquire();
        let stored = conn.find_password(username)?;

        if is_login {
            return Ok(stored.as_deref() == Some(password));
        }

        if stored.is_some() {
            debug!("Username {} already exists", username);
            return Ok(false);
        }
        conn.insert_user(username, password)?;
        Ok(true)
    }
}

impl<C: CredentialConnection> CredentialStore for PooledCredentialStore<C> {
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool {
        if username.is_empty() || password.is_empty() {
            debug!("Rejecting empty username or password");
            return false;
        }

        match self.check(username, password, is_login) {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Credential check for {} failed: {}", username, e);
                false
            }
        }
    }
}

/// In-process user table, usable when no database is configured
#[derive(Clone, Default)]
pub struct MemoryUserDb {
    users: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryUserDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.users.lock().insert(username.to_string(), password.to_string());
        self
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.lock().contains_key(username)
    }
}

/// Session on a [`MemoryUserDb`]
pub struct MemoryUserConn {
    users: Arc<Mutex<HashMap<String, String>>>,
}

impl CredentialConnection for MemoryUserConn {
    fn find_password(&mut self, username: &str) -> ServerResult<Option<String>> {
        Ok(self.users.lock().get(username).cloned())
    }

    fn insert_user(&mut self, username: &str, password: &str) -> ServerResult<()> {
        self.users.lock().insert(username.to_string(), password.to_string());
        Ok(())
    }
}

impl CredentialConnector for MemoryUserDb {
    type Conn = MemoryUserConn;

    fn connect(&self, _config: &CredentialConfig) -> ServerResult<MemoryUserConn> {
        Ok(MemoryUserConn { users: self.users.clone() })
    }
}

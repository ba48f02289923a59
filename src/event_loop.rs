//! The poller thread.
//!
//! One thread waits on the [`Poller`] and owns the connection table. It
//! accepts new clients and hands every client readiness event to the
//! [`WorkerPool`] as a task. Client sockets are one-shot, so at most one task
//! per connection is in flight; the task re-arms the socket as its last step
//! while still holding the connection lock.
//!
//! Workers close their own connections and report the token back over a
//! channel. Only this thread inserts into or removes from the table, and it
//! never waits on a connection lock while the loop runs: closes it decides
//! on are handed to the pool like any other event.

use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::connection::{Connection, HttpContext, Next};
use crate::error::ServerResult;
use crate::poller::{Event, Events, Interest, Poller};
use crate::pool::WorkerPool;
use crate::slab::{Key, Slab};
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Token of the listening socket. Connection tokens never reach it.
const LISTENER_TOKEN: u64 = u64::MAX - 1;

type SharedConnection = Arc<Mutex<Connection>>;

fn read_interest() -> Interest {
    Interest::READABLE | Interest::PEER_CLOSED | Interest::EDGE | Interest::ONESHOT
}

// A half-closed peer still reads what is left of the response
fn write_interest() -> Interest {
    Interest::WRITABLE | Interest::EDGE | Interest::ONESHOT
}

/// Stops a running [`EventLoop`] from any thread
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    poller: Arc<Poller>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.poller.wake() {
            error!("Failed to wake event loop: {}", e);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// What a worker task does with the connection
#[derive(Debug, Clone, Copy)]
enum Readiness {
    Readable,
    Writable,
    Hangup,
}

/// Accepts connections and dispatches their I/O to the worker pool
pub struct EventLoop {
    poller: Arc<Poller>,
    events: Events,
    acceptor: Acceptor,
    connections: Slab<SharedConnection>,
    pool: Arc<WorkerPool>,
    ctx: Arc<HttpContext>,
    closed_tx: Sender<u64>,
    closed_rx: Receiver<u64>,
    running: Arc<AtomicBool>,
    max_connections: usize,
    poll_timeout: Duration,
    buffer_size: usize,
}

impl EventLoop {
    /// Bind the listener and register it with a fresh poller
    pub fn new(config: &ServerConfig, pool: Arc<WorkerPool>, ctx: Arc<HttpContext>) -> ServerResult<Self> {
        let poller = Arc::new(Poller::new()?);
        let acceptor = Acceptor::bind(config.socket_address(), config.backlog)?;
        poller.register(
            acceptor.as_raw_fd(),
            LISTENER_TOKEN,
            Interest::READABLE | Interest::EDGE,
        )?;

        info!("Listening on {}", acceptor.local_addr());

        let (closed_tx, closed_rx) = channel::unbounded();
        Ok(Self {
            poller,
            events: Events::with_capacity(config.max_events),
            acceptor,
            connections: Slab::with_capacity(config.max_connections.min(1024)),
            pool,
            ctx,
            closed_tx,
            closed_rx,
            running: Arc::new(AtomicBool::new(true)),
            max_connections: config.max_connections,
            poll_timeout: config.poll_timeout,
            buffer_size: config.initial_buffer_size,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
            poller: self.poller.clone(),
        }
    }

    /// Number of connections currently in the table
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run until a [`ShutdownHandle`] stops the loop or the poller fails.
    /// On exit every connection is closed and the worker pool is shut down.
    pub fn run(&mut self) -> ServerResult<()> {
        let result = self.poll_loop();
        if let Err(ref e) = result {
            error!("Event loop failed: {}", e);
        }

        info!("Shutting down, closing {} connections", self.connections.len());
        self.close_all();
        self.pool.shutdown();
        result
    }

    fn poll_loop(&mut self) -> ServerResult<()> {
        let mut batch: Vec<Event> = Vec::new();
        while self.running.load(Ordering::SeqCst) {
            self.poll_once(&mut batch)?;
        }
        Ok(())
    }

    /// One wait, the events it returned, then the slots workers freed
    fn poll_once(&mut self, batch: &mut Vec<Event>) -> ServerResult<()> {
        self.poller.wait(&mut self.events, Some(self.poll_timeout))?;

        batch.clear();
        batch.extend(self.events.iter());
        for event in batch.iter() {
            if event.token == LISTENER_TOKEN {
                self.accept_connections();
            } else {
                self.handle_event(event);
            }
        }

        self.reap_closed();
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.acceptor.accept() {
                Ok(Some((stream, addr))) => {
                    if self.connections.len() >= self.max_connections {
                        warn!("Connection limit reached, dropping {}", addr);
                        drop(stream);
                        continue;
                    }
                    self.add_connection(stream, addr);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn add_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let fd = stream.as_raw_fd();
        let ctx = self.ctx.clone();
        let buffer_size = self.buffer_size;
        let key = self.connections.insert_with(|key| {
            Arc::new(Mutex::new(Connection::new(
                stream,
                addr,
                key.to_token(),
                ctx,
                buffer_size,
            )))
        });

        match self.poller.register(fd, key.to_token(), read_interest()) {
            Ok(()) => debug!("Accepted {} ({} connections)", addr, self.connections.len()),
            Err(e) => {
                error!("Failed to register {}: {}", addr, e);
                // Never armed, so no task can hold it
                if let Some(conn) = self.connections.remove(key) {
                    conn.lock().close();
                }
            }
        }
    }

    fn handle_event(&mut self, event: &Event) {
        let key = Key::from_token(event.token);
        let conn = match self.connections.get(key) {
            Some(conn) => conn.clone(),
            // Slot was reused or already removed
            None => return,
        };

        // A half-close alone goes down the read path, which sees EOF after
        // draining whatever the peer sent first
        let readiness = if event.is_hangup() {
            Readiness::Hangup
        } else if event.is_readable() || event.is_read_closed() {
            Readiness::Readable
        } else if event.is_writable() {
            Readiness::Writable
        } else {
            return;
        };

        self.dispatch(conn, readiness);
    }

    /// Hand one readiness event to the pool
    fn dispatch(&mut self, conn: SharedConnection, readiness: Readiness) {
        let poller = self.poller.clone();
        let closed_tx = self.closed_tx.clone();
        let task_conn = conn.clone();

        let submitted = self.pool.submit(move || {
            let mut conn = task_conn.lock();
            if conn.is_closed() {
                return;
            }
            let next = match readiness {
                Readiness::Readable => conn.handle_readable(),
                Readiness::Writable => conn.handle_writable(),
                Readiness::Hangup => Next::Close,
            };
            rearm(&poller, &mut conn, next, &closed_tx);
        });

        if let Err(e) = submitted {
            warn!("Failed to dispatch task: {}", e);
            // A task still holding the lock finishes and re-arms on its own;
            // whatever is left open is closed on shutdown
            match conn.try_lock() {
                Some(mut conn) => close_connection(&self.poller, &mut conn, &self.closed_tx),
                None => debug!("Connection busy, leaving close to shutdown"),
            }
        }
    }

    /// Drop table entries for connections that workers have closed
    fn reap_closed(&mut self) {
        while let Ok(token) = self.closed_rx.try_recv() {
            self.connections.remove(Key::from_token(token));
        }
    }

    fn close_all(&mut self) {
        for conn in self.connections.drain() {
            let mut conn = conn.lock();
            if !conn.is_closed() {
                let _ = self.poller.deregister(conn.fd());
                conn.close();
            }
        }
        // Tokens reported during the drain refer to slots that are gone
        while self.closed_rx.try_recv().is_ok() {}
    }
}

/// Register the connection's next interest, or close it
fn rearm(poller: &Poller, conn: &mut Connection, next: Next, closed_tx: &Sender<u64>) {
    let interest = match next {
        Next::Read => read_interest(),
        Next::Write => write_interest(),
        Next::Close => {
            close_connection(poller, conn, closed_tx);
            return;
        }
    };

    if let Err(e) = poller.modify(conn.fd(), conn.token(), interest) {
        warn!("Failed to re-arm {}: {}", conn.peer_addr(), e);
        close_connection(poller, conn, closed_tx);
    }
}

/// Deregister and close, then tell the loop to free the slot
fn close_connection(poller: &Poller, conn: &mut Connection, closed_tx: &Sender<u64>) {
    if conn.is_closed() {
        return;
    }

    debug!("Closing connection to {}", conn.peer_addr());
    // The descriptor may already be gone from the interest list
    let _ = poller.deregister(conn.fd());
    conn.close();

    if closed_tx.send(conn.token()).is_ok() {
        let _ = poller.wake();
    }
}

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, TryLockError};

/// Outcome of a blocking insert
#[derive(Debug)]
pub enum InsertStatus<T> {
    /// The queue took ownership of the token
    Accepted,
    /// The queue is shutting down; the token is handed back
    ShutDown(T),
}

impl<T> InsertStatus<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, InsertStatus::Accepted)
    }
}

/// Outcome of a non-blocking insert
#[derive(Debug)]
pub enum TryInsertStatus<T> {
    /// The queue took ownership of the token
    Accepted,
    /// The queue is at capacity; the token is handed back
    Full(T),
    /// The queue lock was contended; the token is handed back
    Busy(T),
    /// The queue is shutting down; the token is handed back
    ShutDown(T),
}

/// Outcome of a non-blocking get
#[derive(Debug)]
pub enum TryGetStatus<T> {
    Token(T),
    Empty,
    Busy,
}

#[derive(Debug)]
struct QueueInner<T> {
    tokens: VecDeque<T>,
    shutting_down: bool,
}

/// Thread-safe bounded FIFO with explicit shutdown
///
/// Transient conditions (full, contended, shutting down) are reported through
/// status enums that hand the token back to the caller, so ownership transfer
/// happens exactly on a successful insert. Capacity 0 means unbounded.
///
/// Waiters are notified after the queue mutex is released so a woken thread
/// does not immediately collide with the notifier.
#[derive(Debug)]
pub struct TokenQueue<T> {
    inner: Mutex<QueueInner<T>>,
    capacity: usize,
    /// signalled when a token arrives or shutdown begins
    gettable: Condvar,
    /// signalled when capacity frees up
    insertable: Condvar,
}

impl<T> TokenQueue<T> {
    /// Create a queue holding at most `capacity` tokens (0 means unbounded)
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tokens: VecDeque::new(),
                shutting_down: false,
            }),
            capacity,
            gettable: Condvar::new(),
            insertable: Condvar::new(),
        }
    }

    fn has_room(&self, inner: &QueueInner<T>) -> bool {
        self.capacity == 0 || inner.tokens.len() < self.capacity
    }

    /// Insert a token, blocking while the queue is full
    ///
    /// Returns the token if the queue shuts down before space frees up.
    pub fn insert(&self, token: T) -> InsertStatus<T> {
        self.insert_impl(token, false)
    }

    /// Insert a token, bypassing the capacity cap and the shutdown refusal
    ///
    /// Exists solely so a worker can deliver its final result during shutdown
    /// without deadlocking against an owner that has stopped draining.
    pub fn force_insert(&self, token: T) -> InsertStatus<T> {
        self.insert_impl(token, true)
    }

    fn insert_impl(&self, token: T, force: bool) -> InsertStatus<T> {
        let mut inner = self.inner.lock().expect("token queue lock poisoned");

        while !force && !self.has_room(&inner) {
            if inner.shutting_down {
                return InsertStatus::ShutDown(token);
            }
            inner = self
                .insertable
                .wait(inner)
                .expect("token queue lock poisoned");
        }

        if !force && inner.shutting_down {
            return InsertStatus::ShutDown(token);
        }

        inner.tokens.push_back(token);
        drop(inner);

        self.gettable.notify_all();
        InsertStatus::Accepted
    }

    /// Insert without blocking
    pub fn try_insert(&self, token: T) -> TryInsertStatus<T> {
        let mut inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::WouldBlock) => return TryInsertStatus::Busy(token),
            Err(TryLockError::Poisoned(_)) => panic!("token queue lock poisoned"),
        };

        if inner.shutting_down {
            return TryInsertStatus::ShutDown(token);
        }
        if !self.has_room(&inner) {
            return TryInsertStatus::Full(token);
        }

        inner.tokens.push_back(token);
        drop(inner);

        self.gettable.notify_all();
        TryInsertStatus::Accepted
    }

    /// Get the oldest token, blocking while the queue is empty
    ///
    /// Returns `None` once the queue has shut down and drained.
    pub fn get(&self) -> Option<T> {
        let mut inner = self.inner.lock().expect("token queue lock poisoned");

        while inner.tokens.is_empty() {
            if inner.shutting_down {
                return None;
            }
            inner = self
                .gettable
                .wait(inner)
                .expect("token queue lock poisoned");
        }

        let token = inner.tokens.pop_front();
        drop(inner);

        self.insertable.notify_all();
        token
    }

    /// Get the oldest token without blocking
    pub fn try_get(&self) -> TryGetStatus<T> {
        let mut inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::WouldBlock) => return TryGetStatus::Busy,
            Err(TryLockError::Poisoned(_)) => panic!("token queue lock poisoned"),
        };

        match inner.tokens.pop_front() {
            Some(token) => {
                drop(inner);
                self.insertable.notify_all();
                TryGetStatus::Token(token)
            }
            None => TryGetStatus::Empty,
        }
    }

    /// Signal that no more tokens will be added; idempotent, wakes all waiters
    pub fn shut_down(&self) {
        {
            let mut inner = self.inner.lock().expect("token queue lock poisoned");
            inner.shutting_down = true;
        }

        self.gettable.notify_all();
        self.insertable.notify_all();
    }

    /// Clear the shutdown flag of a drained queue so it can be reused
    ///
    /// Panics if tokens are still queued; callers reopen only after the
    /// previous run has been fully drained.
    pub(crate) fn reopen(&self) {
        let mut inner = self.inner.lock().expect("token queue lock poisoned");
        assert!(
            inner.tokens.is_empty(),
            "reopening a token queue that still holds tokens"
        );
        inner.shutting_down = false;
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("token queue lock poisoned")
            .tokens
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("token queue lock poisoned")
            .tokens
            .len()
    }

    /// Whether an insert would currently find room
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock().expect("token queue lock poisoned");
        self.has_room(&inner)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner
            .lock()
            .expect("token queue lock poisoned")
            .shutting_down
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection state machine shared by the concrete endpoints.
//!
//! A [`Link`] owns the lifecycle state and the live session under a single
//! mutex, so a state change and the session it refers to can never be
//! observed apart. Connect attempts are serialized by a separate gate; the
//! state mutex is not held while a session is being opened, so state queries
//! stay quick during a slow connect.

use super::{ConnectionState, EndpointError};
use parking_lot::Mutex;

struct Inner<S> {
    state: ConnectionState,
    session: Option<S>,
}

/// Lifecycle cell: `Disconnected -> Connecting -> Connected`.
pub struct Link<S> {
    inner: Mutex<Inner<S>>,
    connecting: Mutex<()>,
}

impl<S> Default for Link<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Link<S> {
    /// Create a disconnected link
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                session: None,
            }),
            connecting: Mutex::new(()),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// True when a session is live
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open a session with `open` unless one is already live.
    ///
    /// Returns `Ok(true)` on a fresh transition to `Connected` and
    /// `Ok(false)` when already connected (including when a concurrent
    /// caller connected first). A failed `open` leaves the link
    /// `Disconnected`. A `teardown` that lands while `open` runs wins: the
    /// new session is dropped and the attempt fails.
    pub fn establish<F>(&self, open: F) -> Result<bool, EndpointError>
    where
        F: FnOnce() -> Result<S, EndpointError>,
    {
        let _gate = self.connecting.lock();
        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Connected {
                return Ok(false);
            }
            inner.state = ConnectionState::Connecting;
        }

        let opened = open();

        let mut inner = self.inner.lock();
        match opened {
            Ok(session) if inner.state == ConnectionState::Connecting => {
                inner.session = Some(session);
                inner.state = ConnectionState::Connected;
                Ok(true)
            }
            Ok(_) => {
                inner.session = None;
                inner.state = ConnectionState::Disconnected;
                Err(EndpointError::Connect("disconnected while connecting".into()))
            }
            Err(e) => {
                inner.session = None;
                inner.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Close the live session with `close`; no-op when disconnected.
    ///
    /// The link ends `Disconnected` even if `close` fails.
    pub fn teardown<F>(&self, close: F) -> Result<(), EndpointError>
    where
        F: FnOnce(S) -> Result<(), EndpointError>,
    {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Disconnected;
        match inner.session.take() {
            Some(session) => close(session),
            None => Ok(()),
        }
    }

    /// Run `f` against the live session.
    ///
    /// Fails with [`EndpointError::NotConnected`] without calling `f` when no
    /// session is live. An error from `f` that indicates a dead link drops
    /// the session and moves to `Disconnected`.
    pub fn with_session<T, F>(&self, f: F) -> Result<T, EndpointError>
    where
        F: FnOnce(&mut S) -> Result<T, EndpointError>,
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let result = match inner.session.as_mut() {
            Some(session) if inner.state == ConnectionState::Connected => f(session),
            _ => return Err(EndpointError::NotConnected),
        };

        if let Err(ref e) = result {
            if e.is_link_failure() {
                tracing::warn!(error = %e, "Link failure, marking disconnected");
                inner.session = None;
                inner.state = ConnectionState::Disconnected;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_establish_transitions_once() {
        let link: Link<u32> = Link::new();
        assert_eq!(link.state(), ConnectionState::Disconnected);

        assert!(link.establish(|| Ok(7)).unwrap());
        assert!(link.is_connected());

        // Second call must not reopen
        let reopened = link
            .establish(|| panic!("open called while connected"))
            .unwrap();
        assert!(!reopened);
    }

    #[test]
    fn test_failed_establish_leaves_disconnected() {
        let link: Link<u32> = Link::new();

        let err = link
            .establish(|| Err(EndpointError::Connect("refused".into())))
            .unwrap_err();

        assert!(matches!(err, EndpointError::Connect(_)));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_state_readable_while_opening() {
        let link: Arc<Link<u32>> = Arc::new(Link::new());
        let observer = Arc::clone(&link);

        link.establish(|| {
            assert!(observer.inner.try_lock().is_some());
            assert_eq!(observer.state(), ConnectionState::Connecting);
            assert!(!observer.is_connected());
            Ok(1)
        })
        .unwrap();
        assert_eq!(observer.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_teardown_during_open_wins() {
        let link: Arc<Link<u32>> = Arc::new(Link::new());
        let observer = Arc::clone(&link);

        let err = link
            .establish(|| {
                observer.teardown(|_| panic!("no session yet")).unwrap();
                Ok(5)
            })
            .unwrap_err();

        assert!(matches!(err, EndpointError::Connect(_)));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(matches!(
            link.with_session(|s| Ok(*s)),
            Err(EndpointError::NotConnected)
        ));
    }

    #[test]
    fn test_concurrent_establish_has_one_fresh_transition() {
        let link: Arc<Link<u32>> = Arc::new(Link::new());
        let opens = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let link = Arc::clone(&link);
                let opens = Arc::clone(&opens);
                thread::spawn(move || {
                    link.establish(|| {
                        opens.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        Ok(1)
                    })
                    .unwrap()
                })
            })
            .collect();

        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fresh| *fresh)
            .count();
        assert_eq!(fresh, 1);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_with_session_requires_connection() {
        let link: Link<Vec<u8>> = Link::new();

        let err = link
            .with_session(|_| -> Result<(), EndpointError> { panic!("no session") })
            .unwrap_err();
        assert!(matches!(err, EndpointError::NotConnected));
    }

    #[test]
    fn test_link_failure_drops_session() {
        let link: Link<Vec<u8>> = Link::new();
        link.establish(|| Ok(Vec::new())).unwrap();

        link.with_session(|buf| {
            buf.push(1);
            Ok(())
        })
        .unwrap();

        let err = link
            .with_session(|_| -> Result<(), EndpointError> {
                Err(EndpointError::ConnectionLost("reset by peer".into()))
            })
            .unwrap_err();
        assert!(matches!(err, EndpointError::ConnectionLost(_)));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_rejection_keeps_session() {
        let link: Link<Vec<u8>> = Link::new();
        link.establish(|| Ok(Vec::new())).unwrap();

        let _ = link.with_session(|_| -> Result<(), EndpointError> {
            Err(EndpointError::Rejected("payload too large".into()))
        });
        assert!(link.is_connected());
    }

    #[test]
    fn test_teardown() {
        let link: Link<u32> = Link::new();
        link.teardown(|_| panic!("nothing to close")).unwrap();

        link.establish(|| Ok(3)).unwrap();
        let mut closed = None;
        link.teardown(|s| {
            closed = Some(s);
            Ok(())
        })
        .unwrap();

        assert_eq!(closed, Some(3));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }
}

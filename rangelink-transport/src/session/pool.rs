//! Bounded pool of sessions with scoped leases.
//!
//! A [`SessionPool`] hands out at most `max_sessions` leases at a time. A
//! lease is a [`PooledSession`] guard; dropping it returns the session on
//! every exit path, including a cancelled future. Sessions left mid
//! operation (`Connecting`, `Sending`) or `Failed` are discarded instead of
//! returned, so no caller inherits a channel in an unknown state.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rangelink_core::{Providers, TimeProvider};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{Session, SessionContext};
use crate::error::TransportError;

/// Bounded set of sessions to one peer.
pub struct SessionPool<P: Providers> {
    ctx: Arc<SessionContext<P>>,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Session<P>>>>,
    next_id: AtomicU64,
}

impl<P: Providers> SessionPool<P> {
    pub(crate) fn new(ctx: Arc<SessionContext<P>>) -> Self {
        let max = ctx.config.max_sessions;
        Self {
            ctx,
            permits: Arc::new(Semaphore::new(max)),
            idle: Arc::new(Mutex::new(Vec::with_capacity(max))),
            next_id: AtomicU64::new(1),
        }
    }

    /// Lease a session, waiting up to the configured acquire timeout.
    ///
    /// Connected idle sessions are preferred over disconnected ones; a new
    /// session is created when none is idle.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PoolExhausted`] if no lease frees up in time.
    pub async fn acquire(&self) -> Result<PooledSession<P>, TransportError> {
        let after = self.ctx.config.acquire_timeout;
        let exhausted = || TransportError::PoolExhausted {
            peer: self.ctx.peer.name.clone(),
            after,
        };

        let permit = match self
            .ctx
            .providers
            .time()
            .timeout(after, Arc::clone(&self.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => return Err(exhausted()),
        };

        let reused = {
            let mut idle = self.idle.lock();
            match idle.iter().rposition(Session::is_connected) {
                Some(index) => Some(idle.swap_remove(index)),
                None => idle.pop(),
            }
        };
        let session = match reused {
            Some(session) => session,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(peer = %self.ctx.peer.name, session = id, "creating session");
                Session::new(id, Arc::clone(&self.ctx))
            }
        };

        Ok(PooledSession {
            session,
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Sessions currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Idle sessions with an open channel.
    pub fn connected_count(&self) -> usize {
        self.idle.lock().iter().filter(|s| s.is_connected()).count()
    }

    /// Leases that can be granted right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A leased session. Returned to its pool on drop.
pub struct PooledSession<P: Providers> {
    session: Session<P>,
    idle: Arc<Mutex<Vec<Session<P>>>>,
    _permit: OwnedSemaphorePermit,
}

impl<P: Providers> fmt::Debug for PooledSession<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<P: Providers> Deref for PooledSession<P> {
    type Target = Session<P>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl<P: Providers> DerefMut for PooledSession<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl<P: Providers> Drop for PooledSession<P> {
    fn drop(&mut self) {
        let state = self.session.state();
        let session = self.session.detach();
        if state.is_reusable() {
            self.idle.lock().push(session);
        } else {
            tracing::debug!(
                session = session.id(),
                state = %state,
                "discarding session"
            );
        }
    }
}

//! Sessions, heartbeats, cursors and selections.
//!
//! ```text
//!  join ──► Active ──(no heartbeat for heartbeat_timeout)──► Stale
//!             ▲                                               │
//!             └──── heartbeat / rejoin by same user ──────────┤
//!                                                             │
//!                          (grace_period since last heartbeat)▼
//!                                                           Closed (removed)
//! ```
//!
//! Presence is unversioned and bypasses the artboard coordinators. The
//! only interaction with document state is selection filtering: a
//! selection may only name live objects. The coordinator publishes the
//! live id set and then prunes selections under the artboard's session
//! lock; selection updates read the published set while holding the same
//! lock, so a concurrently deleted object can never survive in a selection.
//!
//! Sessions are grouped per artboard, each group behind its own lock.
//! A directory maps session and client ids to their artboard. Locks are
//! always taken directory first, then artboard, and the directory is only
//! held for writing while sessions are added or removed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canvas_core::{ArtboardId, ClientId, ObjectId, Point};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::coordinator::LiveObjects;
use crate::error::SyncError;
use crate::protocol::{PeerPresence, PresenceEvent};

pub type SessionId = Uuid;

/// Supplied by the (external) auth collaborator; trusted as-is.
pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Stale,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    /// Changes when a stale session is resumed on a new connection.
    pub client_id: ClientId,
    pub user_id: UserId,
    pub artboard_id: ArtboardId,
    pub cursor: Option<Point>,
    pub cursor_seq: u64,
    pub selection: Vec<ObjectId>,
    pub last_heartbeat: Instant,
    pub state: SessionState,
}

impl Session {
    pub fn peer(&self) -> PeerPresence {
        PeerPresence {
            session_id: self.session_id,
            client_id: self.client_id,
            user_id: self.user_id,
            cursor: self.cursor,
            selection: self.selection.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub session: Session,
    pub resumed: bool,
    /// A stale session of the same user whose grace period ran out before
    /// this join. It was closed here and peers have not been told yet.
    pub expired: Option<Session>,
}

/// Result of a sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Sessions that just went Active -> Stale.
    pub stale: Vec<Session>,
    /// Sessions that just closed and were removed.
    pub closed: Vec<Session>,
}

type BoardSessions = Arc<RwLock<HashMap<SessionId, Session>>>;

#[derive(Default)]
struct Directory {
    boards: HashMap<ArtboardId, BoardSessions>,
    session_board: HashMap<SessionId, ArtboardId>,
    by_client: HashMap<ClientId, SessionId>,
}

impl Directory {
    fn board(&self, artboard_id: ArtboardId) -> Option<BoardSessions> {
        self.boards.get(&artboard_id).cloned()
    }

    fn board_of(&self, session_id: SessionId) -> Option<BoardSessions> {
        let artboard_id = self.session_board.get(&session_id)?;
        self.board(*artboard_id)
    }

    fn index(&mut self, session: &Session) {
        self.session_board.insert(session.session_id, session.artboard_id);
        self.by_client.insert(session.client_id, session.session_id);
    }

    fn forget(&mut self, session: &Session) {
        self.session_board.remove(&session.session_id);
        if self.by_client.get(&session.client_id) == Some(&session.session_id) {
            self.by_client.remove(&session.client_id);
        }
    }
}

/// Shared session registry. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    directory: Arc<RwLock<Directory>>,
    heartbeat_timeout: Duration,
    grace_period: Duration,
}

impl SessionManager {
    pub fn new(heartbeat_timeout: Duration, grace_period: Duration) -> Self {
        Self {
            directory: Arc::new(RwLock::new(Directory::default())),
            heartbeat_timeout,
            grace_period,
        }
    }

    fn expired(&self, session: &Session, now: Instant) -> bool {
        session.state == SessionState::Closed
            || now.saturating_duration_since(session.last_heartbeat) >= self.grace_period
    }

    pub async fn join(
        &self,
        artboard_id: ArtboardId,
        user_id: UserId,
        live: &watch::Receiver<Arc<LiveObjects>>,
    ) -> JoinOutcome {
        self.join_at(artboard_id, user_id, live, Instant::now()).await
    }

    /// Join, resuming a stale session of the same user on the same
    /// artboard if it is still within its grace period.
    pub async fn join_at(
        &self,
        artboard_id: ArtboardId,
        user_id: UserId,
        live: &watch::Receiver<Arc<LiveObjects>>,
        now: Instant,
    ) -> JoinOutcome {
        let mut dir = self.directory.write().await;
        let board = dir.boards.entry(artboard_id).or_default().clone();
        let mut sessions = board.write().await;
        let client_id = Uuid::new_v4();

        let stale = sessions
            .values()
            .find(|s| s.user_id == user_id && s.state == SessionState::Stale)
            .map(|s| s.session_id);

        let mut expired = None;
        if let Some(session_id) = stale {
            if let Some(mut session) = sessions.remove(&session_id) {
                dir.forget(&session);
                if self.expired(&session, now) {
                    log::info!("Session {session_id} expired before user {user_id} rejoined");
                    session.state = SessionState::Closed;
                    expired = Some(session);
                } else {
                    let ids = live.borrow();
                    session.selection.retain(|id| ids.contains(*id));
                    drop(ids);
                    session.client_id = client_id;
                    session.state = SessionState::Active;
                    session.last_heartbeat = now;
                    dir.index(&session);
                    sessions.insert(session_id, session.clone());
                    log::info!("User {user_id} resumed session {session_id} on artboard {artboard_id}");
                    return JoinOutcome { session, resumed: true, expired: None };
                }
            }
        }

        let session = Session {
            session_id: Uuid::new_v4(),
            client_id,
            user_id,
            artboard_id,
            cursor: None,
            cursor_seq: 0,
            selection: Vec::new(),
            last_heartbeat: now,
            state: SessionState::Active,
        };
        dir.index(&session);
        sessions.insert(session.session_id, session.clone());
        log::info!(
            "User {user_id} joined artboard {artboard_id} as session {}",
            session.session_id
        );
        JoinOutcome { session, resumed: false, expired }
    }

    /// Explicit leave. The session is gone immediately.
    pub async fn leave(&self, session_id: SessionId) -> Option<Session> {
        let mut dir = self.directory.write().await;
        let board = dir.board_of(session_id)?;
        let session = board.write().await.remove(&session_id)?;
        dir.forget(&session);
        log::info!("Session {session_id} left artboard {}", session.artboard_id);
        Some(session)
    }

    /// Connection dropped without a leave: keep the session resumable.
    pub async fn disconnect(&self, session_id: SessionId) -> Option<Session> {
        let board = self.directory.read().await.board_of(session_id)?;
        let mut sessions = board.write().await;
        let session = sessions.get_mut(&session_id)?;
        if session.state != SessionState::Active {
            return None;
        }
        session.state = SessionState::Stale;
        log::info!("Session {session_id} disconnected; stale until grace period ends");
        Some(session.clone())
    }

    /// Run `f` on a usable session, removing the session if it has
    /// quietly expired. Only the session's artboard is locked.
    async fn with_session<T>(
        &self,
        session_id: SessionId,
        now: Instant,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, SyncError> {
        let board = self
            .directory
            .read()
            .await
            .board_of(session_id)
            .ok_or(SyncError::SessionExpired(session_id))?;
        let mut sessions = board.write().await;
        let expired = match sessions.get(&session_id) {
            None => return Err(SyncError::SessionExpired(session_id)),
            Some(session) => self.expired(session, now),
        };
        if expired {
            let removed = sessions.remove(&session_id);
            drop(sessions);
            if let Some(session) = removed {
                self.directory.write().await.forget(&session);
            }
            return Err(SyncError::SessionExpired(session_id));
        }
        let session = sessions
            .get_mut(&session_id)
            .ok_or(SyncError::SessionExpired(session_id))?;
        Ok(f(session))
    }

    pub async fn heartbeat(&self, session_id: SessionId) -> Result<Session, SyncError> {
        self.heartbeat_at(session_id, Instant::now()).await
    }

    /// Refresh a session. A stale session becomes active again.
    pub async fn heartbeat_at(&self, session_id: SessionId, now: Instant) -> Result<Session, SyncError> {
        self.with_session(session_id, now, |session| {
            if session.state == SessionState::Stale {
                log::info!("Session {session_id} reactivated by heartbeat");
            }
            session.state = SessionState::Active;
            session.last_heartbeat = now;
            session.clone()
        })
        .await
    }

    pub async fn update_cursor(&self, session_id: SessionId, position: Point) -> Result<PresenceEvent, SyncError> {
        self.with_session(session_id, Instant::now(), |session| {
            session.cursor = Some(position);
            session.cursor_seq += 1;
            log::trace!("Session {session_id} cursor at ({}, {})", position.x, position.y);
            PresenceEvent::Cursor {
                session_id,
                client_id: session.client_id,
                position,
                seq: session.cursor_seq,
            }
        })
        .await
    }

    /// Replace a selection, keeping only ids that are live right now.
    pub async fn update_selection(
        &self,
        session_id: SessionId,
        mut selection: Vec<ObjectId>,
        live: &watch::Receiver<Arc<LiveObjects>>,
    ) -> Result<PresenceEvent, SyncError> {
        self.with_session(session_id, Instant::now(), |session| {
            {
                let ids = live.borrow();
                selection.retain(|id| ids.contains(*id));
            }
            let mut seen = std::collections::HashSet::new();
            selection.retain(|id| seen.insert(*id));
            log::debug!("Session {session_id} selected {} objects", selection.len());
            session.selection = selection.clone();
            PresenceEvent::Selection {
                session_id,
                client_id: session.client_id,
                selection,
            }
        })
        .await
    }

    /// Drop deleted objects from every selection on an artboard.
    pub async fn prune_selections(&self, artboard_id: ArtboardId, removed: &[ObjectId]) {
        if removed.is_empty() {
            return;
        }
        let Some(board) = self.directory.read().await.board(artboard_id) else {
            return;
        };
        for session in board.write().await.values_mut() {
            session.selection.retain(|id| !removed.contains(id));
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// Advance heartbeat timeouts: Active -> Stale, Stale -> Closed.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let boards: Vec<BoardSessions> = self.directory.read().await.boards.values().cloned().collect();
        let mut report = SweepReport::default();

        for board in boards {
            let mut sessions = board.write().await;
            let mut closing = Vec::new();
            for session in sessions.values_mut() {
                let idle = now.saturating_duration_since(session.last_heartbeat);
                if idle >= self.grace_period {
                    session.state = SessionState::Closed;
                    closing.push(session.session_id);
                } else if idle >= self.heartbeat_timeout && session.state == SessionState::Active {
                    session.state = SessionState::Stale;
                    report.stale.push(session.clone());
                }
            }
            for session_id in closing {
                if let Some(session) = sessions.remove(&session_id) {
                    log::info!("Session {session_id} closed after heartbeat timeout");
                    report.closed.push(session);
                }
            }
        }

        if !report.closed.is_empty() {
            let mut dir = self.directory.write().await;
            for session in &report.closed {
                dir.forget(session);
            }
        }
        report
    }

    pub async fn get(&self, session_id: SessionId) -> Option<Session> {
        let board = self.directory.read().await.board_of(session_id)?;
        let session = board.read().await.get(&session_id).cloned();
        session
    }

    pub async fn session_for_client(&self, client_id: ClientId) -> Option<Session> {
        let session_id = *self.directory.read().await.by_client.get(&client_id)?;
        self.get(session_id).await
    }

    /// Sessions attached to an artboard.
    pub async fn on_artboard(&self, artboard_id: ArtboardId) -> Vec<Session> {
        let Some(board) = self.directory.read().await.board(artboard_id) else {
            return Vec::new();
        };
        let sessions = board.read().await.values().cloned().collect();
        sessions
    }

    pub async fn len(&self) -> usize {
        self.directory.read().await.session_board.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

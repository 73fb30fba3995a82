//! Voice session management
//!
//! Owns at most one live voice session per guild and the reconnect policy
//! around it. Transport state changes arrive as songbird driver events; a
//! disconnect gets a short grace window to self-heal before the controller
//! destroys the stale connection and retries with exponential backoff.

use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::all::{Channel, ChannelId, ChannelType, GuildId, Http};
use serenity::async_trait;
use songbird::error::JoinError;
use songbird::events::{Event, EventContext, EventHandler as VoiceEventHandler};
use songbird::{CoreEvent, Songbird};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Bound on waiting for the transport to report ready after a join
const READY_TIMEOUT: Duration = Duration::from_secs(20);

/// How long a disconnected driver gets to recover on its own
const GRACE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("timed out waiting for the voice connection to become ready")]
    Timeout,
    #[error("voice join failed: {0}")]
    Join(#[from] JoinError),
}

#[derive(Error, Debug)]
pub enum LeaveError {
    #[error("no live voice session for this guild")]
    NotConnected,
}

/// Lifecycle of one guild's voice connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Ready,
    Disconnected,
    Reconnecting,
    /// Terminal; a new join creates a fresh session object
    Destroyed,
}

/// One guild's voice session, held only in process memory
pub struct VoiceSession {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    state: Mutex<SessionState>,
    retries: AtomicU32,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceSession {
    fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            guild_id,
            channel_id,
            state: Mutex::new(SessionState::Idle),
            retries: AtomicU32::new(0),
            retry_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Destroyed is terminal; no transition leaves it
    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != SessionState::Destroyed {
            *state = next;
        }
    }

    /// Park a pending grace/reconnect task so leave() can cancel it
    fn store_retry_task(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.retry_task.lock().replace(handle) {
            old.abort();
        }
    }

    /// Terminal teardown: cancels any pending reconnect
    fn destroy(&self) {
        *self.state.lock() = SessionState::Destroyed;
        if let Some(handle) = self.retry_task.lock().take() {
            handle.abort();
        }
    }
}

/// Reconnect backoff: geometric growth from a base delay, capped, with an
/// attempt ceiling. The source behavior (fixed 5s forever) is reachable by
/// configuring a very large ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (zero-based) attempt, or None when exhausted
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(
            self.initial_backoff
                .saturating_mul(factor)
                .min(self.max_backoff),
        )
    }
}

/// Session registry and lifecycle driver for all guilds
pub struct VoiceController {
    manager: Arc<Songbird>,
    sessions: DashMap<GuildId, Arc<VoiceSession>>,
    policy: ReconnectPolicy,
}

impl VoiceController {
    pub fn new(manager: Arc<Songbird>, policy: ReconnectPolicy) -> Self {
        Self {
            manager,
            sessions: DashMap::new(),
            policy,
        }
    }

    /// The guild's session, if one exists and has not been destroyed
    pub fn active_session(&self, guild_id: GuildId) -> Option<Arc<VoiceSession>> {
        self.sessions
            .get(&guild_id)
            .map(|r| r.value().clone())
            .filter(|s| s.state() != SessionState::Destroyed)
    }

    /// Registry half of join: tear down any prior session, insert a fresh one
    fn install_session(&self, guild_id: GuildId, channel_id: ChannelId) -> Arc<VoiceSession> {
        if let Some((_, old)) = self.sessions.remove(&guild_id) {
            old.destroy();
        }
        let session = Arc::new(VoiceSession::new(guild_id, channel_id));
        self.sessions.insert(guild_id, session.clone());
        session
    }

    /// Join a voice channel, waiting (bounded) for the transport to be ready.
    ///
    /// Any existing session for the guild is destroyed first, so at most one
    /// non-destroyed session exists per guild.
    pub async fn join(
        self: &Arc<Self>,
        http: Arc<Http>,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<(), ConnectError> {
        if self.sessions.contains_key(&guild_id) {
            // Drop the old transport before the registry swap.
            let _ = self.manager.remove(guild_id).await;
        }
        let session = self.install_session(guild_id, channel_id);

        match self.connect(http, &session).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.sessions.remove(&guild_id);
                session.destroy();
                Err(e)
            }
        }
    }

    /// Leave the guild's voice channel, cancelling any pending reconnect
    pub async fn leave(&self, guild_id: GuildId) -> Result<(), LeaveError> {
        let session = self
            .sessions
            .remove(&guild_id)
            .map(|(_, s)| s)
            .filter(|s| s.state() != SessionState::Destroyed)
            .ok_or(LeaveError::NotConnected)?;
        session.destroy();
        let _ = self.manager.remove(guild_id).await;
        info!("Left voice channel {} in guild {}", session.channel_id, guild_id);
        Ok(())
    }

    /// One transport connect attempt with driver watchers attached on success
    async fn connect(
        self: &Arc<Self>,
        http: Arc<Http>,
        session: &Arc<VoiceSession>,
    ) -> Result<(), ConnectError> {
        session.set_state(SessionState::Connecting);

        let call = match timeout(
            READY_TIMEOUT,
            self.manager.join(session.guild_id, session.channel_id),
        )
        .await
        {
            Ok(Ok(call)) => call,
            Ok(Err(e)) => {
                let _ = self.manager.remove(session.guild_id).await;
                return Err(ConnectError::Join(e));
            }
            Err(_) => {
                // Half-open connection; tear it down rather than leak it.
                let _ = self.manager.remove(session.guild_id).await;
                return Err(ConnectError::Timeout);
            }
        };

        {
            let mut call = call.lock().await;
            call.add_global_event(
                CoreEvent::DriverDisconnect.into(),
                DriverWatcher {
                    controller: self.clone(),
                    session: session.clone(),
                    http: http.clone(),
                },
            );
            call.add_global_event(
                CoreEvent::DriverReconnect.into(),
                DriverWatcher {
                    controller: self.clone(),
                    session: session.clone(),
                    http,
                },
            );
        }

        session.retries.store(0, Ordering::Relaxed);
        session.set_state(SessionState::Ready);
        info!(
            "Voice session ready in guild {} channel {}",
            session.guild_id, session.channel_id
        );
        Ok(())
    }

    /// Driver reported a disconnect: give it a grace window to self-heal,
    /// then reconnect from scratch
    fn on_driver_disconnect(self: &Arc<Self>, session: Arc<VoiceSession>, http: Arc<Http>) {
        if session.state() == SessionState::Destroyed {
            return;
        }
        session.set_state(SessionState::Disconnected);
        warn!(
            "Voice disconnected in guild {}, waiting {:?} for the driver to recover",
            session.guild_id, GRACE_WINDOW
        );

        let controller = self.clone();
        let watched = session.clone();
        let handle = tokio::spawn(async move {
            sleep(GRACE_WINDOW).await;
            match watched.state() {
                SessionState::Ready => {
                    debug!("Voice driver recovered on its own in guild {}", watched.guild_id);
                }
                SessionState::Destroyed => {}
                _ => controller.reconnect(watched, http).await,
            }
        });
        session.store_retry_task(handle);
    }

    /// Destroy the stale connection and retry with backoff until ready,
    /// the channel disappears, or attempts are exhausted
    async fn reconnect(self: Arc<Self>, session: Arc<VoiceSession>, http: Arc<Http>) {
        session.set_state(SessionState::Reconnecting);
        let _ = self.manager.remove(session.guild_id).await;

        let mut attempt = 0u32;
        loop {
            let Some(delay) = self.policy.next_delay(attempt) else {
                warn!(
                    "Giving up on voice reconnect in guild {} after {} attempts",
                    session.guild_id, attempt
                );
                self.sessions.remove(&session.guild_id);
                session.destroy();
                return;
            };
            sleep(delay).await;
            if session.state() == SessionState::Destroyed {
                return;
            }

            // The channel may have been deleted while we were away.
            let channel_alive = matches!(
                http.get_channel(session.channel_id).await,
                Ok(Channel::Guild(ch)) if matches!(ch.kind, ChannelType::Voice | ChannelType::Stage)
            );
            if !channel_alive {
                warn!(
                    "Voice channel {} in guild {} is gone, abandoning session",
                    session.channel_id, session.guild_id
                );
                self.sessions.remove(&session.guild_id);
                session.destroy();
                return;
            }

            session.retries.store(attempt + 1, Ordering::Relaxed);
            match self.connect(http.clone(), &session).await {
                Ok(()) => {
                    info!(
                        "Voice reconnected in guild {} after {} attempt(s)",
                        session.guild_id,
                        attempt + 1
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        "Voice reconnect attempt {} failed in guild {}: {}",
                        attempt + 1,
                        session.guild_id,
                        e
                    );
                    attempt += 1;
                }
            }
        }
    }
}

/// Watches transport-level connection events for one session
struct DriverWatcher {
    controller: Arc<VoiceController>,
    session: Arc<VoiceSession>,
    http: Arc<Http>,
}

#[async_trait]
impl VoiceEventHandler for DriverWatcher {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::DriverDisconnect(_) => {
                self.controller
                    .on_driver_disconnect(self.session.clone(), self.http.clone());
            }
            EventContext::DriverReconnect(_) => {
                // Self-healed inside the grace window.
                self.session.retries.store(0, Ordering::Relaxed);
                self.session.set_state(SessionState::Ready);
            }
            _ => {}
        }
        None
    }
}

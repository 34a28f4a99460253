//! Idle-timeout enforcement for one authenticated session.
//!
//! A guard owns exactly one pending timer. Activity replaces it; expiry signs
//! the user out and is terminal. Teardown (explicit or on drop) cancels the
//! timer so no task outlives the session.

use crate::config::SecurityConfig;
use crate::{AuditEntry, AuditLog, AuthProvider, AuthSession, CoreError, EventPublisher};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const SESSION_EXPIRED_EVENT: &str = "SessionExpired";
pub const IDLE_SIGN_OUT_ACTION: &str = "session.idle_sign_out";

pub fn session_topic(user_id: &str) -> String {
    format!("session.{}", user_id)
}

/// User interactions that count as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionEvent {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

impl InteractionEvent {
    pub const ALL: [InteractionEvent; 6] = [
        InteractionEvent::PointerDown,
        InteractionEvent::PointerMove,
        InteractionEvent::KeyPress,
        InteractionEvent::Scroll,
        InteractionEvent::TouchStart,
        InteractionEvent::Click,
    ];

    /// DOM event name.
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionEvent::PointerDown => "mousedown",
            InteractionEvent::PointerMove => "mousemove",
            InteractionEvent::KeyPress => "keypress",
            InteractionEvent::Scroll => "scroll",
            InteractionEvent::TouchStart => "touchstart",
            InteractionEvent::Click => "click",
        }
    }
}

impl fmt::Display for InteractionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionEvent {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        InteractionEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == name)
            .ok_or_else(|| CoreError::Validation(format!("Unrecognized interaction event: {}", name)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    Armed,
    SignedOut,
    TornDown,
}

/// Payload of the notice published when the idle timer fires.
#[derive(Debug, Clone, Serialize)]
pub struct SessionExpiredNotice {
    pub user_id: String,
    pub idle_timeout_minutes: u64,
    pub message: String,
    pub expired_at: chrono::DateTime<Utc>,
}

/// Runs once, after an idle sign-out has completed.
pub type ExpiryHook = Box<dyn Fn(&AuthSession) + Send + Sync>;

/// Optional collaborators of a guard beyond the auth provider and notice bus.
#[derive(Default)]
pub struct GuardHooks {
    pub audit: Option<Arc<dyn AuditLog>>,
    pub on_expire: Option<ExpiryHook>,
}

struct TimerSlot {
    state: GuardState,
    // Identifies the current timer; a firing timer with an older epoch is ignored.
    epoch: u64,
    last_activity: Instant,
    handle: Option<JoinHandle<()>>,
}

struct GuardInner {
    session: AuthSession,
    idle_timeout: Duration,
    idle_timeout_minutes: u64,
    auth: Arc<dyn AuthProvider>,
    notices: Arc<dyn EventPublisher>,
    audit: Option<Arc<dyn AuditLog>>,
    on_expire: Option<ExpiryHook>,
    slot: Mutex<TimerSlot>,
}

/// Idle timer for a single signed-in session. Must be created inside a tokio runtime.
pub struct SessionGuard {
    inner: Arc<GuardInner>,
}

impl SessionGuard {
    pub fn arm(
        config: &SecurityConfig,
        session: AuthSession,
        auth: Arc<dyn AuthProvider>,
        notices: Arc<dyn EventPublisher>,
    ) -> Self {
        Self::arm_with(config, session, auth, notices, GuardHooks::default())
    }

    /// Like [`SessionGuard::arm`], additionally recording the idle sign-out in the audit trail.
    pub fn arm_audited(
        config: &SecurityConfig,
        session: AuthSession,
        auth: Arc<dyn AuthProvider>,
        notices: Arc<dyn EventPublisher>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self::arm_with(
            config,
            session,
            auth,
            notices,
            GuardHooks {
                audit: Some(audit),
                on_expire: None,
            },
        )
    }

    pub fn arm_with(
        config: &SecurityConfig,
        session: AuthSession,
        auth: Arc<dyn AuthProvider>,
        notices: Arc<dyn EventPublisher>,
        hooks: GuardHooks,
    ) -> Self {
        let inner = Arc::new(GuardInner {
            session,
            idle_timeout: config.idle_timeout(),
            idle_timeout_minutes: config.idle_timeout_minutes,
            auth,
            notices,
            audit: hooks.audit,
            on_expire: hooks.on_expire,
            slot: Mutex::new(TimerSlot {
                state: GuardState::Armed,
                epoch: 0,
                last_activity: Instant::now(),
                handle: None,
            }),
        });
        {
            let mut slot = inner.lock_slot();
            GuardInner::schedule(&inner, &mut slot);
        }
        info!(
            "Armed idle timer for user {} ({} min)",
            inner.session.user.user_id, config.idle_timeout_minutes
        );
        Self { inner }
    }

    /// Restarts the idle countdown. Ignored once the guard is signed out or torn down.
    pub fn record_activity(&self, event: InteractionEvent) {
        let mut slot = self.inner.lock_slot();
        if slot.state != GuardState::Armed {
            debug!(
                "Ignoring {} for user {}: guard is {:?}",
                event, self.inner.session.user.user_id, slot.state
            );
            return;
        }
        GuardInner::schedule(&self.inner, &mut slot);
    }

    /// Cancels the pending timer. Idempotent.
    pub fn shutdown(&self) {
        self.inner.teardown();
    }

    pub fn state(&self) -> GuardState {
        self.inner.lock_slot().state
    }

    pub fn last_activity(&self) -> Instant {
        self.inner.lock_slot().last_activity
    }

    pub fn user_id(&self) -> &str {
        &self.inner.session.user.user_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl GuardInner {
    fn lock_slot(&self) -> std::sync::MutexGuard<'_, TimerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule(this: &Arc<Self>, slot: &mut TimerSlot) {
        if let Some(previous) = slot.handle.take() {
            previous.abort();
        }
        slot.epoch += 1;
        slot.last_activity = Instant::now();

        let epoch = slot.epoch;
        let timeout = this.idle_timeout;
        // Weak so a pending timer never keeps a dropped guard alive.
        let weak: Weak<Self> = Arc::downgrade(this);
        slot.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(epoch).await;
            }
        }));
    }

    fn teardown(&self) {
        let mut slot = self.lock_slot();
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        if slot.state == GuardState::Armed {
            slot.state = GuardState::TornDown;
            debug!("Tore down idle timer for user {}", self.session.user.user_id);
        }
    }

    async fn expire(&self, epoch: u64) {
        {
            let mut slot = self.lock_slot();
            if slot.state != GuardState::Armed || slot.epoch != epoch {
                return;
            }
            slot.state = GuardState::SignedOut;
            // This task is the handle's own task; aborting it here would cancel the sign-out.
            slot.handle = None;
        }

        let user_id = &self.session.user.user_id;
        warn!(
            "Signing out user {} after {} min of inactivity",
            user_id, self.idle_timeout_minutes
        );

        if let Err(e) = self.auth.sign_out(&self.session.token).await {
            error!("Idle sign-out failed for user {}: {}", user_id, e);
        }

        let notice = SessionExpiredNotice {
            user_id: user_id.clone(),
            idle_timeout_minutes: self.idle_timeout_minutes,
            message: "Your session has expired due to inactivity. Please sign in again.".into(),
            expired_at: Utc::now(),
        };
        match serde_json::to_vec(&notice) {
            Ok(payload) => {
                if let Err(e) = self
                    .notices
                    .publish(&session_topic(user_id), SESSION_EXPIRED_EVENT, &payload)
                    .await
                {
                    error!("Failed to publish session expiry notice for {}: {}", user_id, e);
                }
            }
            Err(e) => error!("Failed to serialize session expiry notice: {}", e),
        }

        if let Some(audit) = &self.audit {
            let entry = AuditEntry::new(IDLE_SIGN_OUT_ACTION)
                .by_user(user_id.clone())
                .with_details(serde_json::json!({
                    "idle_timeout_minutes": self.idle_timeout_minutes,
                }));
            if let Err(e) = audit.append(&entry).await {
                error!("Failed to audit idle sign-out for {}: {}", user_id, e);
            }
        }

        if let Some(hook) = &self.on_expire {
            hook(&self.session);
        }
    }
}

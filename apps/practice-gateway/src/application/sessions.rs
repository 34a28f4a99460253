use crate::AppState;
use dashmap::DashMap;
use practice_core::domain::session_guard::{ExpiryHook, GuardHooks, GuardState, SessionGuard};
use practice_core::domain::tenant::TenantResolver;
use practice_core::{AuthSession, AuthenticatedUser};
use std::sync::Arc;
use tracing::{info, warn};

/// Server-side state of one signed-in client: its tenant session and idle timer.
pub struct ClientSession {
    pub user: AuthenticatedUser,
    pub tenants: TenantResolver,
    pub guard: SessionGuard,
}

/// Live client sessions keyed by bearer token.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<ClientSession>>>,
}

impl SessionRegistry {
    pub fn get(&self, token: &str) -> Option<Arc<ClientSession>> {
        self.sessions.get(token).map(|s| Arc::clone(s.value()))
    }

    fn insert(&self, token: String, session: Arc<ClientSession>) {
        if let Some(previous) = self.sessions.insert(token, session) {
            previous.guard.shutdown();
            previous.tenants.logout();
        }
    }

    /// Tears down the idle timer and clears tenant state before removing the entry.
    pub fn close(&self, token: &str) -> Option<Arc<ClientSession>> {
        let (_, session) = self.sessions.remove(token)?;
        session.guard.shutdown();
        session.tenants.logout();
        info!("Closed client session for user {}", session.user.user_id);
        Some(session)
    }

    /// Drops the entry for `token` once its guard has signed the user out.
    ///
    /// Holds the map weakly: the hook lives inside a guard the map owns.
    fn expiry_hook(&self, token: String) -> ExpiryHook {
        let sessions = Arc::downgrade(&self.sessions);
        Box::new(move |_: &AuthSession| {
            let Some(sessions) = sessions.upgrade() else {
                return;
            };
            // A replacement session under the same token is still armed.
            let removed = sessions.remove_if(&token, |_, session| {
                session.guard.state() == GuardState::SignedOut
            });
            if let Some((_, session)) = removed {
                session.tenants.logout();
                info!("Closed idle client session for user {}", session.user.user_id);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Arms the idle timer, resolves and provisions tenants, and registers the
/// session under its token.
pub async fn open_session(state: &AppState, auth_session: AuthSession) -> Arc<ClientSession> {
    let token = auth_session.token.clone();
    let user = auth_session.user.clone();

    let guard = SessionGuard::arm_with(
        &state.security,
        auth_session,
        state.auth.clone(),
        state.notices.clone(),
        GuardHooks {
            audit: Some(state.audit.clone()),
            on_expire: Some(state.sessions.expiry_hook(token.clone())),
        },
    );
    let tenants = TenantResolver::new(state.memberships.clone());
    let resolved = tenants.resolve(&user.user_id).await;
    for tenant in resolved.tenants() {
        if let Err(e) = state.directory.provision(tenant, state.scope).await {
            warn!("Tenant {} is not provisioned: {}", tenant.id, e);
        }
    }

    let session = Arc::new(ClientSession {
        user,
        tenants,
        guard,
    });
    state.sessions.insert(token, Arc::clone(&session));
    session
}

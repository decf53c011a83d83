use std::sync::Arc;

use tokio::sync::watch;

use crate::client::OidcClientDyn;
use crate::error::Error;
use crate::refresh::DEFAULT_MIN_VALIDITY;
use crate::state::{AuthState, AuthView, Transition, UserProfile};

struct Inner {
    state: watch::Sender<AuthState>,
    client: Option<Arc<dyn OidcClientDyn>>,
    min_validity: u64,
}

/// The published authentication context.
///
/// Cloning is cheap and every clone observes the same state. Consumers get
/// read access and the `login`/`logout`/`update_token` actions; only the
/// lifecycle driver moves the state forward.
///
/// # Example
///
/// ```rust,ignore
/// let auth = use_auth_context(&app);
/// match auth.view() {
///     AuthView::SignedIn(user) => render_deck(user),
///     AuthView::Error(message) => render_error(&message),
///     _ => render_spinner(),
/// }
/// ```
#[derive(Clone)]
pub struct AuthContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("state", &*self.inner.state.borrow())
            .field("has_client", &self.inner.client.is_some())
            .finish()
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::inert()
    }
}

impl AuthContext {
    /// A context with no provider behind it: initialized, never authenticated,
    /// and every action a no-op.
    #[must_use]
    pub fn inert() -> Self {
        Self::build(AuthState::inert(), None, DEFAULT_MIN_VALIDITY)
    }

    /// A client-less context still `Initializing`, for the lifecycle to settle.
    pub(crate) fn detached() -> Self {
        Self::build(AuthState::default(), None, DEFAULT_MIN_VALIDITY)
    }

    pub(crate) fn with_client(client: Arc<dyn OidcClientDyn>, min_validity: u64) -> Self {
        Self::build(AuthState::default(), Some(client), min_validity)
    }

    fn build(
        state: AuthState,
        client: Option<Arc<dyn OidcClientDyn>>,
        min_validity: u64,
    ) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            inner: Arc::new(Inner {
                state,
                client,
                min_validity,
            }),
        }
    }

    pub(crate) fn apply(&self, transition: Transition) {
        self.inner.state.send_modify(|state| state.apply(transition));
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.state.borrow().is_initialized()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user.clone()
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.inner.state.borrow().token.clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn view(&self) -> AuthView {
        self.inner.state.borrow().view()
    }

    /// Watch for state changes. The receiver starts at the current state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Start an interactive login. No-op without a client.
    ///
    /// # Errors
    ///
    /// Returns whatever the client reports when it cannot start the login.
    pub async fn login(&self) -> Result<(), Error> {
        match &self.inner.client {
            Some(client) => client.login_dyn().await,
            None => Ok(()),
        }
    }

    /// End the session. No-op without a client.
    ///
    /// # Errors
    ///
    /// Returns whatever the client reports when the logout fails.
    pub async fn logout(&self) -> Result<(), Error> {
        match &self.inner.client {
            Some(client) => client.logout_dyn().await,
            None => Ok(()),
        }
    }

    /// The client's current access token; `None` without a client.
    #[must_use]
    pub fn get_token(&self) -> Option<String> {
        self.inner.client.as_ref().and_then(|c| c.token_dyn())
    }

    /// Refresh the token if it expires within `min_validity` seconds
    /// (default: the lifecycle's configured margin) and republish it.
    ///
    /// Returns `Ok(false)` without a client or when no refresh was needed.
    ///
    /// # Errors
    ///
    /// Returns the client's error if the refresh fails; published state is left as is.
    pub async fn update_token(&self, min_validity: Option<u64>) -> Result<bool, Error> {
        let Some(client) = &self.inner.client else {
            return Ok(false);
        };
        let refreshed = client
            .update_token_dyn(min_validity.unwrap_or(self.inner.min_validity))
            .await?;
        if refreshed {
            if let Some(token) = client.token_dyn() {
                self.apply(Transition::TokenRefreshed(token));
            }
        }
        Ok(refreshed)
    }

    /// True if both handles refer to the same published context.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

use serde::{Deserialize, Serialize};

use crate::client::Profile;
use crate::token::TokenClaims;

/// The signed-in user as shown to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UserProfile {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
}

impl UserProfile {
    /// Builds the user from a fetched account profile, filling gaps from token claims.
    ///
    /// Returns `None` if neither source is available.
    #[must_use]
    pub fn derive(profile: Option<&Profile>, claims: Option<&TokenClaims>) -> Option<Self> {
        if profile.is_none() && claims.is_none() {
            return None;
        }

        let pick = |from_profile: Option<&String>, from_claims: Option<&String>| {
            from_profile.or(from_claims).cloned()
        };

        let username = pick(
            profile.and_then(|p| p.username.as_ref()),
            claims.and_then(|c| c.preferred_username.as_ref()),
        );
        let email = pick(
            profile.and_then(|p| p.email.as_ref()),
            claims.and_then(|c| c.email.as_ref()),
        );
        let first_name = pick(
            profile.and_then(|p| p.first_name.as_ref()),
            claims.and_then(|c| c.given_name.as_ref()),
        );
        let last_name = pick(
            profile.and_then(|p| p.last_name.as_ref()),
            claims.and_then(|c| c.family_name.as_ref()),
        );
        let full_name = claims
            .and_then(|c| c.name.clone())
            .or_else(|| match (&first_name, &last_name) {
                (None, None) => None,
                (first, last) => Some(
                    [first.as_deref(), last.as_deref()]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
            });

        Some(Self {
            username,
            email,
            first_name,
            last_name,
            full_name,
        })
    }

    /// Best human-readable label: full name, then username, then email.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .or(self.username.as_deref())
            .or(self.email.as_deref())
    }
}

/// Where the authentication lifecycle currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    /// No Keycloak settings; authentication is switched off.
    Unconfigured,
    /// `init` has not resolved yet.
    #[default]
    Initializing,
    Authenticated,
    /// No session; an interactive login has been requested.
    Unauthenticated,
    Errored,
}

/// Snapshot of the published authentication state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AuthState {
    pub phase: AuthPhase,
    pub user: Option<UserProfile>,
    pub token: Option<String>,
    pub error: Option<String>,
}

/// Input to [`AuthState::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Configuration absent.
    Skipped,
    /// `init` resolved with a session.
    Authenticated {
        token: Option<String>,
        user: Option<UserProfile>,
    },
    /// `init` resolved without a session.
    LoginRequired,
    Failed(String),
    /// The client reported a successful (re)authentication.
    SignedIn(Option<String>),
    TokenRefreshed(String),
    UserLoaded(Option<UserProfile>),
    LoggedOut,
}

impl AuthState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::Authenticated
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.phase != AuthPhase::Initializing
    }

    /// State of a context with no provider behind it.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            phase: AuthPhase::Unconfigured,
            ..Self::default()
        }
    }

    pub(crate) fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::Skipped => *self = Self::inert(),
            Transition::Authenticated { token, user } => {
                self.phase = AuthPhase::Authenticated;
                self.token = token;
                self.user = user;
                self.error = None;
            }
            Transition::LoginRequired => {
                self.phase = AuthPhase::Unauthenticated;
            }
            Transition::Failed(message) => {
                self.phase = AuthPhase::Errored;
                self.error = Some(message);
            }
            Transition::SignedIn(token) => {
                self.phase = AuthPhase::Authenticated;
                if token.is_some() {
                    self.token = token;
                }
                self.error = None;
            }
            Transition::TokenRefreshed(token) => {
                self.token = Some(token);
            }
            Transition::UserLoaded(user) => {
                self.user = user;
            }
            Transition::LoggedOut => {
                self.phase = AuthPhase::Unauthenticated;
                self.user = None;
                self.token = None;
            }
        }
    }

    /// Collapses the state into what a template needs to decide what to render.
    #[must_use]
    pub fn view(&self) -> AuthView {
        match self.phase {
            AuthPhase::Unconfigured => AuthView::Disabled,
            AuthPhase::Initializing => AuthView::Loading,
            AuthPhase::Errored => {
                AuthView::Error(self.error.clone().unwrap_or_else(|| "unknown error".into()))
            }
            AuthPhase::Unauthenticated => AuthView::SignedOut,
            AuthPhase::Authenticated => AuthView::SignedIn(self.user.clone()),
        }
    }
}

/// Template-facing summary of [`AuthState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthView {
    /// Authentication is not configured; render slides normally.
    Disabled,
    Loading,
    Error(String),
    SignedOut,
    SignedIn(Option<UserProfile>),
}

#![doc = include_str!("../README.md")]

pub mod app;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod pkce;
pub mod refresh;
pub mod state;
pub mod token;

// Re-exports for convenient access
pub use app::{HostApp, use_auth_context};
#[cfg(feature = "keycloak")]
pub use client::{KeycloakClient, LogNavigator, Navigator};
#[cfg(any(test, feature = "testing"))]
pub use client::MockClient;
pub use client::{ClientEvent, InitOptions, OidcClient, Profile};
pub use config::{KeycloakConfig, KeycloakSection, OnLoad, PkceMethod, parse_frontmatter};
pub use context::AuthContext;
pub use error::Error;
#[cfg(feature = "keycloak")]
pub use lifecycle::initialize;
pub use lifecycle::Authenticator;
pub use refresh::{DEFAULT_MIN_VALIDITY, DEFAULT_REFRESH_INTERVAL, RefreshSettings};
pub use state::{AuthPhase, AuthState, AuthView, UserProfile};
pub use token::{TokenClaims, parse_claims};

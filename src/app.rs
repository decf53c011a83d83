use std::sync::{PoisonError, RwLock};

use http::Extensions;

use crate::context::AuthContext;

/// Application-level injection container for the presentation host.
///
/// Values are keyed by type: `provide` publishes one value per type and
/// `inject` hands out clones of it. One `HostApp` per running deck.
#[derive(Debug, Default)]
pub struct HostApp {
    provided: RwLock<Extensions>,
}

impl HostApp {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value`, replacing (and returning) any earlier value of the same type.
    pub fn provide<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.provided
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value)
    }

    #[must_use]
    pub fn inject<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.provided
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get::<T>()
            .cloned()
    }
}

/// The auth context published on `app`, or an inert one if nothing was provided.
///
/// Never fails: decks rendered without authentication get an unauthenticated,
/// initialized context whose actions do nothing.
#[must_use]
pub fn use_auth_context(app: &HostApp) -> AuthContext {
    app.inject::<AuthContext>().unwrap_or_else(|| {
        tracing::trace!("No auth context provided; using inert context");
        AuthContext::inert()
    })
}

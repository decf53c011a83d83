use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Env var consulted when the frontmatter has no `url`.
pub const ENV_URL: &str = "VITE_KEYCLOAK_URL";
/// Env var consulted when the frontmatter has no `realm`.
pub const ENV_REALM: &str = "VITE_KEYCLOAK_REALM";
/// Env var consulted when the frontmatter has no `clientId`.
pub const ENV_CLIENT_ID: &str = "VITE_KEYCLOAK_CLIENT_ID";
/// Env var consulted when the frontmatter has no `redirectUri`.
pub const ENV_REDIRECT_URI: &str = "VITE_KEYCLOAK_REDIRECT_URI";

/// Where the deck dev server listens unless told otherwise.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3030/";

/// What the client does on `init` when no session exists yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnLoad {
    #[default]
    LoginRequired,
    CheckSso,
}

impl OnLoad {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginRequired => "login-required",
            Self::CheckSso => "check-sso",
        }
    }
}

/// PKCE code challenge method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    #[default]
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl PkceMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

/// The raw `keycloak:` block of a deck's frontmatter.
///
/// Every field is optional here; [`KeycloakConfig::resolve`] decides whether
/// enough is present to enable authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct KeycloakSection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub on_load: Option<OnLoad>,
    #[serde(default)]
    pub pkce_method: Option<PkceMethod>,
    #[serde(default)]
    pub check_login_iframe: Option<bool>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

#[derive(Deserialize)]
struct Headmatter {
    #[serde(default)]
    keycloak: Option<KeycloakSection>,
}

/// Extracts the `keycloak:` section from a deck's leading `---` YAML block.
///
/// Returns `Ok(None)` when the deck has no frontmatter or no `keycloak:` key.
///
/// # Errors
///
/// Returns [`Error::Config`] if the frontmatter is not valid YAML.
pub fn parse_frontmatter(markdown: &str) -> Result<Option<KeycloakSection>, Error> {
    let Some(yaml) = frontmatter_block(markdown) else {
        return Ok(None);
    };
    if yaml.trim().is_empty() {
        return Ok(None);
    }
    let headmatter: Headmatter =
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("frontmatter: {e}")))?;
    Ok(headmatter.keycloak)
}

fn frontmatter_block(markdown: &str) -> Option<&str> {
    let text = markdown.trim_start_matches('\u{feff}');
    let mut lines = text.split_inclusive('\n');
    let opening = lines.next()?;
    if opening.trim_end() != "---" {
        return None;
    }

    let start = opening.len();
    let mut end = start;
    for line in lines {
        if line.trim_end() == "---" {
            return Some(&text[start..end]);
        }
        end += line.len();
    }
    None
}

/// Resolved Keycloak settings for one deck.
///
/// Required fields are constructor parameters. A deck without them never
/// produces a `KeycloakConfig` at all, which is how authentication is disabled.
///
/// ```rust,ignore
/// use slides_keycloak::{KeycloakConfig, OnLoad};
///
/// let config = KeycloakConfig::new("https://sso.example.com", "talks", "deck")
///     .with_on_load(OnLoad::CheckSso);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct KeycloakConfig {
    pub(crate) url: String,
    pub(crate) realm: String,
    pub(crate) client_id: String,
    pub(crate) on_load: OnLoad,
    pub(crate) pkce_method: PkceMethod,
    pub(crate) check_login_iframe: bool,
    pub(crate) redirect_uri: String,
}

impl KeycloakConfig {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            realm: realm.into(),
            client_id: client_id.into(),
            on_load: OnLoad::default(),
            pkce_method: PkceMethod::default(),
            check_login_iframe: false,
            redirect_uri: DEFAULT_REDIRECT_URI.into(),
        }
    }

    /// Combines frontmatter with an env lookup.
    ///
    /// A non-empty frontmatter value wins; otherwise `env` is asked for the
    /// matching `VITE_KEYCLOAK_*` variable. Returns `None` if `url`, `realm`
    /// or `clientId` is still missing, which disables authentication.
    pub fn resolve<F>(section: Option<&KeycloakSection>, env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let field = |value: Option<&String>, var: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .or_else(|| env(var).filter(|v| !v.trim().is_empty()))
        };

        let url = field(section.and_then(|s| s.url.as_ref()), ENV_URL)?;
        let realm = field(section.and_then(|s| s.realm.as_ref()), ENV_REALM)?;
        let client_id = field(section.and_then(|s| s.client_id.as_ref()), ENV_CLIENT_ID)?;

        let mut config = Self::new(url, realm, client_id);
        if let Some(redirect_uri) = field(
            section.and_then(|s| s.redirect_uri.as_ref()),
            ENV_REDIRECT_URI,
        ) {
            config = config.with_redirect_uri(redirect_uri);
        }
        if let Some(section) = section {
            if let Some(on_load) = section.on_load {
                config = config.with_on_load(on_load);
            }
            if let Some(method) = section.pkce_method {
                config = config.with_pkce_method(method);
            }
            if let Some(check) = section.check_login_iframe {
                config = config.with_check_login_iframe(check);
            }
        }
        Some(config)
    }

    /// Resolves from the process environment alone.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::resolve(None, |var| std::env::var(var).ok())
    }

    /// Resolves from a deck's frontmatter, falling back to the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the frontmatter is not valid YAML.
    pub fn from_slides(markdown: &str) -> Result<Option<Self>, Error> {
        let section = parse_frontmatter(markdown)?;
        Ok(Self::resolve(section.as_ref(), |var| std::env::var(var).ok()))
    }

    #[must_use]
    pub fn with_on_load(mut self, on_load: OnLoad) -> Self {
        self.on_load = on_load;
        self
    }

    #[must_use]
    pub fn with_pkce_method(mut self, method: PkceMethod) -> Self {
        self.pkce_method = method;
        self
    }

    #[must_use]
    pub fn with_check_login_iframe(mut self, check: bool) -> Self {
        self.check_login_iframe = check;
        self
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    /// Keycloak base URL (without `/realms/...`).
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn on_load(&self) -> OnLoad {
        self.on_load
    }

    #[must_use]
    pub fn pkce_method(&self) -> PkceMethod {
        self.pkce_method
    }

    #[must_use]
    pub fn check_login_iframe(&self) -> bool {
        self.check_login_iframe
    }

    /// Where Keycloak sends the browser back after login.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }
}

//! Configuration: TOML file, then environment overrides
//!
//! Lookup order for the file: explicit path, `TANDEM_CONFIG`, then
//! `<config dir>/tandem/config.toml`. A missing file means defaults.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 10004;
pub const DEFAULT_REDIRECT_PORT: u16 = 10010;
pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_TOKENINFO_URI: &str = "https://oauth2.googleapis.com/tokeninfo";
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
pub const CALENDAR_EVENTS_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TandemConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Overrides the model an agent is defined with
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the Generative Language API base URL
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: None,
            api_base: None,
            max_llm_calls: default_max_llm_calls(),
        }
    }
}

fn default_max_llm_calls() -> usize {
    crate::runtime::runner::DEFAULT_MAX_LLM_CALLS
}

/// OAuth client used by the host side to obtain user tokens
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_port", &self.redirect_port)
            .field("auth_uri", &self.auth_uri)
            .field("token_uri", &self.token_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_port: default_redirect_port(),
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
            scopes: default_scopes(),
        }
    }
}

fn default_redirect_port() -> u16 {
    DEFAULT_REDIRECT_PORT
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![CALENDAR_SCOPE.to_string(), CALENDAR_EVENTS_SCOPE.to_string()]
}

/// How inbound bearer tokens are checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierKind {
    /// Validate against Google's tokeninfo endpoint
    #[default]
    Google,
    /// Accept any well-formed bearer token without checking it
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub verifier: VerifierKind,
    #[serde(default = "default_tokeninfo_url")]
    pub tokeninfo_url: String,
    /// Expected `aud` of inbound tokens, usually the OAuth client id
    #[serde(default)]
    pub audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            verifier: VerifierKind::default(),
            tokeninfo_url: default_tokeninfo_url(),
            audience: None,
        }
    }
}

fn default_tokeninfo_url() -> String {
    GOOGLE_TOKENINFO_URI.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_api")]
    pub api_base: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            api_base: default_calendar_api(),
        }
    }
}

fn default_calendar_api() -> String {
    crate::tools::calendar::DEFAULT_CALENDAR_API.to_string()
}

impl TandemConfig {
    /// Load the config file (if any), then apply environment overrides.
    /// `.env` in the working directory is loaded first.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Ok(dotenv) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", dotenv.display());
        }

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("TANDEM_CONFIG").ok().map(PathBuf::from))
            .or_else(default_config_path);

        let mut config = match path {
            Some(p) if p.exists() => {
                info!("Loading config from {}", p.display());
                Self::from_file(&p)?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Overlay values from the environment. Takes a lookup function so the
    /// overlay can be exercised without touching the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("OAUTH_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.oauth.client_id = id;
        }
        if let Some(secret) = lookup("OAUTH_CLIENT_SECRET").filter(|v| !v.is_empty()) {
            self.oauth.client_secret = secret;
        }
        if let Some(model) = lookup("TANDEM_MODEL").filter(|v| !v.is_empty()) {
            self.llm.model = Some(model);
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tandem").join("config.toml"))
}

/// Credentials for the Gemini provider
#[derive(Clone)]
pub enum LlmCredentials {
    ApiKey(String),
    Vertex {
        project: String,
        location: String,
        access_token: String,
    },
}

impl std::fmt::Debug for LlmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "ApiKey([REDACTED])"),
            Self::Vertex {
                project, location, ..
            } => write!(f, "Vertex({project}, {location})"),
        }
    }
}

impl LlmCredentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Select credentials: Vertex AI when `GOOGLE_GENAI_USE_VERTEXAI` is
    /// `TRUE`, otherwise an API key from `GOOGLE_API_KEY`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if lookup("GOOGLE_GENAI_USE_VERTEXAI").as_deref() == Some("TRUE") {
            let project = lookup("GOOGLE_CLOUD_PROJECT")
                .context("GOOGLE_CLOUD_PROJECT must be set when GOOGLE_GENAI_USE_VERTEXAI is TRUE")?;
            let location = lookup("GOOGLE_CLOUD_LOCATION").unwrap_or_else(|| "us-central1".to_string());
            let access_token = lookup("GOOGLE_CLOUD_ACCESS_TOKEN").context(
                "GOOGLE_CLOUD_ACCESS_TOKEN must be set when GOOGLE_GENAI_USE_VERTEXAI is TRUE",
            )?;
            return Ok(Self::Vertex {
                project,
                location,
                access_token,
            });
        }

        match lookup("GOOGLE_API_KEY").filter(|k| !k.is_empty()) {
            Some(key) => Ok(Self::ApiKey(key)),
            None => bail!(
                "GOOGLE_API_KEY environment variable not set and GOOGLE_GENAI_USE_VERTEXAI is not TRUE."
            ),
        }
    }
}

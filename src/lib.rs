//! `entra-token` acquires app-only access tokens from Microsoft Entra ID
//! using the OAuth2 client credentials grant.
//!
//! The client keeps an in-memory token cache, so a silent lookup should be
//! tried before going to the network:
//!
//! ```no_run
//! use entra_token::{ConfidentialClient, TokenOutcome};
//!
//! let scopes = entra_token::resource_scopes("api://myapp");
//! let client = ConfidentialClient::new(
//!     "client-id",
//!     "https://login.microsoftonline.com/my-tenant",
//!     "app-key",
//! );
//! match entra_token::request_token(&client, &scopes) {
//!     Ok(TokenOutcome::Token { access_token, .. }) => println!("{}", access_token),
//!     Ok(outcome) => println!("{}", entra_token::render_outcome(&outcome)),
//!     Err(e) => eprintln!("{}", e),
//! }
//! ```
//!
//! Structured error bodies from the identity provider (`error`,
//! `error_description`, `correlation_id`) are not transport errors: they come
//! back as [`TokenOutcome::Failure`] so callers can show them to the user.
//! [`AuthError`] is reserved for the cases where no response body was
//! obtained at all.

use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub type Result<T> = std::result::Result<T, AuthError>;

const DISCOVERY_SUFFIX: &str = "/v2.0/.well-known/openid-configuration";
const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";

// Cached tokens this close to expiry are not served silently.
const EXPIRY_MARGIN_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Tenant discovery against the authority failed
    Discovery(String),
    /// The token endpoint could not be reached or returned a non-JSON body
    TokenRequest(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::Discovery(s) => write!(f, "tenant discovery failed: {}", s),
            AuthError::TokenRequest(s) => write!(f, "token request failed: {}", s),
        }
    }
}

/// Narrows a multi-tenant `common` authority to the given tenant.
///
/// Demo shortcut carried over as-is: the check is a literal substring search,
/// and `common` at index 0 or 1 does not trigger the rewrite. Production
/// code would resolve the tenant properly instead.
pub fn normalize_authority(authority: &str, tenant_id: &str) -> String {
    match authority.find("common") {
        Some(index) if index > 1 => {
            let prefix = authority.split("/common").next().unwrap_or(authority);
            format!("{}/{}", prefix, tenant_id)
        }
        _ => authority.to_string(),
    }
}

/// Translates a resource/audience into the one-element `.default` scope list
/// the client credentials grant expects.
pub fn resource_scopes(resource: &str) -> Vec<String> {
    let scope = if resource.ends_with('/') {
        format!("{}.default", resource)
    } else {
        format!("{}/.default", resource)
    };
    vec![scope]
}

/// Token endpoint response. Every field is optional: a success body carries
/// the token fields, an error body the error fields.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
    pub ext_expires_in: Option<u64>,
    pub token_type: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub correlation_id: Option<String>,
}

/// What a token request actually produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenOutcome {
    Token {
        access_token: String,
        expires_in: u64,
    },
    Failure {
        error: Option<String>,
        error_description: Option<String>,
        correlation_id: Option<String>,
    },
}

impl TokenOutcome {
    /// A body without `access_token` is a failure, even if the error fields
    /// are missing too; absent fields surface as `None`.
    fn from_response(response: TokenResponse) -> Self {
        match response.access_token {
            Some(access_token) => TokenOutcome::Token {
                access_token,
                expires_in: response.expires_in.unwrap_or(0),
            },
            None => TokenOutcome::Failure {
                error: response.error,
                error_description: response.error_description,
                correlation_id: response.correlation_id,
            },
        }
    }
}

/// Renders an outcome for stdout: the bare token on success, otherwise three
/// lines (error, error description, correlation id) with absent fields
/// rendered empty.
pub fn render_outcome(outcome: &TokenOutcome) -> String {
    match outcome {
        TokenOutcome::Token { access_token, .. } => access_token.clone(),
        TokenOutcome::Failure {
            error,
            error_description,
            correlation_id,
        } => format!(
            "{}\n{}\n{}",
            error.as_deref().unwrap_or(""),
            error_description.as_deref().unwrap_or(""),
            correlation_id.as_deref().unwrap_or("")
        ),
    }
}

/// The two ways of getting a token. `ConfidentialClient` implements this
/// against Entra ID; tests implement it with stubs.
pub trait TokenAcquirer {
    /// Cache-only lookup. `None` when no unexpired token matches the scopes.
    fn acquire_token_silent(&self, scopes: &[String]) -> Option<TokenOutcome>;

    /// Network acquisition via the client credentials grant.
    fn acquire_token_for_client(&self, scopes: &[String]) -> Result<TokenOutcome>;
}

/// Silent lookup first, network acquisition only on a cache miss.
pub fn request_token<C: TokenAcquirer>(client: &C, scopes: &[String]) -> Result<TokenOutcome> {
    if let Some(outcome) = client.acquire_token_silent(scopes) {
        log::debug!("Token cache: Serving cached token");
        return Ok(outcome);
    }
    log::debug!("Token cache: No suitable token, acquiring a new one");
    client.acquire_token_for_client(scopes)
}

struct CacheEntry {
    access_token: String,
    expires_at: u64,
}

#[derive(Default)]
struct TokenCache {
    entries: HashMap<String, CacheEntry>,
}

impl TokenCache {
    fn key(scopes: &[String]) -> String {
        scopes.join(" ")
    }

    fn lookup(&self, scopes: &[String], now: u64) -> Option<String> {
        let entry = self.entries.get(&Self::key(scopes))?;
        if entry.expires_at > now + EXPIRY_MARGIN_SECS {
            Some(entry.access_token.clone())
        } else {
            None
        }
    }

    fn store(&mut self, scopes: &[String], access_token: &str, expires_in: u64, now: u64) {
        self.entries.insert(
            Self::key(scopes),
            CacheEntry {
                access_token: access_token.to_string(),
                expires_at: now + expires_in,
            },
        );
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Deserialize)]
struct TenantDiscoveryResponse {
    token_endpoint: String,
}

fn discovery_url(authority: &str) -> String {
    format!("{}{}", authority.trim_end_matches('/'), DISCOVERY_SUFFIX)
}

/// A confidential client application, authenticating as itself with a client
/// secret. Construct once per process; the token cache and the discovered
/// token endpoint live as long as the client.
pub struct ConfidentialClient {
    client_id: String,
    authority: String,
    client_secret: String,
    http: reqwest::blocking::Client,
    token_endpoint: RefCell<Option<String>>,
    cache: RefCell<TokenCache>,
}

impl ConfidentialClient {
    pub fn new(client_id: &str, authority: &str, client_secret: &str) -> Self {
        ConfidentialClient {
            client_id: client_id.to_string(),
            authority: authority.to_string(),
            client_secret: client_secret.to_string(),
            http: reqwest::blocking::Client::new(),
            token_endpoint: RefCell::new(None),
            cache: RefCell::new(TokenCache::default()),
        }
    }

    /// Resolves the token endpoint through the authority's OIDC discovery
    /// document, once per client.
    fn token_endpoint(&self) -> Result<String> {
        if let Some(endpoint) = &*self.token_endpoint.borrow() {
            return Ok(endpoint.clone());
        }

        let url = discovery_url(&self.authority);
        log::debug!("Tenant discovery: Fetching {}", url);
        let http_response = self
            .http
            .get(&url)
            .send()
            .map_err(|e| AuthError::Discovery(format!("request to {} failed: {}", url, e)))?;
        let discovery: TenantDiscoveryResponse = http_response
            .json()
            .map_err(|e| AuthError::Discovery(format!("unexpected response from {}: {}", url, e)))?;

        self.token_endpoint
            .replace(Some(discovery.token_endpoint.clone()));
        Ok(discovery.token_endpoint)
    }
}

impl TokenAcquirer for ConfidentialClient {
    fn acquire_token_silent(&self, scopes: &[String]) -> Option<TokenOutcome> {
        let access_token = self.cache.borrow().lookup(scopes, unix_now())?;
        Some(TokenOutcome::Token {
            access_token,
            expires_in: 0,
        })
    }

    fn acquire_token_for_client(&self, scopes: &[String]) -> Result<TokenOutcome> {
        let token_endpoint = self.token_endpoint()?;
        let scope = scopes.join(" ");

        let mut params = HashMap::new();
        params.insert("client_id", self.client_id.as_str());
        params.insert("client_secret", self.client_secret.as_str());
        params.insert("scope", &scope);
        params.insert("grant_type", CLIENT_CREDENTIALS_GRANT);

        log::debug!("Token request: Posting to {}", token_endpoint);
        let http_response = self
            .http
            .post(&token_endpoint)
            .form(&params)
            .send()
            .map_err(|e| AuthError::TokenRequest(format!("request failed: {}", e)))?;
        let response: TokenResponse = http_response
            .json()
            .map_err(|e| AuthError::TokenRequest(format!("failed to parse response: {}", e)))?;

        if let (Some(token), Some(expires_in)) = (&response.access_token, response.expires_in) {
            self.cache
                .borrow_mut()
                .store(scopes, token, expires_in, unix_now());
        }
        Ok(TokenOutcome::from_response(response))
    }
}

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod guard;

pub use guard::{decide, Decision};

/// Any caller, authenticated or not
pub const ROLE_ANY: &str = "*";
/// Explicitly allows unauthenticated callers
pub const ROLE_ANONYMOUS: &str = "anonymous";
/// Any verified caller regardless of role
pub const ROLE_AUTHENTICATED: &str = "authenticated";
/// Bypasses every role check once authenticated
pub const ROLE_ADMIN: &str = "admin";

pub const GUEST: &str = "guest";

/// Caller identity for the lifetime of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub id: String,
    pub role: String,
    pub authenticated: bool,
}

impl Auth {
    /// The unauthenticated caller used when no credential was verified
    pub fn guest() -> Self {
        Self {
            id: GUEST.to_string(),
            role: GUEST.to_string(),
            authenticated: false,
        }
    }

    pub fn authenticated(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            authenticated: true,
        }
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self::guest()
    }
}

impl From<Claims> for Auth {
    fn from(claims: Claims) -> Self {
        Self::authenticated(claims.sub, claims.role)
    }
}

/// Ordered, duplicate-free set of role requirements attached to a route
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roles(Vec<String>);

impl Roles {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::none();
        for role in roles {
            set.insert(role);
        }
        set
    }

    pub fn insert(&mut self, role: impl Into<String>) {
        let role = role.into();
        if !self.0.contains(&role) {
            self.0.push(role);
        }
    }

    /// Roles of `self` followed by the ones `other` adds
    pub fn union(&self, other: &Roles) -> Roles {
        let mut merged = self.clone();
        for role in &other.0 {
            merged.insert(role.clone());
        }
        merged
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.iter().any(|r| r == role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Roles {
    fn from(roles: [S; N]) -> Self {
        Roles::of(roles)
    }
}

impl From<Vec<String>> for Roles {
    fn from(roles: Vec<String>) -> Self {
        Roles::of(roles)
    }
}

impl From<&[&str]> for Roles {
    fn from(roles: &[&str]) -> Self {
        Roles::of(roles.iter().copied())
    }
}

impl std::fmt::Display for Roles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Bearer token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(subject: impl Into<String>, role: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: subject.into(),
            role: role.into(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT secret not configured")]
    MissingSecret,

    #[error("JWT generation error: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid JWT token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

/// Signs an HS256 token carrying `sub` and `role`
pub fn issue_token(
    secret: &str,
    subject: impl Into<String>,
    role: impl Into<String>,
    ttl: Duration,
) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::MissingSecret);
    }
    let claims = Claims::new(subject, role, ttl);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(AuthError::Encode)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::MissingSecret);
    }
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(AuthError::Invalid)?;
    Ok(data.claims)
}

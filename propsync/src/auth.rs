//! Authentication boundary.
//!
//! The server's request interceptor calls an [`Authenticator`] only when one
//! is configured; the store and notifier never look at identities.
//!
//! Role implication is a fixed table:
//! ```text
//!   Admin ──► ApplicationOwner ──► Developer ──► Reader
//! ```
//!
//! A server can load its token table from a [`CredentialSource`], one user
//! per line:
//! ```text
//! # token        user   roles              expires_at (unix secs, optional)
//! 3f9c1d...      alice  application_owner
//! 77ab02...      ci     developer,reader   1893456000
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::model::now_secs;
use crate::retry::{retry_blocking, RetryPolicy, Transient};

/// Closed set of roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Admin,
    ApplicationOwner,
    Developer,
    Reader,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Admin,
        Role::ApplicationOwner,
        Role::Developer,
        Role::Reader,
    ];

    /// Roles granted directly by this one.
    pub fn implies(self) -> &'static [Role] {
        match self {
            Role::Admin => &[Role::ApplicationOwner],
            Role::ApplicationOwner => &[Role::Developer],
            Role::Developer => &[Role::Reader],
            Role::Reader => &[],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::ApplicationOwner => "application_owner",
            Role::Developer => "developer",
            Role::Reader => "reader",
        }
    }

    /// Roles allowed to mutate configuration.
    pub fn can_mutate(roles: &BTreeSet<Role>) -> bool {
        roles.contains(&Role::ApplicationOwner) || roles.contains(&Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRole(s.to_owned()))
    }
}

/// An authenticated user with its transitive role set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_name: String,
    /// Granted roles plus everything they imply
    pub roles: BTreeSet<Role>,
    /// Unix seconds; `None` never expires
    pub expires_at: Option<u64>,
}

impl UserInfo {
    pub fn new(
        user_name: impl Into<String>,
        granted: impl IntoIterator<Item = Role>,
        expires_at: Option<u64>,
    ) -> Self {
        let mut roles = BTreeSet::new();
        let mut pending: Vec<Role> = granted.into_iter().collect();
        while let Some(role) = pending.pop() {
            if roles.insert(role) {
                pending.extend_from_slice(role.implies());
            }
        }

        Self {
            user_name: user_name.into(),
            roles,
            expires_at,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_expired(&self, at: u64) -> bool {
        self.expires_at.is_some_and(|exp| at >= exp)
    }

    pub fn can_mutate(&self) -> bool {
        Role::can_mutate(&self.roles)
    }
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingToken,

    #[error("Invalid credentials")]
    InvalidToken,

    #[error("Credentials of {user_name} expired")]
    Expired { user_name: String },

    #[error("{user_name} lacks the role for this request")]
    Forbidden { user_name: String },

    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    #[error("Malformed credentials: {0}")]
    MalformedCredentials(String),
}

impl Transient for AuthError {
    fn is_transient(&self) -> bool {
        matches!(self, AuthError::CredentialsUnavailable(_))
    }
}

/// Resolves a bearer token to a user.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<UserInfo, AuthError>;
}

/// Check that `token` belongs to a current user allowed to mutate.
pub fn authorize_mutation(
    authenticator: &dyn Authenticator,
    token: Option<&str>,
) -> Result<UserInfo, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    let user = authenticator.authenticate(token)?;
    if user.is_expired(now_secs()) {
        return Err(AuthError::Expired {
            user_name: user.user_name,
        });
    }
    if !user.can_mutate() {
        return Err(AuthError::Forbidden {
            user_name: user.user_name,
        });
    }
    Ok(user)
}

/// Fixed token table, for tests and single-tenant deployments.
#[derive(Default)]
pub struct StaticAuthenticator {
    users: RwLock<HashMap<String, UserInfo>>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a token table, retrying transient read failures.
    pub fn load(source: &CredentialSource, policy: &RetryPolicy) -> Result<Self, AuthError> {
        let auth = Self::new();
        let entries = source.load(policy)?;
        let count = entries.len();
        for (token, user) in entries {
            auth.insert(token, user);
        }
        log::info!("Loaded {count} credentials from {}", source.describe());
        Ok(auth)
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    pub fn with_user(self, token: impl Into<String>, user: UserInfo) -> Self {
        self.insert(token, user);
        self
    }

    pub fn insert(&self, token: impl Into<String>, user: UserInfo) {
        self.users.write().insert(token.into(), user);
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.users.write().remove(token).is_some()
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, token: &str) -> Result<UserInfo, AuthError> {
        self.users
            .read()
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Where the server's token table comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialSource {
    Inline(String),
    File(PathBuf),
}

impl CredentialSource {
    /// Read and parse the table. Only reading is retried; a malformed
    /// table fails at once.
    pub fn load(&self, policy: &RetryPolicy) -> Result<Vec<(String, UserInfo)>, AuthError> {
        match self {
            CredentialSource::Inline(text) => parse_token_table(text),
            CredentialSource::File(path) => {
                let text = retry_blocking(policy, "credential fetch", || {
                    std::fs::read_to_string(path).map_err(|e| {
                        AuthError::CredentialsUnavailable(format!("{}: {e}", path.display()))
                    })
                })?;
                parse_token_table(&text)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            CredentialSource::Inline(_) => "inline table".into(),
            CredentialSource::File(path) => path.display().to_string(),
        }
    }
}

fn parse_token_table(text: &str) -> Result<Vec<(String, UserInfo)>, AuthError> {
    let mut entries = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed =
            |what: String| AuthError::MalformedCredentials(format!("line {}: {what}", n + 1));

        let fields: Vec<&str> = line.split_whitespace().collect();
        let (token, user_name, roles, expires_at) = match fields.as_slice() {
            [token, user, roles] => (*token, *user, *roles, None),
            [token, user, roles, expires] => (*token, *user, *roles, Some(*expires)),
            _ => return Err(malformed("expected `token user roles [expires_at]`".into())),
        };

        let roles = roles
            .split(',')
            .map(str::parse::<Role>)
            .collect::<Result<Vec<Role>, _>>()
            .map_err(|e| malformed(e.to_string()))?;
        let expires_at = expires_at
            .map(|e| e.parse::<u64>())
            .transpose()
            .map_err(|_| malformed("expires_at must be unix seconds".into()))?;

        entries.push((token.to_owned(), UserInfo::new(user_name, roles, expires_at)));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_admin_implies_everything() {
        let user = UserInfo::new("root", [Role::Admin], None);
        for role in Role::ALL {
            assert!(user.has_role(role), "admin should imply {role:?}");
        }
    }

    #[test]
    fn test_developer_cannot_mutate() {
        let dev = UserInfo::new("dev", [Role::Developer], None);
        assert!(dev.has_role(Role::Reader));
        assert!(!dev.has_role(Role::ApplicationOwner));
        assert!(!dev.can_mutate());

        let owner = UserInfo::new("owner", [Role::ApplicationOwner], None);
        assert!(owner.can_mutate());
        assert!(owner.has_role(Role::Developer));
        assert!(!owner.has_role(Role::Admin));
    }

    #[test]
    fn test_expiry() {
        let user = UserInfo::new("temp", [Role::Reader], Some(100));
        assert!(!user.is_expired(99));
        assert!(user.is_expired(100));
        assert!(!UserInfo::new("forever", Vec::new(), None).is_expired(u64::MAX));
    }

    #[test]
    fn test_authorize_mutation() {
        let auth = StaticAuthenticator::new()
            .with_user("owner", UserInfo::new("o", [Role::ApplicationOwner], None))
            .with_user("reader", UserInfo::new("r", [Role::Reader], None))
            .with_user("stale", UserInfo::new("s", [Role::Admin], Some(1)));

        assert!(authorize_mutation(&auth, Some("owner")).is_ok());
        assert_eq!(
            authorize_mutation(&auth, None),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            authorize_mutation(&auth, Some("bogus")),
            Err(AuthError::InvalidToken)
        );
        assert!(matches!(
            authorize_mutation(&auth, Some("reader")),
            Err(AuthError::Forbidden { .. })
        ));
        assert!(matches!(
            authorize_mutation(&auth, Some("stale")),
            Err(AuthError::Expired { .. })
        ));

        assert!(auth.revoke("owner"));
        assert!(authorize_mutation(&auth, Some("owner")).is_err());
    }

    #[test]
    fn test_role_names_parse() {
        for role in Role::ALL {
            assert_eq!(role.name().parse::<Role>(), Ok(role));
        }
        assert_eq!("Admin".parse::<Role>(), Ok(Role::Admin));
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_credentials_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens");
        std::fs::write(
            &path,
            "# deploy tokens\n\nt-owner alice application_owner\nt-ci ci developer,reader 100\n",
        )
        .unwrap();

        let auth =
            StaticAuthenticator::load(&CredentialSource::File(path), &RetryPolicy::never()).unwrap();
        assert_eq!(auth.len(), 2);
        assert!(authorize_mutation(&auth, Some("t-owner")).is_ok());

        let ci = auth.authenticate("t-ci").unwrap();
        assert_eq!(ci.user_name, "ci");
        assert_eq!(ci.expires_at, Some(100));
        assert!(!ci.can_mutate());
    }

    #[test]
    fn test_malformed_table_rejected() {
        let policy = RetryPolicy::never();
        for text in ["lonely", "t u wizard", "t u reader soon"] {
            let err = CredentialSource::Inline(text.into()).load(&policy).unwrap_err();
            assert!(matches!(err, AuthError::MalformedCredentials(_)), "{text}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_missing_credentials_give_up() {
        let dir = tempfile::tempdir().unwrap();
        let policy = RetryPolicy::new(Duration::from_millis(1), Some(3));
        let err = CredentialSource::File(dir.path().join("absent"))
            .load(&policy)
            .unwrap_err();
        assert!(matches!(err, AuthError::CredentialsUnavailable(_)));
    }
}

use crate::auth::string::SecretString;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// One service's cached credentials
///
/// Lives only in memory for the life of the kernel process; nothing here is
/// ever flushed back to disk by the cache itself.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the token is within `leeway` of its expiry
    ///
    /// Tokens close to expiring are treated as expired so a token cannot
    /// die between the check and its use.
    pub fn is_expired(&self, leeway: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + leeway >= expires_at,
            None => false,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// An in-memory cache of credentials hydrated from the OS keychain.
///
/// This avoids hitting the OS keychain repeatedly during operations.
/// It works in tandem with `AuthStore`.
#[derive(Default)]
pub struct CredentialCache {
    entries: Mutex<HashMap<String, Credential>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service: &str) -> Option<Credential> {
        let entries = self.entries.lock().expect("credential cache lock poisoned");
        entries.get(service).cloned()
    }

    pub fn insert(&self, service: &str, credential: Credential) {
        let mut entries = self.entries.lock().expect("credential cache lock poisoned");
        entries.insert(service.to_string(), credential);
    }

    pub fn remove(&self, service: &str) {
        let mut entries = self.entries.lock().expect("credential cache lock poisoned");
        entries.remove(service);
    }

    pub fn contains(&self, service: &str) -> bool {
        let entries = self.entries.lock().expect("credential cache lock poisoned");
        entries.contains_key(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_in_secs: Option<i64>) -> Credential {
        Credential {
            access_token: SecretString::new("tok"),
            refresh_token: None,
            expires_at: expires_in_secs.map(|s| Utc::now() + Duration::seconds(s)),
            scopes: vec!["registry:write".to_string()],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_expiry_with_leeway() {
        let leeway = Duration::seconds(60);
        assert!(credential(Some(30)).is_expired(leeway));
        assert!(!credential(Some(3600)).is_expired(leeway));
        assert!(credential(Some(-10)).is_expired(leeway));
    }

    #[test]
    fn test_no_expiry_never_expires() {
        assert!(!credential(None).is_expired(Duration::seconds(60)));
    }

    #[test]
    fn test_scope_check() {
        let cred = credential(None);
        assert!(cred.has_scope("registry:write"));
        assert!(!cred.has_scope("registry:read"));
    }

    #[test]
    fn test_cache_round_trip() {
        let cache = CredentialCache::new();
        assert!(cache.get("supabase").is_none());
        cache.insert("supabase", credential(None));
        assert!(cache.contains("supabase"));
        assert_eq!(cache.get("supabase").unwrap().access_token.unsecure(), "tok");
        cache.remove("supabase");
        assert!(!cache.contains("supabase"));
    }
}

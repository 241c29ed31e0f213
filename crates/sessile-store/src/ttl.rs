//! TTL policy for session expiration.

use std::fmt;
use std::sync::Arc;

use crate::record::SessionData;
use crate::store::SessionStore;

/// Fallback TTL when neither configuration nor cookie supplies one.
pub const ONE_DAY_SECS: u64 = 86_400;

/// Caller-supplied TTL function.
///
/// Receives the store (for policy lookups), the payload being written and the
/// session id. Must be synchronous and free of side effects.
pub type TtlResolver = Arc<dyn Fn(&SessionStore, &SessionData, Option<&str>) -> u64 + Send + Sync>;

/// How many seconds a session lives after each save or touch.
#[derive(Clone, Default)]
pub enum TtlPolicy {
    /// Constant number of seconds.
    Fixed(u64),

    /// Computed per session by a caller-supplied function.
    Resolver(TtlResolver),

    /// Derived from the cookie's max-age, one day when absent.
    #[default]
    CookieDerived,
}

impl TtlPolicy {
    /// Build a resolver policy from a closure.
    pub fn resolver<F>(f: F) -> Self
    where
        F: Fn(&SessionStore, &SessionData, Option<&str>) -> u64 + Send + Sync + 'static,
    {
        Self::Resolver(Arc::new(f))
    }

    /// Seconds-to-live for `session`.
    pub fn resolve(&self, store: &SessionStore, session: &SessionData, sid: Option<&str>) -> u64 {
        match self {
            Self::Fixed(secs) => *secs,
            Self::Resolver(f) => f(store, session, sid),
            Self::CookieDerived => cookie_ttl(session),
        }
    }
}

/// `floor(maxAge / 1000)`, clamped at zero for already-expired cookies.
fn cookie_ttl(session: &SessionData) -> u64 {
    match session.cookie.max_age {
        Some(ms) => u64::try_from(ms.div_euclid(1000)).unwrap_or(0),
        None => ONE_DAY_SECS,
    }
}

impl fmt::Debug for TtlPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(secs) => f.debug_tuple("Fixed").field(secs).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
            Self::CookieDerived => f.write_str("CookieDerived"),
        }
    }
}

//! Per-DN authorization state established by a bind and read by searches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::api::model::{Session, User};
use crate::dn;

/// Primary key used before the user behind a DN is known.
pub const INVALID_USER_PK: i32 = -1;

/// What a successful bind established for a DN.
#[derive(Debug, Clone, PartialEq)]
pub struct UserFlags {
    /// User record, kept once fetched.
    pub user: Option<User>,
    pub user_pk: i32,
    /// Whether the user may search the whole directory.
    pub can_search: bool,
    pub session: Option<Session>,
}

impl Default for UserFlags {
    fn default() -> Self {
        Self {
            user: None,
            user_pk: INVALID_USER_PK,
            can_search: false,
            session: None,
        }
    }
}

/// Bound DNs of one provider. Binds and unbinds write, searches read.
///
/// Shared between successive instances of the same provider so sessions
/// survive a refresh.
#[derive(Debug, Default)]
pub struct BoundUsers {
    users: RwLock<HashMap<String, UserFlags>>,
}

impl BoundUsers {
    pub async fn get(&self, bind_dn: &str) -> Option<UserFlags> {
        self.users.read().await.get(&dn::normalize(bind_dn)).cloned()
    }

    /// Update the flags of `bind_dn`, creating them first if needed.
    pub async fn update<F>(&self, bind_dn: &str, update: F)
    where
        F: FnOnce(&mut UserFlags),
    {
        let mut users = self.users.write().await;
        update(users.entry(dn::normalize(bind_dn)).or_default());
    }

    pub async fn remove(&self, bind_dn: &str) -> Option<UserFlags> {
        self.users.write().await.remove(&dn::normalize(bind_dn))
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Forget `bind_dn` once `delay` has elapsed. Not cancellable; a bind in
    /// the meantime simply writes fresh flags that are then dropped too.
    pub fn evict_later(self: &Arc<Self>, bind_dn: &str, delay: Duration) {
        let users = Arc::clone(self);
        let bind_dn = bind_dn.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if users.remove(&bind_dn).await.is_some() {
                tracing::trace!(%bind_dn, "evicted bound user");
            }
        });
    }
}

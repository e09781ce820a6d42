use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use ulid::Ulid;

use crate::engine::{Store, StoreError};
use crate::model::Actor;

/// Shared cleartext password for every login. Who the caller is comes from
/// the user name, see [`resolve_actor`].
#[derive(Debug)]
pub struct VenuebookAuthSource {
    password: String,
}

impl VenuebookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for VenuebookAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// The admin user name is the system actor; any other name must be the id
/// of an active account. `None` means anonymous.
pub async fn resolve_actor(
    user: Option<&str>,
    admin_user: &str,
    store: &dyn Store,
) -> Result<Option<Actor>, StoreError> {
    let Some(user) = user else { return Ok(None) };
    if user == admin_user {
        return Ok(Some(Actor::System));
    }
    let Ok(id) = Ulid::from_string(user) else {
        return Ok(None);
    };
    Ok(store
        .find_account(id)
        .await?
        .filter(|a| a.is_active())
        .map(Actor::Account))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryStore;
    use crate::model::{Account, AccountStatus, Role};

    #[tokio::test]
    async fn user_names_map_to_actors() {
        let store = MemoryStore::ephemeral();
        let active = Account {
            id: Ulid::new(),
            email: "guest@example.com".into(),
            role: Role::Member,
            status: AccountStatus::Active,
        };
        let gone = Account {
            id: Ulid::new(),
            status: AccountStatus::Deleted,
            ..active.clone()
        };
        store.upsert_account(active.clone()).await.unwrap();
        store.upsert_account(gone.clone()).await.unwrap();

        assert_eq!(resolve_actor(Some("ops"), "ops", &store).await.unwrap(), Some(Actor::System));
        assert_eq!(
            resolve_actor(Some(&active.id.to_string()), "ops", &store).await.unwrap(),
            Some(Actor::Account(active))
        );
        assert_eq!(resolve_actor(Some(&gone.id.to_string()), "ops", &store).await.unwrap(), None);
        assert_eq!(resolve_actor(Some("someone"), "ops", &store).await.unwrap(), None);
        assert_eq!(resolve_actor(None, "ops", &store).await.unwrap(), None);
    }
}

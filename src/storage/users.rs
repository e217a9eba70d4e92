//! Users, their settings and their local credentials.

use crate::error::Error;
use crate::identifier::Identifier;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

const USER_PREFIX: &str = "user-";
const AUTH_PREFIX: &str = "auth-";

fn user_key(id: &Identifier) -> String {
    format!("{USER_PREFIX}{id}")
}

fn auth_key(id: &Identifier) -> String {
    format!("{AUTH_PREFIX}{id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default = "UserSettings::default_language")]
    pub language: String,
    #[serde(default)]
    pub newsletter: bool,
    /// How much inline help the zone editor shows, 0 (none) to 2 (all).
    #[serde(default = "UserSettings::default_field_hint")]
    pub field_hint: u8,
    #[serde(default)]
    pub zone_view: u8,
}

impl UserSettings {
    fn default_language() -> String {
        "en".to_string()
    }

    fn default_field_hint() -> u8 {
        2
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            language: Self::default_language(),
            newsletter: false,
            field_hint: Self::default_field_hint(),
            zone_view: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "Id")]
    pub id: Identifier,
    #[serde(alias = "Email")]
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
    #[serde(default)]
    pub settings: UserSettings,
}

impl User {
    /// A user whose identifier derives from the address, as external authentication requires.
    #[must_use]
    pub fn from_email(email: &str) -> Self {
        Self {
            id: Identifier::from_email(email),
            email: email.to_string(),
            created_at: OffsetDateTime::now_utc(),
            last_seen: None,
            settings: UserSettings::default(),
        }
    }
}

/// Credentials of a locally authenticated user. The password is stored as the caller's hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAuth {
    pub id: Identifier,
    pub email: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub email_verification: Option<OffsetDateTime>,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_recovery_key: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub allow_commercials: bool,
}

impl Storage {
    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] if no such user exists.
    pub async fn get_user(&self, id: &Identifier) -> Result<User, Error> {
        self.get_json(&user_key(id)).await?.ok_or(Error::UserNotFound)
    }

    /// # Errors
    ///
    /// Returns [`Error::UserNotFound`] if no user has this address.
    pub async fn get_user_by_email(&self, email: &str) -> Result<User, Error> {
        self.list_users()
            .await?
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .ok_or(Error::UserNotFound)
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_users(&self) -> Result<Vec<User>, Error> {
        Ok(self
            .search_json::<User>(USER_PREFIX)
            .await?
            .into_iter()
            .map(|(_, u)| u)
            .collect())
    }

    /// Store `user`, giving it a fresh identifier if it has none.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn create_or_update_user(&self, user: &mut User) -> Result<(), Error> {
        if user.id.is_empty() {
            let (key, id) = self.kv().find_identifier_key(USER_PREFIX).await?;
            user.id = id;
            info!(id = %user.id, "creating user");
            return self.put_json(&key, user).await;
        }
        self.put_json(&user_key(&user.id), user).await
    }

    /// Replace the settings of `user_id` on behalf of `acting_user`. Users may only change their
    /// own settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Forbidden`] when `acting_user` isn't `user_id` and
    /// [`Error::UserNotFound`] when the user doesn't exist.
    pub async fn update_user_settings(
        &self,
        acting_user: &Identifier,
        user_id: &Identifier,
        settings: UserSettings,
    ) -> Result<User, Error> {
        if acting_user != user_id {
            return Err(Error::Forbidden);
        }
        let mut user = self.get_user(user_id).await?;
        user.settings = settings;
        self.put_json(&user_key(user_id), &user).await?;
        Ok(user)
    }

    /// Delete a user and its credentials and sessions.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_user(&self, id: &Identifier) -> Result<(), Error> {
        self.delete_user_sessions(id).await?;
        self.kv().delete(&auth_key(id)).await?;
        self.kv().delete(&user_key(id)).await
    }

    /// # Errors
    ///
    /// Returns [`Error::AuthUserNotFound`] if no credentials are stored for `id`.
    pub async fn get_auth_user(&self, id: &Identifier) -> Result<UserAuth, Error> {
        self.get_json(&auth_key(id))
            .await?
            .ok_or(Error::AuthUserNotFound)
    }

    /// # Errors
    ///
    /// Returns [`Error::AuthUserNotFound`] if no credentials use this address.
    pub async fn get_auth_user_by_email(&self, email: &str) -> Result<UserAuth, Error> {
        self.list_auth_users()
            .await?
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .ok_or(Error::AuthUserNotFound)
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_auth_users(&self) -> Result<Vec<UserAuth>, Error> {
        Ok(self
            .search_json::<UserAuth>(AUTH_PREFIX)
            .await?
            .into_iter()
            .map(|(_, u)| u)
            .collect())
    }

    /// Store credentials, giving them a fresh identifier if they have none.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn create_or_update_auth_user(&self, auth: &mut UserAuth) -> Result<(), Error> {
        if auth.id.is_empty() {
            let (key, id) = self.kv().find_identifier_key(AUTH_PREFIX).await?;
            auth.id = id;
            return self.put_json(&key, auth).await;
        }
        self.put_json(&auth_key(&auth.id), auth).await
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_auth_user(&self, id: &Identifier) -> Result<(), Error> {
        self.kv().delete(&auth_key(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> User {
        User {
            id: Identifier::default(),
            email: email.into(),
            created_at: OffsetDateTime::now_utc(),
            last_seen: None,
            settings: UserSettings::default(),
        }
    }

    #[tokio::test]
    async fn users_get_identifiers_and_are_found_by_email() {
        let storage = Storage::in_memory();
        let mut alice = user("alice@example.com");
        storage.create_or_update_user(&mut alice).await.unwrap();
        assert!(!alice.id.is_empty());

        assert_eq!(storage.get_user(&alice.id).await.unwrap(), alice);
        assert_eq!(
            storage.get_user_by_email("Alice@Example.com").await.unwrap().id,
            alice.id
        );
        assert!(matches!(
            storage.get_user(&Identifier::from_bytes(vec![9])).await,
            Err(Error::UserNotFound)
        ));

        storage.delete_user(&alice.id).await.unwrap();
        assert!(storage.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_the_user_updates_its_settings() {
        let storage = Storage::in_memory();
        let mut alice = user("alice@example.com");
        let mut bob = user("bob@example.com");
        storage.create_or_update_user(&mut alice).await.unwrap();
        storage.create_or_update_user(&mut bob).await.unwrap();

        let settings = UserSettings {
            language: "fr".into(),
            ..UserSettings::default()
        };
        assert!(matches!(
            storage
                .update_user_settings(&bob.id, &alice.id, settings.clone())
                .await,
            Err(Error::Forbidden)
        ));
        let updated = storage
            .update_user_settings(&alice.id, &alice.id, settings)
            .await
            .unwrap();
        assert_eq!(updated.settings.language, "fr");
    }

    #[tokio::test]
    async fn auth_users() {
        let storage = Storage::in_memory();
        let mut auth = UserAuth {
            id: Identifier::default(),
            email: "alice@example.com".into(),
            email_verification: None,
            password: "hash".into(),
            password_recovery_key: None,
            created_at: OffsetDateTime::now_utc(),
            last_login_at: None,
            allow_commercials: false,
        };
        storage.create_or_update_auth_user(&mut auth).await.unwrap();
        assert_eq!(
            storage.get_auth_user_by_email("alice@example.com").await.unwrap(),
            auth
        );
        storage.delete_auth_user(&auth.id).await.unwrap();
        assert!(matches!(
            storage.get_auth_user(&auth.id).await,
            Err(Error::AuthUserNotFound)
        ));
    }

    #[test]
    fn settings_default_when_missing() {
        let u: User = serde_json::from_str(
            r#"{"Id":"05","Email":"a@b","created_at":"2020-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(u.id, Identifier::from_bytes(vec![5]));
        assert_eq!(u.settings, UserSettings::default());
    }
}

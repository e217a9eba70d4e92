use crate::error::Error;
use crate::identifier::Identifier;
use crate::storage::Storage;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub(crate) const SESSION_PREFIX: &str = "user.session-";

/// A login session. The content is opaque to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub id_user: Identifier,
    #[serde(default)]
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(D::Error::custom)
    }
}

impl Session {
    /// A session for `user` valid for `lifetime`, with a fresh random id.
    #[must_use]
    pub fn new(user: Identifier, lifetime: time::Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: URL_SAFE_NO_PAD.encode(Identifier::new_random().as_bytes()),
            id_user: user,
            description: String::new(),
            issued_at: now,
            expires_at: now + lifetime,
            modified_at: now,
            content: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

fn session_key(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}

impl Storage {
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if no such session exists.
    pub async fn get_session(&self, id: &str) -> Result<Session, Error> {
        self.get_json(&session_key(id))
            .await?
            .ok_or(Error::SessionNotFound)
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, Error> {
        Ok(self
            .search_json::<Session>(SESSION_PREFIX)
            .await?
            .into_iter()
            .map(|(_, s)| s)
            .collect())
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn list_user_sessions(&self, user: &Identifier) -> Result<Vec<Session>, Error> {
        Ok(self
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| s.id_user == *user)
            .collect())
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn update_session(&self, session: &Session) -> Result<(), Error> {
        self.put_json(&session_key(&session.id), session).await
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_session(&self, id: &str) -> Result<(), Error> {
        self.kv().delete(&session_key(id)).await
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn delete_user_sessions(&self, user: &Identifier) -> Result<(), Error> {
        for session in self.list_user_sessions(user).await? {
            self.delete_session(&session.id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_per_user() {
        let storage = Storage::in_memory();
        let alice = Identifier::from_bytes(vec![1]);
        let bob = Identifier::from_bytes(vec![2]);
        let mut mine = Session::new(alice.clone(), time::Duration::hours(1));
        mine.content = b"{\"oidc-state\":\"x\"}".to_vec();
        storage.update_session(&mine).await.unwrap();
        storage
            .update_session(&Session::new(alice.clone(), time::Duration::hours(1)))
            .await
            .unwrap();
        storage
            .update_session(&Session::new(bob.clone(), time::Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(storage.get_session(&mine.id).await.unwrap(), mine);
        assert_eq!(storage.list_user_sessions(&alice).await.unwrap().len(), 2);
        storage.delete_user_sessions(&alice).await.unwrap();
        assert_eq!(storage.list_sessions().await.unwrap().len(), 1);
        assert!(matches!(
            storage.get_session(&mine.id).await,
            Err(Error::SessionNotFound)
        ));
    }

    #[test]
    fn content_is_base64() {
        let mut session = Session::new(Identifier::from_bytes(vec![1]), time::Duration::ZERO);
        session.content = b"hi".to_vec();
        let v = serde_json::to_value(&session).unwrap();
        assert_eq!(v["content"], "aGk=");
        assert!(session.is_expired(OffsetDateTime::now_utc()));
    }
}

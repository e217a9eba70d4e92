use crate::error::Error;
use crate::identifier::Identifier;
use crate::storage::checks::Timestamp;
use crate::storage::Storage;
use time::OffsetDateTime;

const INSIGHTS_KEY: &str = "insights";
const INSTANCE_ID_KEY: &str = "insights.instance-id";

impl Storage {
    /// This instance's identifier for usage reports, created on first use.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn insights_instance_id(&self) -> Result<Identifier, Error> {
        if let Some(id) = self.get_json(INSTANCE_ID_KEY).await? {
            return Ok(id);
        }
        let id = Identifier::new_random();
        self.put_json(INSTANCE_ID_KEY, &id).await?;
        Ok(id)
    }

    /// When the last usage report was sent, if ever.
    ///
    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn last_insights_run(&self) -> Result<Option<OffsetDateTime>, Error> {
        Ok(self
            .get_json::<Timestamp>(INSIGHTS_KEY)
            .await?
            .map(|t| t.0))
    }

    /// # Errors
    ///
    /// Fails if the backend does.
    pub async fn set_last_insights_run(&self, at: OffsetDateTime) -> Result<(), Error> {
        self.put_json(INSIGHTS_KEY, &Timestamp(at)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn instance_id_is_stable() {
        let storage = Storage::in_memory();
        let id = storage.insights_instance_id().await.unwrap();
        assert_eq!(storage.insights_instance_id().await.unwrap(), id);

        assert!(storage.last_insights_run().await.unwrap().is_none());
        let at = time::macros::datetime!(2024-01-02 03:04:05 UTC);
        storage.set_last_insights_run(at).await.unwrap();
        assert_eq!(storage.last_insights_run().await.unwrap(), Some(at));
    }
}

use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Notebook, "notebook", {
    owner_id: String,
    title: String,
    description: Option<String>,
    language: String,
    tone: String,
    max_context_tokens: u32,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

impl Notebook {
    pub fn new(owner_id: String, title: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            title,
            description,
            language: "en".to_string(),
            tone: "neutral".to_string(),
            max_context_tokens: 4096,
            deleted_at: None,
        }
    }

    /// Fetch a notebook the given user owns. Cross-tenant access and deleted
    /// notebooks surface as NotFound so existence is never leaked.
    pub async fn get_owned(
        id: &str,
        owner_id: &str,
        db: &SurrealDbClient,
        include_deleted: bool,
    ) -> Result<Self, AppError> {
        let notebook: Option<Self> = db.get_item(id).await?;

        let notebook = notebook
            .filter(|n| n.owner_id == owner_id)
            .filter(|n| include_deleted || n.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound(format!("Notebook {id} not found")))?;

        Ok(notebook)
    }

    pub async fn list_by_owner(owner_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let notebooks: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM notebook WHERE owner_id = $owner_id AND deleted_at IS NONE ORDER BY created_at DESC",
            )
            .bind(("owner_id", owner_id.to_string()))
            .await?
            .take(0)?;
        Ok(notebooks)
    }

    pub async fn update_details(
        id: &str,
        owner_id: &str,
        title: Option<String>,
        description: Option<String>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut notebook = Self::get_owned(id, owner_id, db, false).await?;

        if let Some(title) = title {
            notebook.title = title;
        }
        if description.is_some() {
            notebook.description = description;
        }
        notebook.updated_at = Utc::now();

        let updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .content(notebook)
            .await?;

        updated.ok_or_else(|| AppError::NotFound(format!("Notebook {id} not found")))
    }

    /// Soft delete. Idempotent: deleting an already-deleted notebook is a no-op.
    pub async fn soft_delete(id: &str, owner_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        let notebook = Self::get_owned(id, owner_id, db, true).await?;
        if notebook.deleted_at.is_some() {
            return Ok(());
        }

        let _updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .patch(PatchOp::replace(
                "/deleted_at",
                surrealdb::sql::Datetime::from(Utc::now()),
            ))
            .await?;
        Ok(())
    }

    /// Reverse a soft delete. Idempotent on non-deleted notebooks.
    pub async fn restore(id: &str, owner_id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let notebook = Self::get_owned(id, owner_id, db, true).await?;
        if notebook.deleted_at.is_none() {
            return Ok(notebook);
        }

        let updated: Option<Self> = db
            .client
            .update((Self::table_name(), id))
            .patch(PatchOp::replace("/deleted_at", None::<surrealdb::sql::Datetime>))
            .await?;

        updated.ok_or_else(|| AppError::NotFound(format!("Notebook {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_cross_tenant_access_is_not_found() {
        let db = test_db().await;

        let notebook = Notebook::new("owner".into(), "Physics".into(), None);
        let id = notebook.id.clone();
        db.store_item(notebook).await.expect("store");

        let result = Notebook::get_owned(&id, "intruder", &db, false).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let owned = Notebook::get_owned(&id, "owner", &db, false).await;
        assert!(owned.is_ok());
    }

    #[tokio::test]
    async fn test_soft_delete_excludes_from_listing() {
        let db = test_db().await;

        let keep = Notebook::new("owner".into(), "Keep".into(), None);
        let drop = Notebook::new("owner".into(), "Drop".into(), None);
        let drop_id = drop.id.clone();
        db.store_item(keep).await.expect("store keep");
        db.store_item(drop).await.expect("store drop");

        Notebook::soft_delete(&drop_id, "owner", &db)
            .await
            .expect("soft delete");

        let listed = Notebook::list_by_owner("owner", &db).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Keep");

        // Reads exclude it too.
        let read = Notebook::get_owned(&drop_id, "owner", &db, false).await;
        assert!(matches!(read, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let db = test_db().await;

        let notebook = Notebook::new("owner".into(), "Cycle".into(), None);
        let id = notebook.id.clone();
        db.store_item(notebook).await.expect("store");

        Notebook::soft_delete(&id, "owner", &db)
            .await
            .expect("delete");
        // Deleting again is a no-op, not an error.
        Notebook::soft_delete(&id, "owner", &db)
            .await
            .expect("repeat delete");

        let restored = Notebook::restore(&id, "owner", &db).await.expect("restore");
        assert!(restored.deleted_at.is_none());

        let again = Notebook::restore(&id, "owner", &db).await.expect("restore again");
        assert!(again.deleted_at.is_none());

        let listed = Notebook::list_by_owner("owner", &db).await.expect("list");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_update_details_changes_title() {
        let db = test_db().await;

        let notebook = Notebook::new("owner".into(), "Old".into(), None);
        let id = notebook.id.clone();
        db.store_item(notebook).await.expect("store");

        let updated = Notebook::update_details(&id, "owner", Some("New".into()), None, &db)
            .await
            .expect("update");
        assert_eq!(updated.title, "New");

        let fetched: Notebook = db.get_item(&id).await.expect("get").expect("present");
        assert_eq!(fetched.title, "New");
    }
}

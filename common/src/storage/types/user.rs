use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(User, "user", {
    email: String,
    password: Option<String>,
    full_name: Option<String>,
    api_key: Option<String>,
    verified: bool,
    active: bool,
    plan: String,
    daily_rate_limit: u32,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<DateTime<Utc>>
});

impl User {
    pub fn new(email: String, password: Option<String>, full_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            email,
            password,
            full_name,
            api_key: None,
            verified: false,
            active: true,
            plan: "free".to_string(),
            daily_rate_limit: 100,
            deleted_at: None,
        }
    }

    pub async fn find_by_email(
        email: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<Self> = db
            .client
            .query("SELECT * FROM user WHERE email = $email AND deleted_at IS NONE LIMIT 1")
            .bind(("email", email.to_string()))
            .await?
            .take(0)?;
        Ok(user)
    }

    pub async fn find_by_api_key(
        api_key: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let user: Option<Self> = db
            .client
            .query("SELECT * FROM user WHERE api_key = $api_key AND deleted_at IS NONE LIMIT 1")
            .bind(("api_key", api_key.to_string()))
            .await?
            .take(0)?;
        Ok(user)
    }

    pub async fn set_api_key(id: &str, db: &SurrealDbClient) -> Result<String, AppError> {
        let api_key = format!("sk_{}", Uuid::new_v4().to_string().replace('-', ""));

        db.client
            .query("UPDATE type::thing('user', $id) SET api_key = $api_key, updated_at = time::now()")
            .bind(("id", id.to_string()))
            .bind(("api_key", api_key.clone()))
            .await?
            .check()?;

        Ok(api_key)
    }
}

/// Database row types — these map directly to SQLite rows.
/// Distinct from worklink-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub created_at: String,
}

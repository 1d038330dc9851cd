use chrono::{DateTime, Utc};
use serde::Serialize;

/**
 * A poll as stored in the `polls` table
 */
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Poll {
    pub id: i32,
    pub text: String,
    pub pub_date: DateTime<Utc>,
}

/**
 * One selectable answer to a poll, carrying the running tally
 *
 * `votes` starts at zero and is only ever incremented, one per vote request.
 */
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Choice {
    pub id: i32,
    pub poll_id: i32,
    pub text: String,
    pub votes: i32,
}

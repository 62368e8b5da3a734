use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Ad {
    pub id: String,
    pub image_url: String,
    pub target_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdListResponse {
    pub ads: Vec<Ad>,
    pub total: usize,
}

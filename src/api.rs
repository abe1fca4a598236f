//! Thin typed client for the backend's plain REST collaborators: the lookups
//! a session needs before it can submit (users, models, roles, questions).
//!
//! The streaming endpoints live in [`crate::sse`]; everything here is a
//! single request/response pair.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};

/// A participant account.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub total_answers: u64,
    #[serde(default)]
    pub avg_score: f64,
}

impl User {
    /// Preferred display name: nickname when set, username otherwise.
    pub fn label(&self) -> &str {
        if self.nickname.is_empty() { &self.username } else { &self.nickname }
    }
}

/// A configured scoring model. API keys never cross this boundary; the
/// backend only reports whether one is set.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AiModel {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub has_api_key: bool,
}

/// An interviewer role preset.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AiRole {
    pub id: u64,
    pub role_key: String,
    pub name: String,
    #[serde(default)]
    pub difficulty_level: String,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Question {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub sub_category_name: String,
    #[serde(default)]
    pub standard_answer: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// List endpoints answer either a bare array or a paginated
/// `{"results": [...]}` wrapper depending on backend settings; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Paginated { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Paginated { results } => results,
            ListResponse::Plain(items) => items,
        }
    }
}

/// REST client bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        ApiClient { client, base_url }
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        self.get_list("/users/").await
    }

    pub async fn get_ai_models(&self) -> Result<Vec<AiModel>> {
        self.get_list("/ai-models/").await
    }

    pub async fn get_ai_roles(&self) -> Result<Vec<AiRole>> {
        self.get_list("/ai-roles/").await
    }

    pub async fn get_question(&self, id: u64) -> Result<Question> {
        self.get_one(&format!("/questions/{}/", id)).await
    }

    /// A random question, optionally limited to one category.
    pub async fn get_random_question(&self, category: Option<u64>) -> Result<Question> {
        let path = match category {
            Some(id) => format!("/questions/random/?category={}", id),
            None => "/questions/random/".to_string(),
        };
        self.get_one(&path).await
    }

    async fn get_one<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::from_response(response).await);
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let list: ListResponse<T> = self.get_one(path).await?;
        Ok(list.into_vec())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;
use uuid::Uuid;

/// Kind of user interaction with a post
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Click,
    Like,
    Share,
    Skip,
    SearchClick,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::View => "view",
            Action::Click => "click",
            Action::Like => "like",
            Action::Share => "share",
            Action::Skip => "skip",
            Action::SearchClick => "search_click",
        };
        write!(f, "{}", name)
    }
}

/// Interaction as submitted by the site front-end
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionRequest {
    pub user_id: Option<String>,
    pub post_id: String,
    pub action: Action,
    pub context: Option<Map<String, Value>>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A recorded interaction event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub id: Uuid,
    pub user_id: String,
    pub post_id: String,
    pub action: Action,
    pub context: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<InteractionRequest> for Interaction {
    fn from(request: InteractionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: request.user_id.unwrap_or_else(|| "anonymous".to_string()),
            post_id: request.post_id,
            action: request.action,
            context: request.context.unwrap_or_default(),
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

impl Interaction {
    pub fn new(post_id: impl Into<String>, action: Action) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: "anonymous".to_string(),
            post_id: post_id.into(),
            action,
            context: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Adds a context entry
    pub fn with_context(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    /// Post the user navigated from, if any
    pub fn source_post(&self) -> Option<&str> {
        self.context.get("source_post").and_then(Value::as_str)
    }

    /// Posts shown alongside the interacted post; non-string entries are ignored
    pub fn related_posts(&self) -> Vec<&str> {
        self.context
            .get("related_posts")
            .and_then(Value::as_array)
            .map(|posts| posts.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn search_query(&self) -> Option<&str> {
        self.context.get("search_query").and_then(Value::as_str)
    }
}

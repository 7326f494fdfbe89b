use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const TASK_TITLE_MAX_CHARS: usize = 200;
pub const TASK_TAGS_MAX_CHARS: usize = 200;
pub const FINANCE_DESCRIPTION_MAX_CHARS: usize = 255;
pub const FINANCE_TAGS_MAX_CHARS: usize = 255;
pub const FINANCE_VALUE_MAX_DIGITS: u32 = 10;
pub const FINANCE_VALUE_DECIMAL_PLACES: u32 = 2;

/// Anything the filter engine and the day-bucket aggregator can work on.
pub trait DatedRecord {
    fn tags(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub tags: String,
}

impl DatedRecord for Task {
    fn tags(&self) -> &str {
        &self.tags
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Finance {
    pub id: i64,
    pub description: String,
    pub value: Decimal,
    pub tags: String,
    pub created_at: DateTime<Utc>,
}

impl DatedRecord for Finance {
    fn tags(&self) -> &str {
        &self.tags
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
}

/// Raw task body as sent by clients. Every field is optional so that PUT and
/// PATCH can share it; `created_at` and `completed_at` are store-owned and
/// ignored when present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub is_completed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub tags: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub mark_completed: bool,
}

/// Raw finance body. `value` stays untyped until validation so that both
/// `"12.50"` and `12.5` are accepted and bad input is reported per field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FinancePayload {
    pub description: Option<String>,
    pub value: Option<serde_json::Value>,
    pub tags: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFinance {
    pub description: String,
    pub value: Decimal,
    pub tags: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinanceChanges {
    pub description: Option<String>,
    pub value: Option<Decimal>,
    pub tags: Option<String>,
}

/// Query string accepted by `GET /tasks`. Kept as raw strings so malformed
/// values never reject the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListParams {
    pub tag: Option<String>,
    pub view: Option<String>,
    pub date: Option<String>,
    pub progress_by_day: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinanceListParams {
    pub tag: Option<String>,
    pub date: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// One row of the finance by-day sum. The field name is kept for existing
/// consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayTotal {
    #[serde(rename = "created_at__date")]
    pub day: NaiveDate,
    pub total: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenObtainRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

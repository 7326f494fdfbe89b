use crate::errors::{AppError, AppResult, FieldErrors};
use crate::models::{
    FinanceChanges, FinancePayload, NewFinance, NewTask, Task, TaskChanges, TaskPayload,
    FINANCE_DESCRIPTION_MAX_CHARS, FINANCE_TAGS_MAX_CHARS, FINANCE_VALUE_DECIMAL_PLACES, FINANCE_VALUE_MAX_DIGITS,
    TASK_TAGS_MAX_CHARS, TASK_TITLE_MAX_CHARS,
};
use rust_decimal::Decimal;

const REQUIRED: &str = "This field is required.";
const BLANK: &str = "This field may not be blank.";
const INVALID_NUMBER: &str = "A valid number is required.";

/// Collects per-field messages so a single response can name every
/// offending field.
#[derive(Debug, Default)]
struct Collector {
    errors: FieldErrors,
}

impl Collector {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    fn finish<T>(self, value: T) -> AppResult<T> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(AppError::Validation(self.errors))
        }
    }

    /// `required` only decides whether the field must be present. Whether a
    /// present value may be blank is a property of the field itself.
    fn text(&mut self, field: &str, value: Option<String>, required: bool, rule: TextRule) -> Option<String> {
        let Some(value) = value else {
            if required {
                self.push(field, REQUIRED);
            }
            return None;
        };
        if !rule.allow_blank && value.trim().is_empty() {
            self.push(field, BLANK);
            return None;
        }
        if let Some(max_chars) = rule.max_chars {
            if value.chars().count() > max_chars {
                self.push(
                    field,
                    format!("Ensure this field has no more than {} characters.", max_chars),
                );
                return None;
            }
        }
        Some(value)
    }
}

#[derive(Debug, Clone, Copy)]
struct TextRule {
    allow_blank: bool,
    max_chars: Option<usize>,
}

const TASK_TITLE: TextRule = TextRule {
    allow_blank: false,
    max_chars: Some(TASK_TITLE_MAX_CHARS),
};
const TASK_DESCRIPTION: TextRule = TextRule {
    allow_blank: true,
    max_chars: None,
};
const TASK_TAGS: TextRule = TextRule {
    allow_blank: true,
    max_chars: Some(TASK_TAGS_MAX_CHARS),
};
const FINANCE_DESCRIPTION: TextRule = TextRule {
    allow_blank: false,
    max_chars: Some(FINANCE_DESCRIPTION_MAX_CHARS),
};
const FINANCE_TAGS: TextRule = TextRule {
    allow_blank: true,
    max_chars: Some(FINANCE_TAGS_MAX_CHARS),
};

pub fn validate_new_task(payload: TaskPayload) -> AppResult<NewTask> {
    let mut collector = Collector::default();
    let title = collector.text("title", payload.title, true, TASK_TITLE);
    let description = collector.text("description", payload.description, false, TASK_DESCRIPTION);
    let tags = collector.text("tags", payload.tags, false, TASK_TAGS);
    if payload.is_completed == Some(true) {
        collector.push("is_completed", "New tasks start open; complete them with an update.");
    }
    collector.finish(NewTask {
        title: title.unwrap_or_default(),
        description: description.unwrap_or_default(),
        tags: tags.unwrap_or_default(),
    })
}

/// Validates an update against the stored task. `partial` is PATCH
/// semantics: absent fields stay untouched. Completion only moves forward.
pub fn validate_task_changes(current: &Task, payload: TaskPayload, partial: bool) -> AppResult<TaskChanges> {
    let mut collector = Collector::default();
    let title = collector.text("title", payload.title, !partial, TASK_TITLE);
    let description = collector.text("description", payload.description, false, TASK_DESCRIPTION);
    let tags = collector.text("tags", payload.tags, false, TASK_TAGS);

    let mark_completed = match payload.is_completed {
        Some(true) => !current.is_completed,
        Some(false) if current.is_completed => {
            collector.push("is_completed", "A completed task cannot be reopened.");
            false
        }
        _ => false,
    };

    collector.finish(TaskChanges {
        title,
        description,
        tags,
        mark_completed,
    })
}

pub fn validate_new_finance(payload: FinancePayload) -> AppResult<NewFinance> {
    let mut collector = Collector::default();
    let description = collector.text("description", payload.description, true, FINANCE_DESCRIPTION);
    let tags = collector.text("tags", payload.tags, false, FINANCE_TAGS);
    let value = match payload.value {
        Some(raw) => parse_money(&raw).map_err(|message| collector.push("value", message)).ok(),
        None => {
            collector.push("value", REQUIRED);
            None
        }
    };
    collector.finish(NewFinance {
        description: description.unwrap_or_default(),
        value: value.unwrap_or_default(),
        tags: tags.unwrap_or_default(),
    })
}

pub fn validate_finance_changes(payload: FinancePayload, partial: bool) -> AppResult<FinanceChanges> {
    let mut collector = Collector::default();
    let description = collector.text("description", payload.description, !partial, FINANCE_DESCRIPTION);
    let tags = collector.text("tags", payload.tags, false, FINANCE_TAGS);
    let value = match payload.value {
        Some(raw) => parse_money(&raw).map_err(|message| collector.push("value", message)).ok(),
        None => {
            if !partial {
                collector.push("value", REQUIRED);
            }
            None
        }
    };
    collector.finish(FinanceChanges {
        description,
        value,
        tags,
    })
}

/// Accepts a JSON string or number and returns it with exactly two
/// fractional digits. Numbers are read through their decimal text so no
/// binary float rounding leaks in.
pub fn parse_money(raw: &serde_json::Value) -> Result<Decimal, String> {
    let text = match raw {
        serde_json::Value::String(text) => text.trim().to_string(),
        serde_json::Value::Number(number) => number.to_string(),
        _ => return Err(INVALID_NUMBER.to_string()),
    };
    let parsed = Decimal::from_str_exact(&text).map_err(|_| INVALID_NUMBER.to_string())?;

    let normalized = parsed.normalize();
    if normalized.scale() > FINANCE_VALUE_DECIMAL_PLACES {
        return Err(format!(
            "Ensure that there are no more than {} decimal places.",
            FINANCE_VALUE_DECIMAL_PLACES
        ));
    }
    let whole_digits = FINANCE_VALUE_MAX_DIGITS - FINANCE_VALUE_DECIMAL_PLACES;
    let limit = Decimal::from(10_i64.pow(whole_digits));
    if normalized.abs().trunc() >= limit {
        return Err(format!(
            "Ensure that there are no more than {} digits in total.",
            FINANCE_VALUE_MAX_DIGITS
        ));
    }

    let mut value = normalized;
    value.rescale(FINANCE_VALUE_DECIMAL_PLACES);
    Ok(value)
}

//! # Review policy configuration
//!
//! Per-repository review policy, stored as `.codereview.json` at the
//! repository root and fetched through the Bitbucket raw-file endpoint.
//! Parsing is deliberately permissive: a missing file, a broken document or
//! a malformed field falls back to defaults so a bad policy never blocks
//! the review workflow.

use serde_json::Value;

/// Path of the policy document inside the repository.
pub const CONFIG_FILE_PATH: &str = ".codereview.json";

/// Notification channels the workflow can drive. Unknown channel names in
/// the policy document fall back to the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    Telegram,
}

impl NotificationChannel {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "telegram" => Some(Self::Telegram),
            _ => None,
        }
    }
}

/// A reviewer the policy permits, identified by email with an optional
/// Telegram handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedUser {
    pub email: String,
    pub telegram: Option<String>,
}

/// Fully resolved review policy for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeReviewConfig {
    pub allowed_users: Vec<AllowedUser>,
    pub reviewers_count: u32,
    pub approve_count: u32,
    pub auto_assign: bool,
    pub notification: NotificationChannel,
}

impl Default for CodeReviewConfig {
    fn default() -> Self {
        Self {
            allowed_users: Vec::new(),
            reviewers_count: 1,
            approve_count: 1,
            auto_assign: true,
            notification: NotificationChannel::Telegram,
        }
    }
}

/// Parse a policy document, resolving every absent or malformed field to
/// its default. Malformed allowed-user entries are dropped individually.
pub fn parse_code_review_config(content: &str) -> CodeReviewConfig {
    let mut config = CodeReviewConfig::default();

    let Ok(root) = serde_json::from_str::<Value>(content) else {
        return config;
    };

    if let Some(entries) = root.get("allowedUsers").and_then(Value::as_array) {
        config.allowed_users = entries.iter().filter_map(parse_allowed_user).collect();
    }
    if let Some(count) = positive_count(root.get("reviewersCount")) {
        config.reviewers_count = count;
    }
    if let Some(count) = positive_count(root.get("approveCount")) {
        config.approve_count = count;
    }
    if let Some(flag) = root.get("autoAssign").and_then(Value::as_bool) {
        config.auto_assign = flag;
    }
    if let Some(channel) = root
        .get("notification")
        .and_then(Value::as_str)
        .and_then(NotificationChannel::parse)
    {
        config.notification = channel;
    }

    config
}

fn parse_allowed_user(entry: &Value) -> Option<AllowedUser> {
    let email = entry.get("email")?.as_str()?.trim();
    if email.is_empty() {
        return None;
    }

    let telegram = match entry.get("telegram") {
        None | Some(Value::Null) => None,
        Some(Value::String(handle)) => Some(handle.trim().trim_start_matches('@').to_string()),
        Some(_) => return None,
    };

    Some(AllowedUser {
        email: email.to_string(),
        telegram,
    })
}

fn positive_count(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(Value::as_u64)
        .filter(|count| *count > 0)
        .and_then(|count| u32::try_from(count).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_yields_defaults() {
        let config = parse_code_review_config("not json at all");
        assert_eq!(config, CodeReviewConfig::default());
    }

    #[test]
    fn empty_object_yields_defaults() {
        let config = parse_code_review_config("{}");
        assert_eq!(config.reviewers_count, 1);
        assert_eq!(config.approve_count, 1);
        assert!(config.auto_assign);
        assert_eq!(config.notification, NotificationChannel::Telegram);
        assert!(config.allowed_users.is_empty());
    }

    #[test]
    fn full_document_parses() {
        let config = parse_code_review_config(
            r#"{
                "allowedUsers": [
                    { "email": "alice@example.com", "telegram": "@alice" },
                    { "email": "bob@example.com" }
                ],
                "reviewersCount": 2,
                "approveCount": 3,
                "autoAssign": false,
                "notification": "telegram"
            }"#,
        );

        assert_eq!(config.reviewers_count, 2);
        assert_eq!(config.approve_count, 3);
        assert!(!config.auto_assign);
        assert_eq!(config.allowed_users.len(), 2);
        assert_eq!(config.allowed_users[0].email, "alice@example.com");
        assert_eq!(config.allowed_users[0].telegram.as_deref(), Some("alice"));
        assert_eq!(config.allowed_users[1].telegram, None);
    }

    #[test]
    fn malformed_allowed_users_dropped_individually() {
        let config = parse_code_review_config(
            r#"{
                "allowedUsers": [
                    { "email": "good@example.com" },
                    { "telegram": "missing-email" },
                    { "email": "" },
                    { "email": "bad-handle@example.com", "telegram": 42 },
                    { "email": "null-handle@example.com", "telegram": null }
                ]
            }"#,
        );

        let emails: Vec<&str> = config
            .allowed_users
            .iter()
            .map(|user| user.email.as_str())
            .collect();
        assert_eq!(emails, vec!["good@example.com", "null-handle@example.com"]);
    }

    #[test]
    fn non_positive_counts_fall_back() {
        let config = parse_code_review_config(
            r#"{ "reviewersCount": 0, "approveCount": -5 }"#,
        );
        assert_eq!(config.reviewers_count, 1);
        assert_eq!(config.approve_count, 1);
    }

    #[test]
    fn unknown_notification_channel_falls_back() {
        let config = parse_code_review_config(r#"{ "notification": "carrier-pigeon" }"#);
        assert_eq!(config.notification, NotificationChannel::Telegram);
    }
}

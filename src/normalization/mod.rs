//! Email normalization.
//!
//! Commit authorship, review assignments and user records all key on email
//! addresses, so every address passes through [`normalize_email`] before it
//! is compared or stored.

/// Domain aliases that map to the same mailbox provider.
const DOMAIN_ALIASES: &[(&str, &str)] = &[
    ("googlemail.com", "gmail.com"),
    ("yandex.com", "yandex.ru"),
    ("ya.ru", "yandex.ru"),
];

/// Normalizes an email address to its canonical form: trimmed, lower-cased,
/// plus-tag stripped from the local part, and provider domain aliases
/// resolved. Inputs without an `@` are returned trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    let lowered = email.trim().to_lowercase();

    let Some((local, domain)) = lowered.split_once('@') else {
        return lowered;
    };

    let local = local.split('+').next().unwrap_or(local);

    let domain = DOMAIN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == domain)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(domain);

    format!("{}@{}", local, domain)
}

/// Derives a provider username from an email address (the local part).
pub fn username_from_email(email: &str) -> String {
    let normalized = normalize_email(email);
    normalized
        .split('@')
        .next()
        .unwrap_or(&normalized)
        .to_string()
}

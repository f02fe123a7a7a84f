// Input policy for identity fields and tags

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_-]{3,32}$").unwrap();
    static ref TAG_CLEANUP_REGEX: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// Usernames that collide with routes, roles or support identities.
const RESERVED_USERNAMES: [&str; 16] = [
    "admin",
    "administrator",
    "root",
    "system",
    "support",
    "help",
    "moderator",
    "mod",
    "api",
    "auth",
    "images",
    "health",
    "about",
    "staff",
    "lumina",
    "anonymous",
];

/// Domains of throwaway mailbox services rejected at registration.
const DISPOSABLE_EMAIL_DOMAINS: [&str; 8] = [
    "mailinator.com",
    "guerrillamail.com",
    "10minutemail.com",
    "tempmail.com",
    "throwawaymail.com",
    "yopmail.com",
    "getnada.com",
    "trashmail.com",
];

/// Validate a username: 3-32 chars of `[A-Za-z0-9_-]`, not reserved.
pub fn validate_username(username: &str) -> Result<(), String> {
    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username must be 3-32 characters of letters, digits, underscore or dash".to_string(),
        );
    }
    if RESERVED_USERNAMES.contains(&username.to_lowercase().as_str()) {
        return Err("This username is reserved".to_string());
    }
    Ok(())
}

/// Normalize an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check plus the disposable-domain denylist. Full RFC
/// validation happens in the request DTO via the validator derive.
pub fn validate_email(email: &str) -> Result<(), String> {
    let email = normalize_email(email);
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Invalid email address".to_string());
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err("Invalid email address".to_string());
    }
    if DISPOSABLE_EMAIL_DOMAINS.contains(&domain) {
        return Err("Disposable email addresses are not allowed".to_string());
    }
    Ok(())
}

/// Password policy: 12-128 characters with at least three of the four
/// character classes.
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    let length = password.chars().count();
    if length < 12 {
        return Err("Password must be at least 12 characters".to_string());
    }
    if length > 128 {
        return Err("Password must be at most 128 characters".to_string());
    }

    let classes = [
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric()),
    ];
    if classes.iter().filter(|present| **present).count() < 3 {
        return Err(
            "Password must mix at least three of: uppercase, lowercase, digits, symbols"
                .to_string(),
        );
    }
    Ok(())
}

/// Normalize a tag into a slug: lowercase `[a-z0-9-]`, dashes collapsed,
/// at most 64 characters. Returns None when nothing usable remains.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let lowered = tag.trim().to_lowercase();
    let slug = TAG_CLEANUP_REGEX
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string();
    if slug.is_empty() {
        return None;
    }
    Some(slug.chars().take(64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("al_ice-99").is_ok());

        assert!(validate_username("al").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("alice!").is_err());
        assert!(validate_username("admin").is_err());
        assert!(validate_username("Admin").is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("  Alice@Example.COM ").is_ok());

        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("alice@mailinator.com").is_err());
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("Str0ng!Passw0rd!").is_ok());
        assert!(validate_password_strength("lowercase-with-digits-123").is_ok());

        assert!(validate_password_strength("Short1!").is_err());
        assert!(validate_password_strength("alllowercaseletters").is_err());
        assert!(validate_password_strength(&"aB1!".repeat(40)).is_err());
    }

    #[test]
    fn test_tag_normalization() {
        assert_eq!(normalize_tag("Mountain Sunset").unwrap(), "mountain-sunset");
        assert_eq!(normalize_tag("  Näture!!  ").unwrap(), "n-ture");
        assert_eq!(normalize_tag("already-a-slug").unwrap(), "already-a-slug");
        assert!(normalize_tag("!!!").is_none());
        assert!(normalize_tag("").is_none());
    }
}

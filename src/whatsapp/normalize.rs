//! Identifier canonicalization
//!
//! Contacts and groups reach the dashboard from three places (device snapshot,
//! REST pages, socket pushes) and those sources disagree on whether the
//! `@c.us` suffix is present, on letter case and on stray whitespace. Every
//! set-membership test in the session core goes through [`normalize_id`].

use std::collections::HashSet;

/// Suffix for personal chats
pub const CONTACT_SUFFIX: &str = "@c.us";

/// Suffix for group chats
pub const GROUP_SUFFIX: &str = "@g.us";

/// Server alias some sources use for personal chats
const USER_SERVER_ALIAS: &str = "@s.whatsapp.net";

/// Canonical key for a contact or group identifier.
///
/// Lower-cases and trims the input; a bare phone number (digits, optionally
/// with a leading `+`) gets the `@c.us` suffix, and the `@s.whatsapp.net`
/// alias is rewritten to `@c.us`.
pub fn normalize_id(raw: &str) -> String {
    let id = raw.trim().to_lowercase();

    if let Some(user) = id.strip_suffix(USER_SERVER_ALIAS) {
        return format!("{}{}", user, CONTACT_SUFFIX);
    }

    let digits = id.strip_prefix('+').unwrap_or(&id);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return format!("{}{}", digits, CONTACT_SUFFIX);
    }

    id
}

/// Whether the identifier names a group chat
pub fn is_group_id(raw: &str) -> bool {
    normalize_id(raw).ends_with(GROUP_SUFFIX)
}

/// User part of an identifier (everything before `@`), normalized
pub fn user_part(raw: &str) -> String {
    let id = normalize_id(raw);
    match id.split_once('@') {
        Some((user, _)) => user.to_string(),
        None => id,
    }
}

/// Digits of the user part, `None` when it isn't a phone number
pub fn phone_digits(raw: &str) -> Option<String> {
    let user = user_part(raw);
    if !user.is_empty() && user.chars().all(|c| c.is_ascii_digit()) {
        Some(user)
    } else {
        None
    }
}

/// Anything with a contact/group identity
pub trait Identified {
    /// Raw identifier as received; normalized by callers
    fn raw_id(&self) -> &str;

    fn identity(&self) -> String {
        normalize_id(self.raw_id())
    }
}

/// Stable de-duplication by normalized identity, first occurrence wins
pub fn dedupe_by_id<T: Identified>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.identity()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(&'static str, u32);

    impl Identified for Item {
        fn raw_id(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_bare_number_gets_contact_suffix() {
        assert_eq!(normalize_id("573001112233"), "573001112233@c.us");
        assert_eq!(normalize_id("  +573001112233 "), "573001112233@c.us");
    }

    #[test]
    fn test_existing_suffixes_are_kept() {
        assert_eq!(normalize_id("573001112233@C.US"), "573001112233@c.us");
        assert_eq!(normalize_id("1203630-1500@g.us"), "1203630-1500@g.us");
        assert_eq!(
            normalize_id("573001112233@s.whatsapp.net"),
            "573001112233@c.us"
        );
    }

    #[test]
    fn test_non_numeric_is_only_trimmed_and_lowered() {
        assert_eq!(normalize_id(" Status@Broadcast "), "status@broadcast");
        assert_eq!(normalize_id(""), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "573001112233",
            "+1 ",
            "  ABC@C.us",
            "12345@g.us",
            "999@s.whatsapp.net",
            "",
            "   ",
            "mixed123abc",
        ];
        for s in samples {
            let once = normalize_id(s);
            assert_eq!(normalize_id(&once), once, "input {:?}", s);
        }
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(normalize_id("  573@C.US\t"), normalize_id("573@c.us"));
        assert_eq!(normalize_id("573"), normalize_id("573@c.us"));
    }

    #[test]
    fn test_group_detection_and_digits() {
        assert!(is_group_id("123-456@G.US"));
        assert!(!is_group_id("573001112233"));
        assert_eq!(phone_digits("573001112233@c.us").as_deref(), Some("573001112233"));
        assert_eq!(phone_digits("123-456@g.us"), None);
        assert_eq!(user_part("ABC@c.us"), "abc");
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence_in_order() {
        let items = vec![
            Item("573001", 1),
            Item("573002@c.us", 2),
            Item("573001@c.us", 3),
            Item(" 573002 ", 4),
            Item("g1@g.us", 5),
        ];
        let deduped = dedupe_by_id(items);
        assert_eq!(
            deduped,
            vec![Item("573001", 1), Item("573002@c.us", 2), Item("g1@g.us", 5)]
        );
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let items = vec![Item("1", 1), Item("1@c.us", 2), Item("2", 3), Item("2", 4)];
        let once = dedupe_by_id(items);
        let twice = dedupe_by_id(once.clone());
        assert_eq!(once, twice);
    }
}

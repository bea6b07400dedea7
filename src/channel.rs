use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("not a valid channel link or handle")]
pub struct InvalidChannelLink(());

lazy_static! {
    static ref HANDLE_REGEX: Regex = Regex::new("^[a-zA-Z0-9_]{5,32}$").unwrap();
}

/// Canonicalizes a channel reference to an `@handle`.
///
/// Accepts `https://t.me/name`, `t.me/name`, `@name` or a bare `name`.
pub fn parse_link(link: &str) -> Result<String, InvalidChannelLink> {
    let name = link
        .trim()
        .strip_prefix("https://")
        .or_else(|| link.trim().strip_prefix("http://"))
        .unwrap_or(link.trim());

    let name = name
        .strip_prefix("t.me/")
        .or_else(|| name.strip_prefix("telegram.me/"))
        .or_else(|| name.strip_prefix('@'))
        .unwrap_or(name);

    if HANDLE_REGEX.is_match(name) {
        Ok(format!("@{name}"))
    } else {
        Err(InvalidChannelLink(()))
    }
}

/// Public link for an `@handle`, suitable for the subscribe button.
pub fn url(handle: &str) -> String {
    format!("https://t.me/{}", handle.trim_start_matches('@'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_link_forms() {
        for link in [
            "https://t.me/some_channel",
            "http://t.me/some_channel",
            "t.me/some_channel",
            "telegram.me/some_channel",
            "@some_channel",
            "some_channel",
            "  https://t.me/some_channel  ",
        ] {
            assert_eq!(parse_link(link).unwrap(), "@some_channel", "input: {link}");
        }
    }

    #[test]
    fn rejects_garbage() {
        for link in ["", "@", "a", "https://t.me/", "with spaces", "näme_channel"] {
            assert!(parse_link(link).is_err(), "input: {link}");
        }
    }

    #[test]
    fn handle_to_url() {
        assert_eq!(url("@some_channel"), "https://t.me/some_channel");
    }
}

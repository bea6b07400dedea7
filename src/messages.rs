use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, User};
use teloxide::utils::markdown::{bold, code_inline, escape, link};
use url::Url;

use crate::channel;

pub fn start() -> String {
    escape(
        "Hi! This bot manages a chat and checks that its members are subscribed \
        to a channel. Invite it to your chat and grant it admin rights. To bind \
        the chat to the channel whose subscribers should be tracked, use ",
    ) + &code_inline("/bind https://t.me/your_channel")
        + &escape(
            ". Use /unbind to remove the binding again, and /set_welcome to greet \
            new members. Don't forget to add the bot to the channel as an admin, too.",
        )
}

pub fn group_only_warning() -> String {
    bold(&escape("⚠️ This command can't be used in private chats!"))
}

pub fn bind_usage() -> String {
    bold(&escape(
        "⚠️ Specify a link to the channel you want to bind to this chat!",
    ))
}

pub fn invalid_channel_link() -> String {
    bold(&escape("⚠️ That doesn't look like a channel link!"))
}

pub fn channel_bound() -> String {
    bold(&escape("✅ Channel bound!"))
}

pub fn channel_unbound() -> String {
    bold(&escape("✅ Channel unbound!"))
}

pub fn no_channel_bound() -> String {
    escape("No channel is bound to this chat.")
}

pub fn bound_channel(handle: &str, title: Option<&str>) -> String {
    match title {
        Some(title) => format!(
            "This chat is bound to {} ({})",
            bold(&escape(title)),
            code_inline(handle)
        ),
        None => format!("This chat is bound to {}", code_inline(handle)),
    }
}

pub fn welcome_usage() -> String {
    bold(&escape("⚠️ Specify the welcome text!"))
}

pub fn welcome_set() -> String {
    bold(&escape("✅ Welcome message saved!"))
}

pub fn welcome_cleared() -> String {
    bold(&escape("✅ Welcome message cleared!"))
}

pub fn no_welcome_configured() -> String {
    escape("No welcome message is configured for this chat.")
}

pub fn welcome_preview(text: &str) -> String {
    escape("New members are welcomed with:\n\n") + &escape(text)
}

fn mention(user: &User) -> String {
    link(&format!("tg://user?id={}", user.id), &escape(&user.full_name()))
}

pub fn welcome(user: &User, text: &str) -> String {
    format!("{}, {}", mention(user), escape(text))
}

pub fn must_subscribe(user: &User) -> String {
    format!(
        "{}, {}",
        mention(user),
        bold(&escape(
            "you need to subscribe to the channel before you can post here:"
        ))
    )
}

/// `None` if the handle doesn't form a valid URL; the caller then sends the
/// warning without a button.
pub fn subscribe_keyboard(handle: &str) -> Option<InlineKeyboardMarkup> {
    let url = Url::parse(&channel::url(handle)).ok()?;
    Some(InlineKeyboardMarkup::new([[InlineKeyboardButton::url(
        "✅ Subscribe ✅",
        url,
    )]]))
}

pub fn setup_hint() -> String {
    escape(
        "Great! Now grant the bot admin rights so it can see messages and \
        manage the chat.",
    )
}

pub fn internal_error() -> String {
    escape("Sorry, an internal error occurred :((")
}

#[cfg(test)]
mod tests {
    use teloxide::types::{InlineKeyboardButtonKind, UserId};

    use super::*;

    fn user() -> User {
        User {
            id: UserId(42),
            is_bot: false,
            first_name: "Jane_Doe".into(),
            last_name: None,
            username: None,
            language_code: None,
            is_premium: false,
            added_to_attachment_menu: false,
        }
    }

    #[test]
    fn welcome_mentions_the_user() {
        let msg = welcome(&user(), "welcome to the chat!");
        assert!(msg.contains("tg://user?id=42"));
        // Markdown special characters in names must be escaped.
        assert!(msg.contains("Jane\\_Doe"));
        assert!(msg.contains("welcome to the chat\\!"));
    }

    #[test]
    fn subscribe_warning_mentions_the_user() {
        let msg = must_subscribe(&user());
        assert!(msg.contains("tg://user?id=42"));
        assert!(msg.contains("subscribe to the channel"));
    }

    #[test]
    fn keyboard_links_to_the_channel() {
        let keyboard = subscribe_keyboard("@some_channel").unwrap();
        let button = &keyboard.inline_keyboard[0][0];
        match &button.kind {
            InlineKeyboardButtonKind::Url(url) => {
                assert_eq!(url.as_str(), "https://t.me/some_channel")
            }
            other => panic!("unexpected button kind: {other:?}"),
        }
    }

    #[test]
    fn keyboard_built_for_every_parsed_handle() {
        for link in ["https://t.me/some_channel", "@another_channel"] {
            let handle = crate::channel::parse_link(link).unwrap();
            assert!(subscribe_keyboard(&handle).is_some(), "input: {link}");
        }
    }
}

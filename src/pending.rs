use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatMemberStatus, Recipient, User, UserId};
use tokio::sync::Mutex;

use crate::cleanup::AutoDeleteQueue;
use crate::database::Database;
use crate::{messages, Bot};

/// Statuses that do not count as subscribed. Anything else, including
/// statuses this bot doesn't know about, counts as subscribed.
pub fn is_blocked(status: &ChatMemberStatus) -> bool {
    matches!(
        status,
        ChatMemberStatus::Restricted | ChatMemberStatus::Left | ChatMemberStatus::Banned
    )
}

#[derive(Debug, Clone)]
struct PendingSubscriber {
    user: User,
    chat: ChatId,
    channel: String,
}

/// Users who joined a gated chat before subscribing to its channel. They get
/// their welcome message once a scan sees them subscribed.
#[derive(Clone, Default)]
pub struct PendingSubscribers {
    entries: Arc<Mutex<Vec<PendingSubscriber>>>,
}

impl PendingSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track(&self, user: User, chat: ChatId, channel: String) {
        let user_id = user.id;
        let mut entries = self.entries.lock().await;
        let entry = PendingSubscriber {
            user,
            chat,
            channel: channel.clone(),
        };
        if insert_unique(&mut entries, entry) {
            log::info!("Waiting for {user_id} to subscribe to {channel}");
        }
    }

    pub async fn run(self, bot: Bot, database: Database, cleanup: AutoDeleteQueue) {
        log::info!("Starting pending subscriber task");
        loop {
            tokio::task::yield_now().await;

            let snapshot = self.entries.lock().await.clone();
            let mut released = Vec::new();

            for entry in &snapshot {
                if check_subscribed(&bot, &database, &cleanup, entry).await {
                    released.push(entry.user.id);
                }
            }

            if !released.is_empty() {
                remove_released(&mut *self.entries.lock().await, &released);
            }
        }
    }
}

fn insert_unique(entries: &mut Vec<PendingSubscriber>, entry: PendingSubscriber) -> bool {
    if entries.iter().any(|e| e.user.id == entry.user.id) {
        return false;
    }
    entries.push(entry);
    true
}

fn remove_released(entries: &mut Vec<PendingSubscriber>, released: &[UserId]) {
    entries.retain(|e| !released.contains(&e.user.id));
}

#[derive(Debug, PartialEq)]
enum Release {
    Keep,
    Drop,
    Welcome(String),
}

/// What to do with a pending user, given their current channel status and the
/// outcome of the welcome-text lookup.
fn release_action(
    status: &ChatMemberStatus,
    welcome: Result<Option<String>, crate::database::Error>,
) -> Release {
    if is_blocked(status) {
        return Release::Keep;
    }
    match welcome {
        Ok(Some(text)) => Release::Welcome(text),
        // Welcome text was cleared while the user was pending.
        Ok(None) => Release::Drop,
        // Store hiccup, retry on the next pass.
        Err(_) => Release::Keep,
    }
}

/// Checks one pending user, welcoming them if they subscribed in the
/// meantime. Returns whether the entry is done and can be dropped.
async fn check_subscribed(
    bot: &Bot,
    database: &Database,
    cleanup: &AutoDeleteQueue,
    entry: &PendingSubscriber,
) -> bool {
    let channel = Recipient::ChannelUsername(entry.channel.clone());
    let member = match bot.get_chat_member(channel, entry.user.id).await {
        Ok(member) => member,
        Err(e) => {
            log::warn!("Couldn't check {} in {}: {e}", entry.user.id, entry.channel);
            return false;
        }
    };

    let status = member.status();
    if is_blocked(&status) {
        return false;
    }

    let welcome = database.get_welcome(entry.chat).await;
    if let Err(e) = &welcome {
        log::error!("Database error: {e}");
    }

    match release_action(&status, welcome) {
        Release::Keep => false,
        Release::Drop => {
            log::warn!(
                "No welcome text left for {}, dropping pending user {}",
                entry.chat,
                entry.user.id
            );
            true
        }
        Release::Welcome(text) => {
            let send = bot
                .send_message(entry.chat, messages::welcome(&entry.user, &text))
                .parse_mode(teloxide::types::ParseMode::MarkdownV2)
                .await;

            match send {
                Ok(sent) => cleanup.enqueue(&sent).await,
                Err(e) => log::warn!("Couldn't welcome {} in {}: {e}", entry.user.id, entry.chat),
            }

            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64) -> User {
        User {
            id: UserId(id),
            is_bot: false,
            first_name: format!("user{id}"),
            last_name: None,
            username: None,
            language_code: None,
            is_premium: false,
            added_to_attachment_menu: false,
        }
    }

    fn entry(user_id: u64, chat: i64, channel: &str) -> PendingSubscriber {
        PendingSubscriber {
            user: user(user_id),
            chat: ChatId(chat),
            channel: channel.to_string(),
        }
    }

    #[test]
    fn blocked_statuses() {
        use ChatMemberStatus::*;

        for status in [Restricted, Left, Banned] {
            assert!(is_blocked(&status), "{status:?}");
        }
        for status in [Owner, Administrator, Member] {
            assert!(!is_blocked(&status), "{status:?}");
        }
    }

    #[test]
    fn insert_dedups_on_user_identity() {
        let mut entries = Vec::new();

        assert!(insert_unique(&mut entries, entry(1, -10, "@a")));
        // Same user again, even for another chat and channel.
        assert!(!insert_unique(&mut entries, entry(1, -20, "@b")));
        assert!(insert_unique(&mut entries, entry(2, -10, "@a")));

        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn release_decision() {
        use ChatMemberStatus::*;

        // Still blocked: the welcome outcome doesn't matter, entry stays.
        assert_eq!(
            release_action(&Left, Ok(Some("hi".into()))),
            Release::Keep
        );
        // Subscribed with a configured welcome: released with that text.
        assert_eq!(
            release_action(&Member, Ok(Some("hi".into()))),
            Release::Welcome("hi".into())
        );
        // Welcome cleared while pending: dropped without a message.
        assert_eq!(release_action(&Member, Ok(None)), Release::Drop);
        // Store error: kept for the next pass.
        assert_eq!(
            release_action(&Member, Err(crate::database::Error::RowNotFound)),
            Release::Keep
        );
    }

    #[test]
    fn released_user_removed_exactly_once() {
        let mut entries = vec![entry(1, -10, "@a"), entry(2, -10, "@a"), entry(3, -20, "@b")];

        remove_released(&mut entries, &[UserId(2)]);
        let left: Vec<_> = entries.iter().map(|e| e.user.id.0).collect();
        assert_eq!(left, [1, 3]);

        // Releasing again is a no-op.
        remove_released(&mut entries, &[UserId(2)]);
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn track_keeps_one_entry_per_user() {
        let pending = PendingSubscribers::new();

        for _ in 0..3 {
            pending.track(user(7), ChatId(-10), "@a".into()).await;
        }
        pending.track(user(8), ChatId(-10), "@a".into()).await;

        assert_eq!(pending.entries.lock().await.len(), 2);
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use teloxide::prelude::*;
use teloxide::types::MessageId;
use tokio::sync::Mutex;

use crate::Bot;

#[derive(Debug, Clone)]
struct Expiring {
    chat_id: ChatId,
    message_id: MessageId,
    deadline: Instant,
}

/// Queue of bot messages that get deleted again after a fixed delay.
#[derive(Clone)]
pub struct AutoDeleteQueue {
    entries: Arc<Mutex<Vec<Expiring>>>,
    timeout: Duration,
}

impl AutoDeleteQueue {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Default::default(),
            timeout,
        }
    }

    pub async fn enqueue(&self, message: &Message) {
        self.enqueue_after(message, self.timeout).await
    }

    pub async fn enqueue_after(&self, message: &Message, timeout: Duration) {
        let entry = Expiring {
            chat_id: message.chat.id,
            message_id: message.id,
            deadline: Instant::now() + timeout,
        };
        self.entries.lock().await.push(entry);
    }

    pub async fn run(self, bot: Bot) {
        log::info!("Starting message cleanup task");
        loop {
            tokio::task::yield_now().await;

            let expired = take_expired(&mut *self.entries.lock().await, Instant::now());

            for entry in expired {
                // Deletion is best-effort: the message may be gone already or
                // the bot may have lost its permissions in the meantime.
                if let Err(e) = bot.delete_message(entry.chat_id, entry.message_id).await {
                    log::warn!(
                        "Couldn't delete message {} in {}: {e}",
                        entry.message_id.0,
                        entry.chat_id
                    );
                }
            }
        }
    }
}

fn take_expired(entries: &mut Vec<Expiring>, now: Instant) -> Vec<Expiring> {
    let mut expired = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        if entries[i].deadline <= now {
            expired.push(entries.swap_remove(i));
        } else {
            i += 1;
        }
    }
    expired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message_id: i32, deadline: Instant) -> Expiring {
        Expiring {
            chat_id: ChatId(-100),
            message_id: MessageId(message_id),
            deadline,
        }
    }

    #[test]
    fn takes_only_expired_entries() {
        let now = Instant::now();
        let mut entries = vec![
            entry(1, now - Duration::from_secs(5)),
            entry(2, now + Duration::from_secs(5)),
            entry(3, now),
        ];

        let expired = take_expired(&mut entries, now);

        let mut taken: Vec<_> = expired.iter().map(|e| e.message_id.0).collect();
        taken.sort();
        assert_eq!(taken, [1, 3]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message_id.0, 2);
    }

    #[test]
    fn never_takes_before_deadline() {
        let now = Instant::now();
        let mut entries = vec![entry(1, now + Duration::from_millis(1))];

        assert!(take_expired(&mut entries, now).is_empty());
        assert_eq!(entries.len(), 1);

        // At the deadline itself the entry is fair game.
        let expired = take_expired(&mut entries, now + Duration::from_millis(1));
        assert_eq!(expired.len(), 1);
        assert!(entries.is_empty());
    }
}

mod channel;
mod cleanup;
mod database;
mod messages;
mod pending;

use std::time::Duration;

use cleanup::AutoDeleteQueue;
use database::Database;
use pending::PendingSubscribers;
use teloxide::adaptors::throttle::Limits;
use teloxide::adaptors::Throttle;
use teloxide::macros::BotCommands;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberStatus, ChatMemberUpdated, ParseMode, Recipient};
use teloxide::utils::command::ParseError;
use teloxide::RequestError;

pub type Bot = Throttle<teloxide::Bot>;

/// Keeps everything after the command as a single argument, so welcome
/// texts and links don't need quoting.
fn rest(input: String) -> Result<(String,), ParseError> {
    Ok((input.trim().to_string(),))
}

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "snake_case",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "show what this bot does.")]
    Start,
    #[command(description = "bind a channel to this chat.", parse_with = rest)]
    Bind { link: String },
    #[command(description = "unbind the channel.")]
    Unbind,
    #[command(description = "show the bound channel.")]
    Channel,
    #[command(description = "set the welcome message.", parse_with = rest)]
    SetWelcome { text: String },
    #[command(description = "clear the welcome message.")]
    ClearWelcome,
    #[command(description = "show the welcome message.")]
    Welcome,
}

fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Ok(dir) = std::env::var("LOG_FILE_PATH") {
        let name = chrono::Local::now()
            .format("subscribe_bot_%Y%m%d%H%M%S.log")
            .to_string();
        let file = std::fs::File::create(std::path::Path::new(&dir).join(name)).unwrap();
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
}

#[tokio::main]
async fn main() {
    init_logging();
    log::info!("Starting bot...");

    let timeout: u64 = std::env::var("MESSAGE_TIMEOUT").unwrap().parse().unwrap();
    let database_url = std::env::var("DATABASE_URL").unwrap();

    let bot = teloxide::Bot::from_env().throttle(Limits::default());
    let database = Database::new(&database_url).await.unwrap();
    let cleanup = AutoDeleteQueue::new(Duration::from_secs(timeout));
    let pending = PendingSubscribers::new();

    tokio::spawn(cleanup.clone().run(bot.clone()));
    tokio::spawn(
        pending
            .clone()
            .run(bot.clone(), database.clone(), cleanup.clone()),
    );

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .branch(dptree::case![Command::Start].endpoint(handle_start))
                .branch(
                    dptree::filter(|msg: Message| msg.chat.is_private())
                        .endpoint(handle_private_command),
                )
                .endpoint(handle_command),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message| {
                    (msg.chat.is_group() || msg.chat.is_supergroup())
                        && msg.text().map_or(true, |text| !text.starts_with('/'))
                })
                .endpoint(handle_chat_message),
        )
        .branch(Update::filter_chat_member().endpoint(handle_new_chat_member))
        .branch(Update::filter_my_chat_member().endpoint(handle_my_chat_member));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![database, cleanup, pending])
        .default_handler(|_| async {})
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await
}

async fn handle_start(bot: Bot, msg: Message) -> Result<(), RequestError> {
    bot.send_message(msg.chat.id, messages::start())
        .parse_mode(ParseMode::MarkdownV2)
        .await?;
    Ok(())
}

async fn handle_private_command(bot: Bot, msg: Message) -> Result<(), RequestError> {
    bot.send_message(msg.chat.id, messages::group_only_warning())
        .parse_mode(ParseMode::MarkdownV2)
        .await?;
    Ok(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    database: Database,
    cleanup: AutoDeleteQueue,
) -> Result<(), RequestError> {
    log::info!("{:?} in {}", cmd, msg.chat.id);
    let chat_id = msg.chat.id;

    macro_rules! warn_and_return {
        ($reply:expr) => {{
            bot.send_message(chat_id, $reply)
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
            return Ok(());
        }};
    }

    let reply = match cmd {
        // Handled in its own branch.
        Command::Start => return Ok(()),
        Command::Bind { link } => {
            if link.is_empty() {
                warn_and_return!(messages::bind_usage());
            }
            let Ok(handle) = channel::parse_link(&link) else {
                warn_and_return!(messages::invalid_channel_link());
            };
            match database.set_channel(chat_id, &handle).await {
                Ok(()) => messages::channel_bound(),
                Err(e) => {
                    log::error!("Database error: {e}");
                    messages::internal_error()
                }
            }
        }
        Command::Unbind => match database.remove_channel(chat_id).await {
            Ok(()) => messages::channel_unbound(),
            Err(e) => {
                log::error!("Database error: {e}");
                messages::internal_error()
            }
        },
        Command::Channel => match database.get_channel(chat_id).await {
            Ok(Some(handle)) => {
                let title = match bot
                    .get_chat(Recipient::ChannelUsername(handle.clone()))
                    .await
                {
                    Ok(chat) => chat.title().map(str::to_owned),
                    Err(e) => {
                        log::warn!("Couldn't fetch channel info for {handle}: {e}");
                        None
                    }
                };
                messages::bound_channel(&handle, title.as_deref())
            }
            Ok(None) => messages::no_channel_bound(),
            Err(e) => {
                log::error!("Database error: {e}");
                messages::internal_error()
            }
        },
        Command::SetWelcome { text } => {
            if text.is_empty() {
                warn_and_return!(messages::welcome_usage());
            }
            match database.set_welcome(chat_id, &text).await {
                Ok(()) => messages::welcome_set(),
                Err(e) => {
                    log::error!("Database error: {e}");
                    messages::internal_error()
                }
            }
        }
        Command::ClearWelcome => match database.remove_welcome(chat_id).await {
            Ok(()) => messages::welcome_cleared(),
            Err(e) => {
                log::error!("Database error: {e}");
                messages::internal_error()
            }
        },
        Command::Welcome => match database.get_welcome(chat_id).await {
            Ok(Some(text)) => messages::welcome_preview(&text),
            Ok(None) => messages::no_welcome_configured(),
            Err(e) => {
                log::error!("Database error: {e}");
                messages::internal_error()
            }
        },
    };

    let answer = bot
        .send_message(chat_id, reply)
        .parse_mode(ParseMode::MarkdownV2)
        .await?;

    if let Err(e) = bot.delete_message(chat_id, msg.id).await {
        log::warn!("Couldn't delete command message in {chat_id}: {e}");
    }

    cleanup.enqueue(&answer).await;
    Ok(())
}

/// The gate: drops messages from chat members who aren't subscribed to the
/// bound channel.
async fn handle_chat_message(
    bot: Bot,
    msg: Message,
    database: Database,
    cleanup: AutoDeleteQueue,
) -> Result<(), RequestError> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };

    let channel = match database.get_channel(msg.chat.id).await {
        Ok(Some(channel)) => channel,
        // Chat isn't gated.
        Ok(None) => return Ok(()),
        Err(e) => {
            log::error!("Database error: {e}");
            return Ok(());
        }
    };

    let member = match bot
        .get_chat_member(Recipient::ChannelUsername(channel.clone()), user.id)
        .await
    {
        Ok(member) => member,
        Err(e) => {
            log::warn!("Couldn't check {} in {channel}: {e}", user.id);
            return Ok(());
        }
    };

    if !pending::is_blocked(&member.status()) {
        return Ok(());
    }

    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        log::warn!(
            "Couldn't delete message from {} in {}: {e}",
            user.id,
            msg.chat.id
        );
    }

    let mut warning = bot
        .send_message(msg.chat.id, messages::must_subscribe(&user))
        .parse_mode(ParseMode::MarkdownV2);

    if let Some(keyboard) = messages::subscribe_keyboard(&channel) {
        warning = warning.reply_markup(keyboard);
    }

    let warning = warning.await?;
    cleanup.enqueue(&warning).await;
    Ok(())
}

async fn handle_new_chat_member(
    bot: Bot,
    update: ChatMemberUpdated,
    database: Database,
    cleanup: AutoDeleteQueue,
    pending: PendingSubscribers,
) -> Result<(), RequestError> {
    if update.chat.is_channel() {
        return Ok(());
    }
    // Only plain joins, not promotions or restrictions.
    if !matches!(update.new_chat_member.status(), ChatMemberStatus::Member) {
        return Ok(());
    }

    let user = update.new_chat_member.user.clone();
    let chat_id = update.chat.id;

    let settings = match database.get_settings(chat_id).await {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Database error: {e}");
            return Ok(());
        }
    };

    let Some(welcome) = settings.welcome else {
        return Ok(());
    };

    if let Some(channel) = settings.channel {
        let subscribed = match bot
            .get_chat_member(Recipient::ChannelUsername(channel.clone()), user.id)
            .await
        {
            Ok(member) => !pending::is_blocked(&member.status()),
            Err(e) => {
                log::warn!("Couldn't check {} in {channel}: {e}", user.id);
                // Unresolved, let the tracker sort it out.
                false
            }
        };

        if !subscribed {
            pending.track(user, chat_id, channel).await;
            return Ok(());
        }
    }

    let sent = bot
        .send_message(chat_id, messages::welcome(&user, &welcome))
        .parse_mode(ParseMode::MarkdownV2)
        .await?;

    cleanup.enqueue(&sent).await;
    Ok(())
}

async fn handle_my_chat_member(bot: Bot, update: ChatMemberUpdated) -> Result<(), RequestError> {
    if update.chat.is_channel() || update.chat.is_private() {
        return Ok(());
    }

    match update.new_chat_member.status() {
        ChatMemberStatus::Member | ChatMemberStatus::Administrator => {
            bot.send_message(update.chat.id, messages::setup_hint())
                .parse_mode(ParseMode::MarkdownV2)
                .await?;
        }
        _ => {}
    }

    Ok(())
}

use crate::bot::state::State;
use crate::bot::views;
use crate::catalog::{load_ranked_source, Catalog};
use crate::config::Settings;
use crate::distribution::{DistributionError, Distributor};
use crate::media::{MediaAggregator, MediaKind, MediaPart, PartOutcome, Uploader};
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use teloxide::{
    dispatching::dialogue::InMemStorage, prelude::*, types::User, utils::command::BotCommands,
};
use tracing::{debug, error, info, warn};

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Telegram username of the sender, if set
#[must_use]
pub fn get_username(user: Option<&User>) -> Option<&str> {
    user.and_then(|u| u.username.as_deref())
}

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Supported commands:")]
pub enum Command {
    /// Show the menu
    #[command(description = "Show the menu.")]
    Start,
    /// Rebuild the catalog from the spreadsheet
    #[command(description = "Rebuild groups from the spreadsheet.")]
    Run,
    /// Confirm that users can request groups
    #[command(description = "Check that groups are ready.")]
    SendGroups,
    /// List registered users
    #[command(description = "List registered users.")]
    Users,
    /// Register a user by Telegram id
    #[command(description = "Register a user: /register <id>.")]
    Register(String),
}

/// Refreshes the in-memory username of whoever sent the update
pub async fn remember_sender(distributor: &Distributor, user: Option<&User>) {
    if let (Some(user), Some(name)) = (user, get_username(user)) {
        distributor
            .remember_name(user.id.0.cast_signed(), name)
            .await;
    }
}

/// Ban gate for every non-admin interaction.
///
/// Sends the ban notice and returns false while a ban is running.
///
/// # Errors
///
/// Returns an error if the notice cannot be sent.
pub async fn pass_ban_gate(
    bot: &Bot,
    chat_id: ChatId,
    user_id: i64,
    settings: &Settings,
    distributor: &Distributor,
) -> Result<bool> {
    if settings.is_admin(user_id) || !distributor.is_banned(user_id, Utc::now()).await {
        return Ok(true);
    }
    info!("Blocked interaction from banned user {user_id}");
    bot.send_message(chat_id, views::BANNED).await?;
    Ok(false)
}

async fn require_admin(bot: &Bot, msg: &Message, settings: &Settings) -> Result<bool> {
    let user_id = get_user_id_safe(msg);
    if settings.is_admin(user_id) {
        return Ok(true);
    }
    warn!("User {user_id} tried an admin command");
    bot.send_message(msg.chat.id, views::NOT_ALLOWED).await?;
    Ok(false)
}

/// Start handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
    dialogue: Dialogue<State, InMemStorage<State>>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} initiated /start command.");

    dialogue
        .update(State::Start)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

    if settings.is_admin(user_id) {
        bot.send_message(msg.chat.id, views::ADMIN_WELCOME)
            .reply_markup(views::admin_panel())
            .await?;
        return Ok(());
    }

    if !pass_ban_gate(&bot, msg.chat.id, user_id, &settings, &distributor).await? {
        return Ok(());
    }
    bot.send_message(msg.chat.id, views::USER_WELCOME)
        .reply_markup(views::user_keyboard())
        .await?;
    Ok(())
}

/// `/run`: rebuilds the catalog from the ranked spreadsheet
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn rebuild_catalog(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
) -> Result<()> {
    if !require_admin(&bot, &msg, &settings).await? {
        return Ok(());
    }
    bot.send_message(msg.chat.id, views::REBUILD_STARTED).await?;

    match load_catalog(&settings).await {
        Ok(catalog) => {
            let groups = distributor.replace_catalog(catalog).await;
            bot.send_message(msg.chat.id, views::catalog_built(groups))
                .await?;
        }
        Err(e) => {
            error!("Catalog rebuild failed: {e:#}");
            bot.send_message(msg.chat.id, views::catalog_failed(&e.to_string()))
                .await?;
        }
    }
    Ok(())
}

/// Reads the spreadsheet off the async runtime and builds a catalog
///
/// # Errors
///
/// Returns an error if the spreadsheet cannot be read.
pub async fn load_catalog(settings: &Settings) -> Result<Catalog> {
    let path = settings.spreadsheet_path.clone();
    let column = settings.weight_column;
    let entries = tokio::task::spawn_blocking(move || load_ranked_source(&path, column)).await??;
    Ok(Catalog::build(entries))
}

/// `/send_groups`: confirms that users can start requesting groups
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn send_groups(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
) -> Result<()> {
    if !require_admin(&bot, &msg, &settings).await? {
        return Ok(());
    }
    let text = if distributor.catalog().await.is_empty() {
        views::CATALOG_NOT_READY
    } else {
        views::DISTRIBUTION_READY
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// `/users`: inline list of registered users
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn list_users(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
) -> Result<()> {
    if !require_admin(&bot, &msg, &settings).await? {
        return Ok(());
    }
    let users = distributor.users().await;
    if users.is_empty() {
        bot.send_message(msg.chat.id, views::NO_USERS).await?;
        return Ok(());
    }
    bot.send_message(msg.chat.id, views::USERS_HEADER)
        .reply_markup(views::users_list_keyboard(&users))
        .await?;
    Ok(())
}

/// `/register <id>`: creates a status record for a new user
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn register_user(
    bot: Bot,
    msg: Message,
    arg: String,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
) -> Result<()> {
    if !require_admin(&bot, &msg, &settings).await? {
        return Ok(());
    }
    let Ok(user_id) = arg.trim().parse::<i64>() else {
        bot.send_message(msg.chat.id, views::REGISTER_USAGE).await?;
        return Ok(());
    };
    let created = distributor.register(user_id).await;
    bot.send_message(msg.chat.id, views::registered(user_id, created))
        .await?;
    Ok(())
}

/// "Изменить шаблон" button: waits for the new template text
///
/// # Errors
///
/// Returns an error if the dialogue cannot be updated or the reply fails.
pub async fn start_template_edit(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    dialogue: Dialogue<State, InMemStorage<State>>,
) -> Result<()> {
    if !settings.is_admin(get_user_id_safe(&msg)) {
        bot.send_message(msg.chat.id, views::ACTION_NOT_ALLOWED)
            .await?;
        return Ok(());
    }
    dialogue
        .update(State::EditingTemplate)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    bot.send_message(msg.chat.id, views::SEND_NEW_TEMPLATE)
        .await?;
    Ok(())
}

/// Saves the next text message as the broadcast template
///
/// # Errors
///
/// Returns an error if the dialogue cannot be updated or the reply fails.
pub async fn receive_template(
    bot: Bot,
    msg: Message,
    distributor: Arc<Distributor>,
    dialogue: Dialogue<State, InMemStorage<State>>,
) -> Result<()> {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, views::TEMPLATE_NEEDS_TEXT)
            .await?;
        return Ok(());
    };

    let reply = match distributor.set_broadcast_template(text).await {
        Ok(()) => views::TEMPLATE_UPDATED,
        Err(e) => {
            error!("Failed to save broadcast template: {e}");
            views::TEMPLATE_SAVE_FAILED
        }
    };
    dialogue
        .update(State::Start)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Reference to the file a message carries, for album re-sending
#[must_use]
pub fn media_part(msg: &Message) -> Option<MediaPart> {
    if let Some(photo) = msg.photo().and_then(<[_]>::last) {
        return Some(MediaPart::new(MediaKind::Photo, photo.file.id.to_string()));
    }
    if let Some(doc) = msg.document() {
        return Some(MediaPart::new(MediaKind::Document, doc.file.id.to_string()));
    }
    if let Some(video) = msg.video() {
        return Some(MediaPart::new(MediaKind::Video, video.file.id.to_string()));
    }
    msg.audio()
        .map(|audio| MediaPart::new(MediaKind::Audio, audio.file.id.to_string()))
}

/// Relays anything a regular user sends to the admins
///
/// # Errors
///
/// Returns an error if the ban notice cannot be sent.
pub async fn relay_upload(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
    aggregator: Arc<MediaAggregator>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    if settings.is_admin(user_id) {
        debug!("Ignoring non-command message from admin {user_id}");
        return Ok(());
    }
    if !pass_ban_gate(&bot, msg.chat.id, user_id, &settings, &distributor).await? {
        return Ok(());
    }

    let uploader = Uploader::new(user_id, get_username(msg.from.as_ref()));
    let grouped = msg
        .media_group_id()
        .map(|token| token.0.clone())
        .zip(media_part(&msg));

    match grouped {
        Some((token, part)) => {
            if aggregator.on_part(&token, uploader, part).await == PartOutcome::Dropped {
                warn!("Late part of media group {token} from user {user_id} dropped");
            }
        }
        None => aggregator.forward_single(msg.chat.id.0, msg.id.0, &uploader),
    }
    Ok(())
}

/// Human-readable text for errors surfaced to users
#[must_use]
pub const fn distribution_error_text(error: &DistributionError) -> &'static str {
    match error {
        DistributionError::CatalogNotReady => views::CATALOG_NOT_READY,
        DistributionError::NotRegistered(_) => views::REPORT_NOT_ALLOWED,
        DistributionError::NotBanned(_) => views::NOT_BANNED,
    }
}

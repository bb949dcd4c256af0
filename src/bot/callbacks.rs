//! Inline button handling

use crate::bot::handlers::{distribution_error_text, pass_ban_gate, remember_sender};
use crate::bot::views::{self, CallbackAction};
use crate::config::Settings;
use crate::distribution::Distributor;
use crate::storage::Status;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use tracing::{error, info, warn};

/// Where the pressed button lives
#[derive(Debug, Clone, Copy)]
struct Origin {
    chat_id: ChatId,
    message_id: MessageId,
}

/// Dispatches an inline button press.
///
/// # Errors
///
/// Returns an error if a Telegram API call fails.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
) -> Result<()> {
    let user_id = q.from.id.0.cast_signed();
    remember_sender(&distributor, Some(&q.from)).await;

    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        warn!("Unknown callback data from {user_id}: {:?}", q.data);
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let Some(origin) = q.message.as_ref().map(|m| Origin {
        chat_id: m.chat().id,
        message_id: m.id(),
    }) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };

    if action.is_admin_only() && !settings.is_admin(user_id) {
        bot.answer_callback_query(q.id.clone())
            .text(views::ACTION_NOT_ALLOWED)
            .await?;
        return Ok(());
    }

    if !action.is_admin_only()
        && !pass_ban_gate(&bot, origin.chat_id, user_id, &settings, &distributor).await?
    {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    }

    match action {
        CallbackAction::NextGroup => next_group(&bot, &q, origin, &distributor).await,
        CallbackAction::ReportBan => report_ban(&bot, &q, origin, &distributor).await,
        CallbackAction::ShowTemplate => show_template(&bot, &q, origin, &distributor).await,
        CallbackAction::Instruction => send_instruction(&bot, &q, origin, &settings).await,
        CallbackAction::ReturnToMenu => {
            bot.answer_callback_query(q.id.clone()).await?;
            bot.send_message(origin.chat_id, views::BACK_IN_MENU)
                .reply_markup(views::user_keyboard())
                .await?;
            delete_origin(&bot, origin).await;
            Ok(())
        }
        CallbackAction::SelectUser(target) => {
            bot.answer_callback_query(q.id.clone()).await?;
            bot.edit_message_text(origin.chat_id, origin.message_id, views::user_selected(target))
                .reply_markup(views::user_admin_keyboard(target))
                .await?;
            Ok(())
        }
        CallbackAction::SetStatus(target, status) => {
            set_status(&bot, &q, origin, &distributor, target, status).await
        }
        CallbackAction::RemoveBan(target) => remove_ban(&bot, &q, origin, &distributor, target).await,
    }
}

// Failures are only logged
async fn delete_origin(bot: &Bot, origin: Origin) {
    if let Err(e) = bot.delete_message(origin.chat_id, origin.message_id).await {
        warn!("Failed to delete message {}: {e}", origin.message_id.0);
    }
}

async fn next_group(
    bot: &Bot,
    q: &CallbackQuery,
    origin: Origin,
    distributor: &Distributor,
) -> Result<()> {
    let user_id = q.from.id.0.cast_signed();
    let handout = match distributor.next_group(user_id).await {
        Ok(handout) => handout,
        Err(e) => {
            info!("Group request from {user_id} refused: {e}");
            bot.answer_callback_query(q.id.clone())
                .text(distribution_error_text(&e))
                .await?;
            return Ok(());
        }
    };

    let answer = bot.answer_callback_query(q.id.clone());
    if handout.restarted {
        answer.text(views::CATALOG_RESTARTED).await?;
    } else {
        answer.await?;
    }

    bot.send_message(
        origin.chat_id,
        views::group_message(&handout.group.describe()),
    )
    .await?;
    delete_origin(bot, origin).await;
    bot.send_message(origin.chat_id, views::WHAT_NEXT)
        .reply_markup(views::user_keyboard())
        .await?;
    Ok(())
}

async fn report_ban(
    bot: &Bot,
    q: &CallbackQuery,
    origin: Origin,
    distributor: &Distributor,
) -> Result<()> {
    let user_id = q.from.id.0.cast_signed();
    if let Err(e) = distributor.self_report_ban(user_id, Utc::now()).await {
        bot.answer_callback_query(q.id.clone())
            .text(distribution_error_text(&e))
            .await?;
        return Ok(());
    }
    bot.answer_callback_query(q.id.clone()).await?;
    delete_origin(bot, origin).await;
    bot.send_message(origin.chat_id, views::BANNED).await?;
    Ok(())
}

async fn show_template(
    bot: &Bot,
    q: &CallbackQuery,
    origin: Origin,
    distributor: &Distributor,
) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;
    let template = match distributor.broadcast_template().await {
        Ok(Some(text)) if !text.trim().is_empty() => text,
        Ok(_) => views::DEFAULT_BROADCAST_TEMPLATE.to_string(),
        Err(e) => {
            error!("Failed to read broadcast template: {e}");
            views::DEFAULT_BROADCAST_TEMPLATE.to_string()
        }
    };
    bot.send_message(origin.chat_id, template)
        .reply_markup(views::return_keyboard())
        .await?;
    delete_origin(bot, origin).await;
    Ok(())
}

async fn send_instruction(
    bot: &Bot,
    q: &CallbackQuery,
    origin: Origin,
    settings: &Settings,
) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;
    let path = &settings.instruction_path;
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        warn!("Instruction file {} is missing", path.display());
        bot.send_message(origin.chat_id, views::INSTRUCTION_UNAVAILABLE)
            .await?;
        return Ok(());
    }
    bot.send_document(origin.chat_id, InputFile::file(path.clone()))
        .caption(views::INSTRUCTION_CAPTION)
        .reply_markup(views::return_keyboard())
        .await?;
    delete_origin(bot, origin).await;
    Ok(())
}

async fn set_status(
    bot: &Bot,
    q: &CallbackQuery,
    origin: Origin,
    distributor: &Distributor,
    target: i64,
    status: Status,
) -> Result<()> {
    distributor.set_status(target, status).await;
    bot.answer_callback_query(q.id.clone()).await?;
    bot.edit_message_text(
        origin.chat_id,
        origin.message_id,
        views::status_changed(target, status),
    )
    .reply_markup(views::user_admin_keyboard(target))
    .await?;
    Ok(())
}

async fn remove_ban(
    bot: &Bot,
    q: &CallbackQuery,
    origin: Origin,
    distributor: &Arc<Distributor>,
    target: i64,
) -> Result<()> {
    if let Err(e) = distributor.lift_ban(target).await {
        bot.answer_callback_query(q.id.clone())
            .text(distribution_error_text(&e))
            .await?;
        return Ok(());
    }
    if let Err(e) = bot
        .send_message(ChatId(target), views::BAN_LIFTED_FOR_USER)
        .reply_markup(views::user_keyboard())
        .await
    {
        error!("Failed to notify user {target} about lifted ban: {e}");
        bot.answer_callback_query(q.id.clone())
            .text(views::BAN_LIFT_NOTIFY_FAILED)
            .await?;
        return Ok(());
    }
    schedule_reban(bot.clone(), Arc::clone(distributor), target);

    bot.answer_callback_query(q.id.clone()).await?;
    bot.edit_message_text(origin.chat_id, origin.message_id, views::ban_lifted(target))
        .await?;
    Ok(())
}

/// Arms the one-shot re-ban that follows an admin override.
///
/// After one ban duration the user is banned again unless a ban is already
/// running or the user lost their registration. Only armed once the user
/// was told about the lifted ban. The task is never cancelled.
pub fn schedule_reban(bot: Bot, distributor: Arc<Distributor>, user_id: i64) {
    let delay = distributor.ban_duration().to_std().unwrap_or_default();
    info!(
        "Re-ban check for user {user_id} scheduled in {}s",
        delay.as_secs()
    );
    tokio::spawn(async move {
        if !distributor.reban_after_override(user_id).await {
            return;
        }
        if let Err(e) = bot.send_message(ChatId(user_id), views::AUTO_REBANNED).await {
            error!("Failed to notify user {user_id} about re-ban: {e}");
        }
    });
}

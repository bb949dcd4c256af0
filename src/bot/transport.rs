//! Telegram implementation of the relay sender

use crate::media::{MediaKind, MediaPart};
use crate::relay::{OutboundSender, Payload};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InputFile, InputMedia, InputMediaAudio, InputMediaDocument, InputMediaPhoto,
    InputMediaVideo, MessageId,
};

/// Delivers relay payloads through the Bot API
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    /// Wraps a bot handle
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn send_single(&self, chat: ChatId, part: &MediaPart) -> anyhow::Result<()> {
        let file = input_file(part);
        match part.kind {
            MediaKind::Photo => {
                self.bot.send_photo(chat, file).await?;
            }
            MediaKind::Document => {
                self.bot.send_document(chat, file).await?;
            }
            MediaKind::Video => {
                self.bot.send_video(chat, file).await?;
            }
            MediaKind::Audio => {
                self.bot.send_audio(chat, file).await?;
            }
        }
        Ok(())
    }
}

fn input_file(part: &MediaPart) -> InputFile {
    InputFile::file_id(FileId(part.file_id.clone()))
}

/// Album item for a stored part
#[must_use]
pub fn input_media(part: &MediaPart) -> InputMedia {
    let file = input_file(part);
    match part.kind {
        MediaKind::Photo => InputMedia::Photo(InputMediaPhoto::new(file)),
        MediaKind::Document => InputMedia::Document(InputMediaDocument::new(file)),
        MediaKind::Video => InputMedia::Video(InputMediaVideo::new(file)),
        MediaKind::Audio => InputMedia::Audio(InputMediaAudio::new(file)),
    }
}

#[async_trait]
impl OutboundSender for TelegramSender {
    async fn deliver(&self, chat_id: i64, payload: &Payload) -> anyhow::Result<()> {
        let chat = ChatId(chat_id);
        match payload {
            Payload::Text(text) => {
                self.bot.send_message(chat, text).await?;
            }
            // Albums need at least two items
            Payload::MediaGroup(parts) => match parts.as_slice() {
                [] => {}
                [single] => self.send_single(chat, single).await?,
                _ => {
                    self.bot
                        .send_media_group(chat, parts.iter().map(input_media))
                        .await?;
                }
            },
            Payload::Forward {
                from_chat,
                message_id,
            } => {
                self.bot
                    .forward_message(chat, ChatId(*from_chat), MessageId(*message_id))
                    .await?;
            }
        }
        Ok(())
    }
}

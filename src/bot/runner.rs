use crate::bot::callbacks::handle_callback;
use crate::bot::handlers::{self, get_user_id_safe, Command};
use crate::bot::state::State;
use crate::bot::views;
use crate::config::Settings;
use crate::distribution::Distributor;
use crate::media::MediaAggregator;
use std::sync::Arc;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{error, info};

/// Run the Telegram dispatcher until Ctrl+C.
pub async fn run_bot(
    bot: Bot,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
    aggregator: Arc<MediaAggregator>,
) {
    let bot_state = InMemStorage::<State>::new();
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, distributor, aggregator, bot_state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn is_allowed(user_id: i64, settings: &Settings, distributor: &Distributor) -> bool {
    settings.is_admin(user_id) || distributor.is_registered(user_id).await
}

/// Where a non-command message from an allowed user goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageRoute {
    EditTemplate,
    TemplateText,
    Upload,
}

// The edit button wins in every state so a repeated press restarts editing
fn message_route(state: &State, text: Option<&str>) -> MessageRoute {
    if text == Some(views::EDIT_TEMPLATE_BUTTON) {
        return MessageRoute::EditTemplate;
    }
    match state {
        State::EditingTemplate => MessageRoute::TemplateText,
        State::Start => MessageRoute::Upload,
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter_async(
                    |q: CallbackQuery, settings: Arc<Settings>, distributor: Arc<Distributor>| async move {
                        is_allowed(q.from.id.0.cast_signed(), &settings, &distributor).await
                    },
                )
                .endpoint(handle_callback_query),
        )
        .branch(Update::filter_callback_query().endpoint(handle_unauthorized_callback))
        .branch(
            Update::filter_message()
                // Admins and registered users
                .filter_async(
                    |msg: Message, settings: Arc<Settings>, distributor: Arc<Distributor>| async move {
                        is_allowed(get_user_id_safe(&msg), &settings, &distributor).await
                    },
                )
                .enter_dialogue::<Message, InMemStorage<State>, State>()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message, state: State| {
                        message_route(&state, msg.text()) == MessageRoute::EditTemplate
                    })
                    .endpoint(handle_edit_template),
                )
                .branch(
                    dptree::filter(|msg: Message, state: State| {
                        message_route(&state, msg.text()) == MessageRoute::TemplateText
                    })
                    .endpoint(handle_template_text),
                )
                .branch(dptree::endpoint(handle_upload)),
        )
        .branch(
            // Everyone else is unauthorized
            Update::filter_message().endpoint(handle_unauthorized),
        )
}

async fn handle_unauthorized(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    info!("⛔️ Unauthorized access from user {user_id}");
    if let Err(e) = bot.send_message(msg.chat.id, views::ACCESS_DENIED).await {
        error!("Failed to send access denied message to {user_id}: {e}");
    }
    respond(())
}

async fn handle_unauthorized_callback(
    bot: Bot,
    q: CallbackQuery,
) -> Result<(), teloxide::RequestError> {
    info!("⛔️ Unauthorized button press from user {}", q.from.id);
    if let Err(e) = bot
        .answer_callback_query(q.id.clone())
        .text(views::ACCESS_DENIED)
        .await
    {
        error!("Failed to answer unauthorized callback: {e}");
    }
    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
    dialogue: Dialogue<State, InMemStorage<State>>,
) -> Result<(), teloxide::RequestError> {
    handlers::remember_sender(&distributor, msg.from.as_ref()).await;
    let res = match cmd {
        Command::Start => handlers::start(bot, msg, settings, distributor, dialogue).await,
        Command::Run => handlers::rebuild_catalog(bot, msg, settings, distributor).await,
        Command::SendGroups => handlers::send_groups(bot, msg, settings, distributor).await,
        Command::Users => handlers::list_users(bot, msg, settings, distributor).await,
        Command::Register(arg) => {
            handlers::register_user(bot, msg, arg, settings, distributor).await
        }
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_edit_template(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    dialogue: Dialogue<State, InMemStorage<State>>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::start_template_edit(bot, msg, settings, dialogue).await {
        error!("Template edit error: {}", e);
    }
    respond(())
}

async fn handle_template_text(
    bot: Bot,
    msg: Message,
    distributor: Arc<Distributor>,
    dialogue: Dialogue<State, InMemStorage<State>>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::receive_template(bot, msg, distributor, dialogue).await {
        error!("Template update error: {}", e);
    }
    respond(())
}

async fn handle_upload(
    bot: Bot,
    msg: Message,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
    aggregator: Arc<MediaAggregator>,
) -> Result<(), teloxide::RequestError> {
    handlers::remember_sender(&distributor, msg.from.as_ref()).await;
    if let Err(e) = handlers::relay_upload(bot, msg, settings, distributor, aggregator).await {
        error!("Relay handler error: {}", e);
    }
    respond(())
}

async fn handle_callback_query(
    bot: Bot,
    q: CallbackQuery,
    settings: Arc<Settings>,
    distributor: Arc<Distributor>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handle_callback(bot, q, settings, distributor).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_button_restarts_editing_in_any_state() {
        for state in [State::Start, State::EditingTemplate] {
            assert_eq!(
                message_route(&state, Some(views::EDIT_TEMPLATE_BUTTON)),
                MessageRoute::EditTemplate
            );
        }
    }

    #[test]
    fn test_messages_follow_dialogue_state() {
        assert_eq!(
            message_route(&State::EditingTemplate, Some("Новый шаблон")),
            MessageRoute::TemplateText
        );
        assert_eq!(
            message_route(&State::Start, Some("привет")),
            MessageRoute::Upload
        );
        assert_eq!(message_route(&State::Start, None), MessageRoute::Upload);
    }
}

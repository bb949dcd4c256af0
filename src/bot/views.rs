//! Keyboards, texts and callback data of the bot
//!
//! All user-facing strings are Russian, matching the audience of the bot.

use crate::distribution::UserSummary;
use crate::storage::Status;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

// ─────────────────────────────────────────────────────────────────────────────
// Callback data
// ─────────────────────────────────────────────────────────────────────────────

/// Callback data for "next group"
pub const CALLBACK_NEXT_GROUP: &str = "get_next_group";
/// Callback data for the self-reported ban
pub const CALLBACK_REPORT_BAN: &str = "ban_user";
/// Callback data for showing the broadcast template
pub const CALLBACK_SHOW_TEMPLATE: &str = "show_broadcast_template";
/// Callback data for the instructions document
pub const CALLBACK_INSTRUCTION: &str = "send_instruction";
/// Callback data for going back to the user menu
pub const CALLBACK_RETURN_TO_MENU: &str = "return_to_menu";

const USER_SELECT_PREFIX: &str = "user_select";
const SET_STATUS_PREFIX: &str = "set_status";
const REMOVE_BAN_PREFIX: &str = "remove_ban";

/// Decoded inline button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// User asks for the next group
    NextGroup,
    /// User reports being banned on lichess
    ReportBan,
    /// User wants the broadcast template
    ShowTemplate,
    /// User wants the instructions document
    Instruction,
    /// Back to the user menu
    ReturnToMenu,
    /// Admin opened a user from the list
    SelectUser(i64),
    /// Admin set a user's status
    SetStatus(i64, Status),
    /// Admin lifted a user's ban
    RemoveBan(i64),
}

impl CallbackAction {
    /// Parses callback data, `None` for anything unknown or malformed
    ///
    /// # Examples
    ///
    /// ```
    /// use club_relay_bot::bot::views::CallbackAction;
    /// use club_relay_bot::storage::Status;
    ///
    /// assert_eq!(
    ///     CallbackAction::parse("set_status:42:✅"),
    ///     Some(CallbackAction::SetStatus(42, Status::Approved))
    /// );
    /// assert_eq!(CallbackAction::parse("remove_ban:x"), None);
    /// ```
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            CALLBACK_NEXT_GROUP => return Some(Self::NextGroup),
            CALLBACK_REPORT_BAN => return Some(Self::ReportBan),
            CALLBACK_SHOW_TEMPLATE => return Some(Self::ShowTemplate),
            CALLBACK_INSTRUCTION => return Some(Self::Instruction),
            CALLBACK_RETURN_TO_MENU => return Some(Self::ReturnToMenu),
            _ => {}
        }

        let (prefix, rest) = data.split_once(':')?;
        match prefix {
            USER_SELECT_PREFIX => rest.parse().ok().map(Self::SelectUser),
            REMOVE_BAN_PREFIX => rest.parse().ok().map(Self::RemoveBan),
            SET_STATUS_PREFIX => {
                let (id, tag) = rest.split_once(':')?;
                Some(Self::SetStatus(id.parse().ok()?, Status::from_tag(tag)?))
            }
            _ => None,
        }
    }

    /// Encodes the action as callback data
    #[must_use]
    pub fn to_data(self) -> String {
        match self {
            Self::NextGroup => CALLBACK_NEXT_GROUP.to_string(),
            Self::ReportBan => CALLBACK_REPORT_BAN.to_string(),
            Self::ShowTemplate => CALLBACK_SHOW_TEMPLATE.to_string(),
            Self::Instruction => CALLBACK_INSTRUCTION.to_string(),
            Self::ReturnToMenu => CALLBACK_RETURN_TO_MENU.to_string(),
            Self::SelectUser(id) => format!("{USER_SELECT_PREFIX}:{id}"),
            Self::SetStatus(id, status) => format!("{SET_STATUS_PREFIX}:{id}:{}", status.as_tag()),
            Self::RemoveBan(id) => format!("{REMOVE_BAN_PREFIX}:{id}"),
        }
    }

    /// True for actions only administrators may trigger
    #[must_use]
    pub const fn is_admin_only(self) -> bool {
        matches!(
            self,
            Self::SelectUser(_) | Self::SetStatus(..) | Self::RemoveBan(_)
        )
    }
}

fn button(text: &str, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, action.to_data())
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyboards
// ─────────────────────────────────────────────────────────────────────────────

/// Admin menu button opening the template editor
pub const EDIT_TEMPLATE_BUTTON: &str = "Изменить шаблон";

/// Main menu of a regular user
#[must_use]
pub fn user_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            button("Получить следующую группу", CallbackAction::NextGroup),
            button("Получил бан", CallbackAction::ReportBan),
        ],
        vec![button("Шаблон рассылки", CallbackAction::ShowTemplate)],
        vec![button("Инструкция", CallbackAction::Instruction)],
    ])
}

/// Single "back to menu" button
#[must_use]
pub fn return_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        "Вернуться в меню",
        CallbackAction::ReturnToMenu,
    )]])
}

/// Reply keyboard of the admin panel
#[must_use]
pub fn admin_panel() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new("/run"), KeyboardButton::new("/send_groups")],
        vec![
            KeyboardButton::new("/users"),
            KeyboardButton::new(EDIT_TEMPLATE_BUTTON),
        ],
    ])
    .resize_keyboard()
}

/// Status and ban controls for one user
#[must_use]
pub fn user_admin_keyboard(user_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            button("❌", CallbackAction::SetStatus(user_id, Status::Rejected)),
            button("✅", CallbackAction::SetStatus(user_id, Status::Approved)),
            button("Очистить", CallbackAction::SetStatus(user_id, Status::None)),
        ],
        vec![button("Снять бан", CallbackAction::RemoveBan(user_id))],
    ])
}

/// One button per registered user
#[must_use]
pub fn users_list_keyboard(users: &[UserSummary]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        users
            .iter()
            .map(|user| vec![button(&user_button_text(user), CallbackAction::SelectUser(user.user_id))])
            .collect::<Vec<_>>(),
    )
}

/// Label of a user in the admin list
#[must_use]
pub fn user_button_text(user: &UserSummary) -> String {
    let ban_mark = if user.banned_until.is_some() { " | 🚫" } else { "" };
    match user.display_name.as_deref() {
        Some(name) => format!(
            "ID: {} | Ник: {} | Статус: {}{ban_mark}",
            user.user_id,
            name,
            user.status.label()
        ),
        None => format!(
            "ID: {} | Статус: {}{ban_mark}",
            user.user_id,
            user.status.label()
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Texts
// ─────────────────────────────────────────────────────────────────────────────

/// Reply to users outside the allow-list
pub const ACCESS_DENIED: &str = "У вас нет доступа к этому боту.";
/// Reply to non-admins using admin commands
pub const NOT_ALLOWED: &str = "У вас нет прав для выполнения этой команды.";
/// Reply to non-admins pressing admin buttons
pub const ACTION_NOT_ALLOWED: &str = "У вас нет прав для выполнения этого действия.";
/// Reply while a ban is running
pub const BANNED: &str = "Вы заблокированы. Вернитесь через 24 часа.";
/// Admin greeting
pub const ADMIN_WELCOME: &str = "Привет, администратор! Вот ваша панель управления:";
/// User greeting
pub const USER_WELCOME: &str = "Привет! Нажмите кнопку ниже, чтобы получить группу.";
/// Prompt shown after a group was handed out
pub const WHAT_NEXT: &str = "Что дальше?";
/// Shown when the user returns to the menu
pub const BACK_IN_MENU: &str = "Вы вернулись в главное меню.";
/// The catalog has not been built yet
pub const CATALOG_NOT_READY: &str = "Группы еще не созданы. Сначала выполните команду /run.";
/// The user ran past the end of the catalog
pub const CATALOG_RESTARTED: &str = "Группы закончились. Начинаем сначала.";
/// Reply to `/run` before the rebuild starts
pub const REBUILD_STARTED: &str = "Запускаю скрипт... Пожалуйста, подождите.";
/// Reply to `/send_groups` once the catalog exists
pub const DISTRIBUTION_READY: &str = "Готово! Пользователи могут начать получать группы.";
/// `/users` with nobody registered
pub const NO_USERS: &str = "Нет зарегистрированных пользователей.";
/// Header of the user list
pub const USERS_HEADER: &str = "Список пользователей:";
/// Prompt of the template editor
pub const SEND_NEW_TEMPLATE: &str = "Пожалуйста, отправьте новый текст шаблона.";
/// Template editor expects text
pub const TEMPLATE_NEEDS_TEXT: &str = "Шаблон должен быть текстом. Отправьте новый текст шаблона.";
/// Template saved
pub const TEMPLATE_UPDATED: &str = "Шаблон успешно обновлен!";
/// Template could not be saved
pub const TEMPLATE_SAVE_FAILED: &str = "Не удалось сохранить шаблон.";
/// Instructions file is missing
pub const INSTRUCTION_UNAVAILABLE: &str = "Извините, инструкция временно недоступна.";
/// Caption of the instructions document
pub const INSTRUCTION_CAPTION: &str = "Инструкция по использованию бота и рассылке.";
/// Self-report by an unregistered user
pub const REPORT_NOT_ALLOWED: &str = "У вас нет доступа к этому действию.";
/// Override for a user without a ban
pub const NOT_BANNED: &str = "Пользователь не заблокирован.";
/// Message to the user whose ban was lifted
pub const BAN_LIFTED_FOR_USER: &str =
    "Администратор снял вашу блокировку. Вы можете продолжить получать группы.";
/// The lifted user could not be notified
pub const BAN_LIFT_NOTIFY_FAILED: &str = "Не удалось уведомить пользователя.";
/// Message to a user banned again by the deferred check
pub const AUTO_REBANNED: &str =
    "Вы были автоматически заблокированы, так как не взаимодействовали с ботом в течение 24 часов.";
/// `/register` without a usable id
pub const REGISTER_USAGE: &str = "Использование: /register <ID пользователя>";

/// Broadcast template used until an admin saves one
pub const DEFAULT_BROADCAST_TEMPLATE: &str = "Hello! We invite your university team ([вставить название вуза в скобках]) to participate in the Interuniversity Team Battle, the largest interuniversity online tournament on Lichess.

Participation is free and open to all university teams. Feel free to share this invitation with your club members. We look forward to seeing your team compete!

Best regards,
[вставить ваше имя]
Interuniversity Team Battles Coordinator";

/// Message carrying a handed-out group
#[must_use]
pub fn group_message(description: &str) -> String {
    format!("Ваша группа:\n{description}")
}

/// Reply to a successful `/run`
#[must_use]
pub fn catalog_built(groups: usize) -> String {
    format!("Группы успешно созданы. Всего групп: {groups}")
}

/// Reply to a failed `/run`
#[must_use]
pub fn catalog_failed(error: &str) -> String {
    format!("Произошла ошибка: {error}")
}

/// Header above a selected user's controls
#[must_use]
pub fn user_selected(user_id: i64) -> String {
    format!("Выбран пользователь ID: {user_id}. Измените его статус:")
}

/// Confirmation of a status change
#[must_use]
pub fn status_changed(user_id: i64, status: Status) -> String {
    format!(
        "Статус пользователя {user_id} изменен на: {}",
        status.label()
    )
}

/// Confirmation of a lifted ban
#[must_use]
pub fn ban_lifted(user_id: i64) -> String {
    format!("Блокировка пользователя {user_id} успешно снята.")
}

/// Reply to `/register`
#[must_use]
pub fn registered(user_id: i64, created: bool) -> String {
    if created {
        format!("Пользователь {user_id} зарегистрирован.")
    } else {
        format!("Пользователь {user_id} уже зарегистрирован.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_data_round_trips() {
        let actions = [
            CallbackAction::NextGroup,
            CallbackAction::ReportBan,
            CallbackAction::ShowTemplate,
            CallbackAction::Instruction,
            CallbackAction::ReturnToMenu,
            CallbackAction::SelectUser(1_881_684_121),
            CallbackAction::SetStatus(-5, Status::Rejected),
            CallbackAction::SetStatus(7, Status::None),
            CallbackAction::RemoveBan(9),
        ];
        for action in actions {
            assert_eq!(CallbackAction::parse(&action.to_data()), Some(action));
        }
    }

    #[test]
    fn test_wire_format_matches_buttons() {
        assert_eq!(CallbackAction::SetStatus(42, Status::None).to_data(), "set_status:42:");
        assert_eq!(CallbackAction::RemoveBan(3).to_data(), "remove_ban:3");
        assert_eq!(CallbackAction::parse("get_next_group"), Some(CallbackAction::NextGroup));
    }

    #[test]
    fn test_malformed_data_is_rejected() {
        for data in ["", "user_select", "user_select:abc", "set_status:1:?", "set_status:1", "unknown:1"] {
            assert_eq!(CallbackAction::parse(data), None, "{data}");
        }
    }

    #[test]
    fn test_admin_only_actions() {
        assert!(CallbackAction::RemoveBan(1).is_admin_only());
        assert!(CallbackAction::SelectUser(1).is_admin_only());
        assert!(!CallbackAction::NextGroup.is_admin_only());
        assert!(!CallbackAction::ReportBan.is_admin_only());
    }

    #[test]
    fn test_user_button_text() {
        let mut user = UserSummary {
            user_id: 12,
            status: Status::None,
            display_name: None,
            banned_until: None,
        };
        assert_eq!(user_button_text(&user), "ID: 12 | Статус: Без статуса");

        user.display_name = Some("magnus".into());
        user.status = Status::Approved;
        user.banned_until = Some(chrono::Utc::now());
        assert_eq!(user_button_text(&user), "ID: 12 | Ник: magnus | Статус: ✅ | 🚫");
    }

    #[test]
    fn test_keyboards_carry_expected_callbacks() {
        let menu = user_keyboard();
        assert_eq!(menu.inline_keyboard.len(), 3);
        assert_eq!(menu.inline_keyboard[0].len(), 2);

        let controls = user_admin_keyboard(77);
        assert_eq!(controls.inline_keyboard[1].len(), 1);
        assert!(!admin_panel().keyboard.is_empty());
    }
}

use chrono::Utc;
use teloxide::types::CallbackQuery;

use crate::bot::messages::Button;
use crate::engine::dispatcher::Update;

/// Main menu shown under the welcome text. Button data is the command the
/// press stands for, so presses go through the normal intent path.
pub fn main_menu() -> Vec<Vec<Button>> {
    vec![
        vec![Button::new("\u{1f4b0} Price Check", "/price")],
        vec![Button::new("\u{1f525} Trending", "/trending")],
        vec![Button::new("\u{1f3e6} Funds", "/funds")],
        vec![Button::new("\u{1f3af} Drophunting", "/drophunting")],
        vec![Button::new("\u{2753} Help", "/help")],
    ]
}

/// A button press becomes an update whose text is the button's command.
pub fn to_update(q: &CallbackQuery) -> Option<Update> {
    let data = q.data.as_deref()?;
    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat().id.0)
        .unwrap_or(q.from.id.0 as i64);
    Some(Update {
        chat_id,
        sender_id: Some(q.from.id.0),
        text: data.to_string(),
        timestamp: Utc::now(),
        callback_id: Some(q.id.clone()),
    })
}

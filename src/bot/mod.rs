pub mod callbacks;
pub mod commands;
pub mod messages;
pub mod notifier;

use teloxide::types::UpdateKind;

use crate::engine::dispatcher::Update;

/// Text messages and button presses become updates; everything else is ignored.
pub fn from_telegram(update: teloxide::types::Update) -> Option<Update> {
    match update.kind {
        UpdateKind::Message(msg) => commands::to_update(&msg),
        UpdateKind::CallbackQuery(q) => callbacks::to_update(&q),
        _ => None,
    }
}

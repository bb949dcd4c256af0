/// Inline button handling
pub mod callbacks;
/// Command and message handlers
pub mod handlers;
/// Dispatcher setup
pub mod runner;
/// Dialogue state
pub mod state;
/// Relay sender backed by the Bot API
pub mod transport;
/// Keyboards, texts and callback data
pub mod views;

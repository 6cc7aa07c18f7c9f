pub mod callback;
pub mod cost_guard;
pub mod dedupe;
pub mod pipeline;
pub mod usage_log;
pub mod user_lock;

pub use callback::{handle_callback, CallbackInput};
pub use pipeline::{handle_message, MessageInput};

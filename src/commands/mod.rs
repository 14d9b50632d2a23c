mod admin_cmd;
mod ask_cmd;
mod chat_cmd;
mod context_cmd;

pub use admin_cmd::run_admin;
pub use ask_cmd::run_single_shot;
pub use chat_cmd::run_chat_mode;
pub use context_cmd::run_define_context;

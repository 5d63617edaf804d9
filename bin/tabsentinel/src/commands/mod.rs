pub mod config_cmd;
pub mod cookies_cmd;
pub mod dispatch;
pub mod explain;
pub mod gateway;
pub mod send;
pub mod settings_cmd;
pub mod status;
pub mod support;

pub mod config_cmd;
pub mod output;
pub mod renderer;
pub mod replay_cmd;

pub mod alert;
pub mod event;
pub mod rate;
pub mod snapshot;
pub mod window;

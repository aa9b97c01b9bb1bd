pub mod dispatcher;
pub mod intent;
pub mod limiter;

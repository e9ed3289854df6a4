mod call;
mod state;
mod watch;

pub use call::cmd_call;
pub use state::cmd_state;
pub use watch::cmd_watch;

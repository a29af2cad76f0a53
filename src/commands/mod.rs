pub mod agent;
pub mod hooks_cmd;
pub mod query_cmd;
pub mod rewind_cmd;
pub mod sessions_cmd;

pub mod categorical;
pub mod failed_login;
pub mod kpi;
pub mod records;
pub mod session_guard;
pub mod tenant;
pub mod time_bucket;

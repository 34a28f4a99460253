pub mod change_password;
pub mod login;
pub mod logout;
pub mod record_activity;
pub mod switch_tenant;

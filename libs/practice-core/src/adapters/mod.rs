// Declare modules within the adapters directory
pub mod http_ip_lookup;
pub mod http_notifier;
pub mod in_memory_cache;
pub mod in_memory_event_bus;
pub mod in_memory_logs;
pub mod in_memory_outbound;
pub mod in_memory_records;
pub mod local_auth;
pub mod postgres_store;
pub mod redis_cache;
pub mod redis_event_bus;

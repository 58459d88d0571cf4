pub mod app_config;
pub mod database;
pub mod booking_repo;
pub mod redis_repo;
pub mod events;
pub mod memory;

pub use database::DbClient;
pub use booking_repo::PgReservationStore;
pub use redis_repo::RedisClient;
pub use events::{EventProducer, KafkaNotifier};
pub use memory::{InMemoryMarkerStore, InMemoryReservationStore, InMemorySnapshotStore};

pub mod error;
pub mod memory;
pub mod ports;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::{StoreError, StoreErrorKind};
pub use memory::MemoryStore;
pub use ports::{ClaimTransaction, ReservationStore};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

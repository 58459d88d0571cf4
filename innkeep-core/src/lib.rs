pub mod error;
pub mod models;
pub mod status;
pub mod snapshot;
pub mod pricing;
pub mod repository;
pub mod payment;
pub mod cache;
pub mod notification;

pub use error::{ReservationError, ReservationResult};
pub use models::{
    Accommodation, BookingReceipt, BookingRequest, BookingRequestDetail, ContactInfo,
    CreateBookingCommand, Requester, Role, RoomInventory, RoomLine, Transaction, TransactionKind,
};
pub use status::{BookingStatus, Transition};

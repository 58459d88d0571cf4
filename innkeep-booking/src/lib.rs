pub mod policy;
pub mod ledger;
pub mod gateway;
pub mod reservation;
pub mod callback;
pub mod settlement;
pub mod notify;

pub use callback::{CallbackHandler, CallbackOutcome};
pub use gateway::{HttpPaymentGateway, MockPaymentGateway};
pub use ledger::{IdempotencyLedger, PendingPayment};
pub use notify::RecordingNotifier;
pub use policy::BookingPolicy;
pub use reservation::{BookingView, ReservationService};
pub use settlement::{SettlementRun, SettlementService, SweepReport};

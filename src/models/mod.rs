pub mod actor;
pub mod booking;
pub mod user;

pub use actor::Actor;
pub use booking::{
    Booking, BookingDetail, BookingStatus, NewBooking, PaymentAttempt, PaymentMethod,
    PaymentStatus, StatusHistoryEntry,
};
pub use user::{Event, Role, Service, User, Vendor};

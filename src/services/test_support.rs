use rusqlite::Connection;

use crate::config::EsewaConfig;
use crate::db::{self, queries};
use crate::models::{Actor, Event, NewBooking, Role, Service, User, Vendor};
use crate::services::lifecycle;

pub struct Seeded {
    pub customer: Actor,
    pub vendor: Actor,
    pub vendor_id: String,
    pub service_id: String,
    pub event_id: String,
    pub booking_id: String,
}

/// In-memory database with one customer, one vendor (service priced 500),
/// one event and one pending booking without a service.
pub fn seed() -> (Connection, Seeded) {
    let mut conn = db::init_db(":memory:").unwrap();

    for (id, role) in [("cust-1", Role::Customer), ("vend-user-1", Role::Vendor)] {
        queries::create_user(
            &conn,
            &User {
                id: id.to_string(),
                name: id.to_string(),
                email: format!("{id}@example.com"),
                role,
            },
        )
        .unwrap();
    }

    queries::create_vendor(
        &conn,
        &Vendor {
            id: "vendor-1".into(),
            user_id: "vend-user-1".into(),
            business_name: "Himalayan Catering".into(),
            category: "catering".into(),
        },
    )
    .unwrap();
    queries::create_service(
        &conn,
        &Service {
            id: "service-1".into(),
            vendor_id: "vendor-1".into(),
            name: "Buffet for 50".into(),
            price: 500,
        },
    )
    .unwrap();
    queries::create_event(
        &conn,
        &Event {
            id: "event-1".into(),
            customer_id: "cust-1".into(),
            title: "Wedding reception".into(),
            event_date: Some("2025-06-15".into()),
        },
    )
    .unwrap();

    let customer = Actor::customer("cust-1");
    let booking = lifecycle::create_booking(
        &mut conn,
        &customer,
        NewBooking {
            vendor_id: "vendor-1".into(),
            event_id: "event-1".into(),
            service_id: None,
            message: Some("Vegetarian menu please".into()),
        },
    )
    .unwrap();

    (
        conn,
        Seeded {
            customer,
            vendor: Actor::vendor("vend-user-1"),
            vendor_id: "vendor-1".into(),
            service_id: "service-1".into(),
            event_id: "event-1".into(),
            booking_id: booking.id,
        },
    )
}

pub fn esewa_config() -> EsewaConfig {
    EsewaConfig {
        product_code: "EPAYTEST".into(),
        secret_key: "8gBm/:&EnhH.1/q".into(),
        form_url: "https://rc-epay.esewa.com.np/api/epay/main/v2/form".into(),
        status_url: "https://rc.esewa.com.np/api/epay/transaction/status/".into(),
        success_url: "http://localhost:3000/api/payments/esewa/success".into(),
        failure_url: "http://localhost:3000/api/payments/esewa/failure".into(),
        tax_percent: 10,
        default_amount: 1000,
    }
}

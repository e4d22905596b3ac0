use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Booking, BookingStatus, Event, PaymentAttempt, PaymentMethod, PaymentStatus, Service,
    StatusHistoryEntry, User, Vendor,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const BOOKING_COLUMNS: &str = "id, customer_id, vendor_id, service_id, event_id, service_price, message, status, \
     scheduled_date, scheduled_time, payment_method, payment_status, vendor_confirmed, \
     gateway_transaction_uuid, gateway_product_code, gateway_amount, gateway_transaction_id, \
     gateway_order_id, version, created_at, updated_at";

fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// ── Users ──

pub fn create_user(conn: &Connection, user: &User) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, role) VALUES (?1, ?2, ?3, ?4)",
        params![user.id, user.name, user.email, user.role.as_str()],
    )?;
    Ok(())
}

// ── Vendors & Services ──

pub fn create_vendor(conn: &Connection, vendor: &Vendor) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO vendors (id, user_id, business_name, category) VALUES (?1, ?2, ?3, ?4)",
        params![vendor.id, vendor.user_id, vendor.business_name, vendor.category],
    )?;
    Ok(())
}

pub fn get_vendor(conn: &Connection, id: &str) -> anyhow::Result<Option<Vendor>> {
    let vendor = conn
        .query_row(
            "SELECT id, user_id, business_name, category FROM vendors WHERE id = ?1",
            params![id],
            |row| {
                Ok(Vendor {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    business_name: row.get(2)?,
                    category: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(vendor)
}

pub fn create_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, vendor_id, name, price) VALUES (?1, ?2, ?3, ?4)",
        params![service.id, service.vendor_id, service.name, service.price],
    )?;
    Ok(())
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let service = conn
        .query_row(
            "SELECT id, vendor_id, name, price FROM services WHERE id = ?1",
            params![id],
            |row| {
                Ok(Service {
                    id: row.get(0)?,
                    vendor_id: row.get(1)?,
                    name: row.get(2)?,
                    price: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(service)
}

pub fn update_service_price(conn: &Connection, id: &str, price: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET price = ?1 WHERE id = ?2",
        params![price, id],
    )?;
    Ok(count > 0)
}

// ── Events ──

pub fn create_event(conn: &Connection, event: &Event) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO events (id, customer_id, title, event_date) VALUES (?1, ?2, ?3, ?4)",
        params![event.id, event.customer_id, event.title, event.event_date],
    )?;
    Ok(())
}

pub fn get_event(conn: &Connection, id: &str) -> anyhow::Result<Option<Event>> {
    let event = conn
        .query_row(
            "SELECT id, customer_id, title, event_date FROM events WHERE id = ?1",
            params![id],
            |row| {
                Ok(Event {
                    id: row.get(0)?,
                    customer_id: row.get(1)?,
                    title: row.get(2)?,
                    event_date: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(event)
}

// ── Bookings ──

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
        ),
        params![
            booking.id,
            booking.customer_id,
            booking.vendor_id,
            booking.service_id,
            booking.event_id,
            booking.service_price,
            booking.message,
            booking.status.as_str(),
            booking.scheduled_date.map(|d| d.format(DATE_FORMAT).to_string()),
            booking.scheduled_time,
            booking.payment_method.map(|m| m.as_str()),
            booking.payment_status.as_str(),
            booking.vendor_confirmed as i32,
            booking.gateway_transaction_uuid,
            booking.gateway_product_code,
            booking.gateway_amount,
            booking.gateway_transaction_id,
            booking.gateway_order_id,
            booking.version,
            format_timestamp(&booking.created_at),
            format_timestamp(&booking.updated_at),
        ],
    )?;
    Ok(())
}

/// Writes every mutable field of `booking`, but only if the stored row still
/// has `expected_status` and `expected_version`. Returns false when the guard
/// did not match (or the row is gone).
pub fn update_booking_guarded(
    conn: &Connection,
    booking: &Booking,
    expected_status: BookingStatus,
    expected_version: i64,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET
           status = ?1,
           scheduled_date = ?2,
           scheduled_time = ?3,
           payment_method = ?4,
           payment_status = ?5,
           vendor_confirmed = ?6,
           gateway_transaction_uuid = ?7,
           gateway_product_code = ?8,
           gateway_amount = ?9,
           gateway_transaction_id = ?10,
           gateway_order_id = ?11,
           updated_at = ?12,
           version = version + 1
         WHERE id = ?13 AND status = ?14 AND version = ?15",
        params![
            booking.status.as_str(),
            booking.scheduled_date.map(|d| d.format(DATE_FORMAT).to_string()),
            booking.scheduled_time,
            booking.payment_method.map(|m| m.as_str()),
            booking.payment_status.as_str(),
            booking.vendor_confirmed as i32,
            booking.gateway_transaction_uuid,
            booking.gateway_product_code,
            booking.gateway_amount,
            booking.gateway_transaction_id,
            booking.gateway_order_id,
            format_timestamp(&booking.updated_at),
            booking.id,
            expected_status.as_str(),
            expected_version,
        ],
    )?;
    Ok(count > 0)
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let booking = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id],
            |row| Ok(parse_booking_row(row)),
        )
        .optional()?;
    booking.transpose()
}

pub fn get_bookings_for_customer(
    conn: &Connection,
    customer_id: &str,
    status_filter: Option<BookingStatus>,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE customer_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC"
    ))?;

    let rows = stmt.query_map(
        params![customer_id, status_filter.map(|s| s.as_str())],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Bookings addressed to any vendor profile owned by `user_id`.
pub fn get_bookings_for_vendor_owner(
    conn: &Connection,
    user_id: &str,
    status_filter: Option<BookingStatus>,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE vendor_id IN (SELECT id FROM vendors WHERE user_id = ?1)
           AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC"
    ))?;

    let rows = stmt.query_map(
        params![user_id, status_filter.map(|s| s.as_str())],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

pub fn get_all_bookings(
    conn: &Connection,
    status_filter: Option<BookingStatus>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE ?1 IS NULL OR status = ?1
         ORDER BY created_at DESC LIMIT ?2"
    ))?;

    let rows = stmt.query_map(
        params![status_filter.map(|s| s.as_str()), limit],
        |row| Ok(parse_booking_row(row)),
    )?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let status_str: String = row.get(7)?;
    let scheduled_date_str: Option<String> = row.get(8)?;
    let payment_method_str: Option<String> = row.get(10)?;
    let payment_status_str: String = row.get(11)?;
    let created_at_str: String = row.get(19)?;
    let updated_at_str: String = row.get(20)?;

    let status = BookingStatus::parse(&status_str)
        .with_context(|| format!("unknown booking status: {status_str}"))?;
    let scheduled_date = scheduled_date_str
        .map(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT))
        .transpose()
        .context("malformed scheduled_date")?;
    let payment_method = payment_method_str
        .map(|m| PaymentMethod::parse(&m).with_context(|| format!("unknown payment method: {m}")))
        .transpose()?;
    let payment_status = PaymentStatus::parse(&payment_status_str)
        .with_context(|| format!("unknown payment status: {payment_status_str}"))?;

    Ok(Booking {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        vendor_id: row.get(2)?,
        service_id: row.get(3)?,
        event_id: row.get(4)?,
        service_price: row.get(5)?,
        message: row.get(6)?,
        status,
        scheduled_date,
        scheduled_time: row.get(9)?,
        payment_method,
        payment_status,
        vendor_confirmed: row.get::<_, i32>(12)? != 0,
        gateway_transaction_uuid: row.get(13)?,
        gateway_product_code: row.get(14)?,
        gateway_amount: row.get(15)?,
        gateway_transaction_id: row.get(16)?,
        gateway_order_id: row.get(17)?,
        version: row.get(18)?,
        created_at: NaiveDateTime::parse_from_str(&created_at_str, TIMESTAMP_FORMAT)
            .context("malformed created_at")?,
        updated_at: NaiveDateTime::parse_from_str(&updated_at_str, TIMESTAMP_FORMAT)
            .context("malformed updated_at")?,
    })
}

// ── Payment Attempts ──

pub fn insert_payment_attempt(conn: &Connection, attempt: &PaymentAttempt) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO payment_attempts (transaction_uuid, booking_id, product_code, amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            attempt.transaction_uuid,
            attempt.booking_id,
            attempt.product_code,
            attempt.amount,
            format_timestamp(&attempt.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_payment_attempt(
    conn: &Connection,
    transaction_uuid: &str,
) -> anyhow::Result<Option<PaymentAttempt>> {
    let row = conn
        .query_row(
            "SELECT transaction_uuid, booking_id, product_code, amount, created_at
             FROM payment_attempts WHERE transaction_uuid = ?1",
            params![transaction_uuid],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((transaction_uuid, booking_id, product_code, amount, created_at)) => {
            Ok(Some(PaymentAttempt {
                transaction_uuid,
                booking_id,
                product_code,
                amount,
                created_at: NaiveDateTime::parse_from_str(&created_at, TIMESTAMP_FORMAT)
                    .context("malformed payment attempt timestamp")?,
            }))
        }
        None => Ok(None),
    }
}

// ── Status History ──

pub fn insert_history(
    conn: &Connection,
    booking_id: &str,
    status: BookingStatus,
    note: &str,
    at: &NaiveDateTime,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO booking_status_history (booking_id, status, note, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![booking_id, status.as_str(), note, format_timestamp(at)],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_history(conn: &Connection, booking_id: &str) -> anyhow::Result<Vec<StatusHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT status, note, created_at FROM booking_status_history
         WHERE booking_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![booking_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut history = vec![];
    for row in rows {
        let (status, note, created_at) = row?;
        history.push(StatusHistoryEntry {
            status: BookingStatus::parse(&status)
                .with_context(|| format!("unknown booking status in history: {status}"))?,
            note,
            timestamp: NaiveDateTime::parse_from_str(&created_at, TIMESTAMP_FORMAT)
                .context("malformed history timestamp")?,
        });
    }
    Ok(history)
}

pub fn count_history(conn: &Connection, booking_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM booking_status_history WHERE booking_id = ?1",
        params![booking_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

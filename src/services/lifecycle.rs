use chrono::{NaiveDate, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{
    Actor, Booking, BookingDetail, BookingStatus, NewBooking, PaymentAttempt, PaymentMethod,
    PaymentStatus, Role,
};

/// Who may traverse an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRule {
    /// Owner of the booking's vendor profile.
    Vendor,
    /// The booking's customer.
    Customer,
    /// Customer, vendor owner or an admin.
    Party,
    /// Verified gateway callbacks only.
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    None,
    Schedule,
    CashSettlement,
    PaymentStarted,
    PaymentSettled,
    PaymentFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub actor: ActorRule,
    pub effect: EffectKind,
}

/// The transition table. Anything not listed here is illegal. A pair may carry
/// more than one edge; the effect picks which one applies.
pub fn edges(from: BookingStatus, to: BookingStatus) -> &'static [Edge] {
    use ActorRule as A;
    use BookingStatus::*;
    use EffectKind as E;

    match (from, to) {
        (Pending, Accepted) | (Pending, Rejected) => &[Edge {
            actor: A::Vendor,
            effect: E::None,
        }],
        (Accepted, Scheduled) => &[Edge {
            actor: A::Vendor,
            effect: E::Schedule,
        }],
        (Accepted, Cancelled) | (Scheduled, Cancelled) => &[Edge {
            actor: A::Party,
            effect: E::None,
        }],
        (Scheduled, Completed) => &[Edge {
            actor: A::Customer,
            effect: E::CashSettlement,
        }],
        // The gateway edge settles an attempt whose failure redirect arrived
        // before the gateway actually completed it.
        (Scheduled, Booked) => &[
            Edge {
                actor: A::Customer,
                effect: E::PaymentStarted,
            },
            Edge {
                actor: A::Gateway,
                effect: E::PaymentSettled,
            },
        ],
        (Booked, Booked) => &[Edge {
            actor: A::Gateway,
            effect: E::PaymentSettled,
        }],
        (Booked, Scheduled) => &[Edge {
            actor: A::Gateway,
            effect: E::PaymentFailed,
        }],
        _ => &[],
    }
}

/// Side effect carried by a transition, applied in the same write as the
/// status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    Schedule {
        date: Option<String>,
        time: Option<String>,
    },
    CashSettlement,
    PaymentStarted {
        attempt: PaymentAttempt,
    },
    /// Settles `attempt`, which need not be the booking's latest one.
    PaymentSettled {
        attempt: PaymentAttempt,
        transaction_id: String,
    },
    PaymentFailed,
}

impl Effect {
    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::None => EffectKind::None,
            Effect::Schedule { .. } => EffectKind::Schedule,
            Effect::CashSettlement => EffectKind::CashSettlement,
            Effect::PaymentStarted { .. } => EffectKind::PaymentStarted,
            Effect::PaymentSettled { .. } => EffectKind::PaymentSettled,
            Effect::PaymentFailed => EffectKind::PaymentFailed,
        }
    }

    /// Mutates `booking` in memory and returns the default history note.
    fn apply(&self, booking: &mut Booking, target: BookingStatus) -> Result<String, AppError> {
        match self {
            Effect::None => Ok(target.default_note().to_string()),
            Effect::Schedule { date, time } => {
                let raw = date
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation("scheduledDate is required to schedule a booking".into())
                    })?;
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                    AppError::Validation(format!("scheduledDate must be YYYY-MM-DD, got {raw:?}"))
                })?;
                let time = time
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);

                booking.scheduled_date = Some(date);
                booking.scheduled_time = time.clone();

                Ok(match time {
                    Some(t) => format!("Booking scheduled for {date} at {t}"),
                    None => format!("Booking scheduled for {date}"),
                })
            }
            Effect::CashSettlement => {
                booking.payment_method = Some(PaymentMethod::Cash);
                booking.payment_status = PaymentStatus::Completed;
                booking.vendor_confirmed = true;
                Ok("Cash payment confirmed by customer".to_string())
            }
            Effect::PaymentStarted { attempt } => {
                booking.payment_method = Some(PaymentMethod::Online);
                booking.payment_status = PaymentStatus::Pending;
                booking.vendor_confirmed = true;
                set_attempt(booking, attempt);
                booking.gateway_transaction_id = None;
                booking.gateway_order_id = None;
                Ok(format!(
                    "Online payment of {} initiated (transaction {})",
                    attempt.amount, attempt.transaction_uuid
                ))
            }
            Effect::PaymentSettled {
                attempt,
                transaction_id,
            } => {
                booking.payment_method = Some(PaymentMethod::Online);
                booking.payment_status = PaymentStatus::Completed;
                booking.vendor_confirmed = true;
                set_attempt(booking, attempt);
                booking.gateway_transaction_id = Some(transaction_id.clone());
                booking.gateway_order_id = Some(attempt.transaction_uuid.clone());
                Ok(format!(
                    "Payment completed via eSewa (transaction id {transaction_id})"
                ))
            }
            Effect::PaymentFailed => {
                booking.payment_status = PaymentStatus::Failed;
                Ok("Payment failed; booking reverted to Scheduled so payment can be retried"
                    .to_string())
            }
        }
    }
}

fn set_attempt(booking: &mut Booking, attempt: &PaymentAttempt) {
    booking.gateway_transaction_uuid = Some(attempt.transaction_uuid.clone());
    booking.gateway_product_code = Some(attempt.product_code.clone());
    booking.gateway_amount = Some(attempt.amount);
}

#[derive(Debug, Clone, Default)]
pub struct TransitionExtra {
    pub scheduled_date: Option<String>,
    pub scheduled_time: Option<String>,
    pub note: Option<String>,
}

/// A validated change, computed from a snapshot but not yet written.
#[derive(Debug, Clone)]
pub struct Plan {
    pub current: Booking,
    pub next: Booking,
    pub note: String,
    /// Recorded alongside the update when the transition starts a payment.
    pub new_attempt: Option<PaymentAttempt>,
}

// ── Creation ──

pub fn create_booking(
    conn: &mut Connection,
    actor: &Actor,
    request: NewBooking,
) -> Result<Booking, AppError> {
    let customer_id = match actor {
        Actor::User {
            id,
            role: Role::Customer,
        } => id.clone(),
        _ => return Err(AppError::Forbidden("only customers can request bookings".into())),
    };

    let tx = conn.transaction()?;

    queries::get_vendor(&tx, &request.vendor_id)?
        .ok_or_else(|| AppError::NotFound(format!("vendor {}", request.vendor_id)))?;

    let event = queries::get_event(&tx, &request.event_id)?
        .ok_or_else(|| AppError::NotFound(format!("event {}", request.event_id)))?;
    if event.customer_id != customer_id {
        return Err(AppError::Forbidden("event belongs to another customer".into()));
    }

    // The price is frozen here; later edits to the service don't touch the booking.
    let service_price = match request.service_id.as_deref() {
        Some(service_id) => {
            let service = queries::get_service(&tx, service_id)?
                .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))?;
            if service.vendor_id != request.vendor_id {
                return Err(AppError::Validation(
                    "service is not offered by this vendor".into(),
                ));
            }
            Some(service.price)
        }
        None => None,
    };

    let now = Utc::now().naive_utc();
    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        customer_id,
        vendor_id: request.vendor_id,
        service_id: request.service_id,
        event_id: request.event_id,
        service_price,
        message: request.message.filter(|m| !m.trim().is_empty()),
        status: BookingStatus::Pending,
        scheduled_date: None,
        scheduled_time: None,
        payment_method: None,
        payment_status: PaymentStatus::Pending,
        vendor_confirmed: false,
        gateway_transaction_uuid: None,
        gateway_product_code: None,
        gateway_amount: None,
        gateway_transaction_id: None,
        gateway_order_id: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    queries::insert_booking(&tx, &booking)?;
    queries::insert_history(
        &tx,
        &booking.id,
        BookingStatus::Pending,
        BookingStatus::Pending.default_note(),
        &now,
    )?;
    tx.commit()?;

    tracing::info!(booking_id = %booking.id, vendor_id = %booking.vendor_id, "booking created");
    Ok(booking)
}

// ── Reads ──

/// A booking with its full history, visible to its parties only.
pub fn get_booking(conn: &Connection, actor: &Actor, booking_id: &str) -> Result<BookingDetail, AppError> {
    let booking = queries::get_booking_by_id(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
    if matches!(actor, Actor::Gateway) {
        return Err(AppError::Forbidden("gateway cannot read bookings".into()));
    }
    ensure_participant(conn, &booking, actor)?;

    let status_history = queries::get_history(conn, booking_id)?;
    Ok(BookingDetail {
        booking,
        status_history,
    })
}

pub const ADMIN_LIST_LIMIT: i64 = 100;

pub fn list_bookings(
    conn: &Connection,
    actor: &Actor,
    status: Option<BookingStatus>,
) -> Result<Vec<Booking>, AppError> {
    let bookings = match actor {
        Actor::User {
            id,
            role: Role::Customer,
        } => queries::get_bookings_for_customer(conn, id, status)?,
        Actor::User {
            id,
            role: Role::Vendor,
        } => queries::get_bookings_for_vendor_owner(conn, id, status)?,
        Actor::User {
            role: Role::Admin, ..
        } => queries::get_all_bookings(conn, status, ADMIN_LIST_LIMIT)?,
        Actor::Gateway => return Err(AppError::Forbidden("gateway cannot list bookings".into())),
    };
    Ok(bookings)
}

// ── Transitions ──

/// Status-update path: vendor/customer actions that carry no payment effect.
pub fn transition(
    conn: &mut Connection,
    booking_id: &str,
    target: BookingStatus,
    actor: &Actor,
    extra: TransitionExtra,
) -> Result<Booking, AppError> {
    let effect = match target {
        BookingStatus::Scheduled => Effect::Schedule {
            date: extra.scheduled_date,
            time: extra.scheduled_time,
        },
        _ => Effect::None,
    };
    apply_transition(conn, booking_id, target, actor, effect, extra.note)
}

/// Customer confirms and pays in cash; completes the booking in one step.
pub fn confirm_cash(
    conn: &mut Connection,
    booking_id: &str,
    actor: &Actor,
    note: Option<String>,
) -> Result<Booking, AppError> {
    apply_transition(
        conn,
        booking_id,
        BookingStatus::Completed,
        actor,
        Effect::CashSettlement,
        note,
    )
}

/// The single write path for booking status. Loads, guards, applies the effect
/// and commits the conditional update together with one history entry.
pub fn apply_transition(
    conn: &mut Connection,
    booking_id: &str,
    target: BookingStatus,
    actor: &Actor,
    effect: Effect,
    note: Option<String>,
) -> Result<Booking, AppError> {
    let tx = conn.transaction()?;

    let current = queries::get_booking_by_id(&tx, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;

    let plan = plan_transition(&tx, &current, target, actor, &effect, note)?;
    commit(&tx, &plan)?;
    tx.commit()?;

    tracing::info!(
        booking_id = %booking_id,
        from = %plan.current.status,
        to = %plan.next.status,
        actor = %actor,
        "booking transitioned"
    );

    let mut next = plan.next;
    next.version += 1;
    Ok(next)
}

/// Checks the guard, the actor and the effect against `current` and computes
/// the resulting booking. Nothing is written.
pub fn plan_transition(
    conn: &Connection,
    current: &Booking,
    target: BookingStatus,
    actor: &Actor,
    effect: &Effect,
    note: Option<String>,
) -> Result<Plan, AppError> {
    ensure_participant(conn, current, actor)?;

    let candidates = edges(current.status, target);
    let Some(first) = candidates.first() else {
        tracing::warn!(
            booking_id = %current.id,
            from = %current.status,
            to = %target,
            "rejected illegal transition"
        );
        return Err(AppError::InvalidTransition(no_edge_message(
            current.status,
            target,
        )));
    };

    let edge = candidates
        .iter()
        .find(|e| e.effect == effect.kind())
        .ok_or_else(|| AppError::InvalidTransition(wrong_path_message(first.effect)))?;

    if !actor_satisfies(conn, current, actor, edge.actor)? {
        return Err(AppError::Forbidden(format!(
            "{actor} may not move booking from {} to {target}",
            current.status
        )));
    }

    let mut next = current.clone();
    let default_note = effect.apply(&mut next, target)?;
    next.status = target;
    next.updated_at = Utc::now().naive_utc();

    let note = note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or(default_note);

    let new_attempt = match effect {
        Effect::PaymentStarted { attempt } => Some(attempt.clone()),
        _ => None,
    };

    Ok(Plan {
        current: current.clone(),
        next,
        note,
        new_attempt,
    })
}

/// Writes a plan. Fails with `Conflict` if the stored booking has moved on
/// since the plan's snapshot was taken.
pub fn commit(conn: &Connection, plan: &Plan) -> Result<(), AppError> {
    let updated = queries::update_booking_guarded(
        conn,
        &plan.next,
        plan.current.status,
        plan.current.version,
    )?;
    if !updated {
        tracing::warn!(booking_id = %plan.current.id, "concurrent update detected");
        return Err(AppError::Conflict(format!(
            "booking {} was modified concurrently; reload and retry",
            plan.current.id
        )));
    }

    queries::insert_history(
        conn,
        &plan.next.id,
        plan.next.status,
        &plan.note,
        &plan.next.updated_at,
    )?;
    if let Some(attempt) = &plan.new_attempt {
        queries::insert_payment_attempt(conn, attempt)?;
    }
    Ok(())
}

// ── Authorization ──

/// The actor must be the customer, the vendor owner, an admin or the gateway.
pub fn ensure_participant(
    conn: &Connection,
    booking: &Booking,
    actor: &Actor,
) -> Result<(), AppError> {
    let allowed = match actor {
        Actor::Gateway => true,
        Actor::User { role: Role::Admin, .. } => true,
        Actor::User {
            id,
            role: Role::Customer,
        } => *id == booking.customer_id,
        Actor::User {
            role: Role::Vendor, ..
        } => owns_vendor(conn, booking, actor)?,
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{actor} is not a party to booking {}",
            booking.id
        )))
    }
}

fn actor_satisfies(
    conn: &Connection,
    booking: &Booking,
    actor: &Actor,
    rule: ActorRule,
) -> Result<bool, AppError> {
    let ok = match (rule, actor) {
        (ActorRule::Gateway, Actor::Gateway) => true,
        (_, Actor::Gateway) | (ActorRule::Gateway, _) => false,
        (ActorRule::Customer, Actor::User { id, role }) => {
            *role == Role::Customer && *id == booking.customer_id
        }
        (ActorRule::Vendor, Actor::User { role, .. }) => {
            *role == Role::Vendor && owns_vendor(conn, booking, actor)?
        }
        (ActorRule::Party, Actor::User { id, role }) => match role {
            Role::Admin => true,
            Role::Customer => *id == booking.customer_id,
            Role::Vendor => owns_vendor(conn, booking, actor)?,
        },
    };
    Ok(ok)
}

fn owns_vendor(conn: &Connection, booking: &Booking, actor: &Actor) -> Result<bool, AppError> {
    let Some(user_id) = actor.user_id() else {
        return Ok(false);
    };
    let vendor = queries::get_vendor(conn, &booking.vendor_id)?;
    Ok(vendor.map(|v| v.user_id == user_id).unwrap_or(false))
}

fn no_edge_message(from: BookingStatus, to: BookingStatus) -> String {
    match to {
        BookingStatus::Completed | BookingStatus::Booked if from != BookingStatus::Scheduled => {
            "booking must be scheduled before payment".to_string()
        }
        _ => format!("cannot move booking from {from} to {to}"),
    }
}

fn wrong_path_message(expected: EffectKind) -> String {
    match expected {
        EffectKind::CashSettlement => {
            "bookings are completed by confirming payment, not by a status update".to_string()
        }
        EffectKind::PaymentStarted => {
            "online payment must be initiated through the payment endpoint".to_string()
        }
        EffectKind::PaymentSettled | EffectKind::PaymentFailed => {
            "payment outcomes are only applied from gateway callbacks".to_string()
        }
        EffectKind::Schedule => "scheduling requires a scheduledDate".to_string(),
        EffectKind::None => "this transition carries no payment data".to_string(),
    }
}

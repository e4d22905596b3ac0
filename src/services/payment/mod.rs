pub mod esewa;
pub mod signature;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::EsewaConfig;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Actor, Booking, BookingStatus, PaymentAttempt, PaymentStatus, Role};
use crate::services::lifecycle::{self, Effect};
use crate::state::AppState;

use esewa::CallbackPayload;

/// Transaction states reported by the gateway's status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    Pending,
    Complete,
    FullRefund,
    PartialRefund,
    Ambiguous,
    NotFound,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone)]
pub struct TransactionStatus {
    pub status: GatewayStatus,
    pub ref_id: Option<String>,
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn transaction_status(
        &self,
        product_code: &str,
        total_amount: i64,
        transaction_uuid: &str,
    ) -> anyhow::Result<TransactionStatus>;
}

/// Form fields the browser must POST to the gateway. Key names are part of the
/// gateway contract.
#[derive(Debug, Clone, Serialize)]
pub struct EsewaForm {
    pub amount: String,
    pub failure_url: String,
    pub product_delivery_charge: String,
    pub product_service_charge: String,
    pub product_code: String,
    pub signature: String,
    pub signed_field_names: String,
    pub success_url: String,
    pub tax_amount: String,
    pub total_amount: String,
    pub transaction_uuid: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRedirect {
    pub form_url: String,
    pub fields: EsewaForm,
    pub booking: Booking,
}

#[derive(Debug, Clone)]
pub(crate) enum CallbackOutcome {
    Success { transaction_id: String },
    Failure,
}

#[derive(Debug, Clone)]
pub enum CallbackResult {
    Applied(Booking),
    /// Duplicate or superseded delivery; nothing was written.
    Unchanged(Booking),
}

impl CallbackResult {
    pub fn booking(&self) -> &Booking {
        match self {
            CallbackResult::Applied(b) | CallbackResult::Unchanged(b) => b,
        }
    }
}

// ── Initiation ──

pub fn initiate(
    conn: &mut Connection,
    config: &EsewaConfig,
    booking_id: &str,
    actor: &Actor,
) -> Result<PaymentRedirect, AppError> {
    let booking = queries::get_booking_by_id(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;

    let is_customer = matches!(
        actor,
        Actor::User { id, role: Role::Customer } if *id == booking.customer_id
    );
    if !is_customer {
        return Err(AppError::Forbidden(
            "only the booking's customer can pay for it".into(),
        ));
    }
    if booking.status != BookingStatus::Scheduled {
        return Err(AppError::InvalidTransition(
            "booking must be scheduled before payment".into(),
        ));
    }

    let amount = booking.service_price.unwrap_or(config.default_amount);
    let tax_amount = signature::tax_for(amount, config.tax_percent);
    // Fresh key per attempt; callbacks are matched on it.
    let attempt = PaymentAttempt {
        transaction_uuid: uuid::Uuid::new_v4().to_string(),
        booking_id: booking.id.clone(),
        product_code: config.product_code.clone(),
        amount: amount + tax_amount,
        created_at: Utc::now().naive_utc(),
    };
    let signature = signature::sign(
        &config.secret_key,
        attempt.amount,
        &attempt.transaction_uuid,
        &attempt.product_code,
    )?;

    let booking = lifecycle::apply_transition(
        conn,
        booking_id,
        BookingStatus::Booked,
        actor,
        Effect::PaymentStarted {
            attempt: attempt.clone(),
        },
        None,
    )?;

    tracing::info!(
        booking_id = %booking_id,
        transaction_uuid = %attempt.transaction_uuid,
        total_amount = attempt.amount,
        "payment initiated"
    );

    Ok(PaymentRedirect {
        form_url: config.form_url.clone(),
        fields: EsewaForm {
            amount: amount.to_string(),
            failure_url: config.failure_url.clone(),
            product_delivery_charge: "0".to_string(),
            product_service_charge: "0".to_string(),
            product_code: attempt.product_code,
            signature,
            signed_field_names: signature::SIGNED_FIELD_NAMES.to_string(),
            success_url: config.success_url.clone(),
            tax_amount: tax_amount.to_string(),
            total_amount: attempt.amount.to_string(),
            transaction_uuid: attempt.transaction_uuid,
        },
        booking,
    })
}

// ── Callbacks ──

fn load_attempt(
    conn: &Connection,
    correlation_key: &str,
) -> Result<(PaymentAttempt, Booking), AppError> {
    let attempt = queries::get_payment_attempt(conn, correlation_key)?
        .ok_or_else(|| AppError::NotFound(format!("payment {correlation_key}")))?;
    let booking = queries::get_booking_by_id(conn, &attempt.booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {}", attempt.booking_id)))?;
    Ok((attempt, booking))
}

/// Whether `booking` is waiting on the attempt keyed `correlation_key`.
fn awaiting(booking: &Booking, correlation_key: &str) -> bool {
    booking.status == BookingStatus::Booked
        && booking.payment_status == PaymentStatus::Pending
        && booking.gateway_transaction_uuid.as_deref() == Some(correlation_key)
}

/// Applies an already-verified gateway outcome to the booking that owns the
/// attempt keyed `correlation_key`.
///
/// A success settles the booking if it is awaiting any attempt or was reverted
/// after a failure, so money the gateway did take is never dropped. A failure
/// only reverts the booking while it is awaiting that exact attempt.
pub(crate) fn handle_callback(
    conn: &mut Connection,
    correlation_key: &str,
    outcome: CallbackOutcome,
) -> Result<CallbackResult, AppError> {
    let (attempt, booking) = load_attempt(conn, correlation_key)?;

    match outcome {
        CallbackOutcome::Success { transaction_id } => {
            if booking.payment_status == PaymentStatus::Completed {
                let same = booking.gateway_order_id.as_deref() == Some(correlation_key)
                    && booking.gateway_transaction_id.as_deref() == Some(transaction_id.as_str());
                if same {
                    tracing::info!(correlation_key, "duplicate success callback ignored");
                    return Ok(CallbackResult::Unchanged(booking));
                }
                tracing::error!(
                    correlation_key,
                    booking_id = %booking.id,
                    transaction_id = %transaction_id,
                    "second settlement for an already paid booking; refund required"
                );
                return Err(AppError::Conflict(format!(
                    "booking {} is already paid by another transaction",
                    booking.id
                )));
            }

            let recoverable = matches!(
                (booking.status, booking.payment_status),
                (BookingStatus::Booked, PaymentStatus::Pending)
                    | (BookingStatus::Scheduled, PaymentStatus::Failed)
            );
            if !recoverable {
                tracing::error!(
                    correlation_key,
                    booking_id = %booking.id,
                    status = %booking.status,
                    "success callback for a booking that can no longer take payment"
                );
                return Err(AppError::InvalidTransition(
                    "payment is not awaiting confirmation".into(),
                ));
            }
            if booking.gateway_transaction_uuid.as_deref() != Some(correlation_key) {
                tracing::warn!(
                    correlation_key,
                    booking_id = %booking.id,
                    "settling a superseded payment attempt"
                );
            }

            let booking = lifecycle::apply_transition(
                conn,
                &booking.id,
                BookingStatus::Booked,
                &Actor::Gateway,
                Effect::PaymentSettled {
                    attempt,
                    transaction_id,
                },
                None,
            )?;
            Ok(CallbackResult::Applied(booking))
        }
        CallbackOutcome::Failure => {
            if !awaiting(&booking, correlation_key) {
                tracing::info!(correlation_key, "failure callback for inactive attempt ignored");
                return Ok(CallbackResult::Unchanged(booking));
            }

            let booking = lifecycle::apply_transition(
                conn,
                &booking.id,
                BookingStatus::Scheduled,
                &Actor::Gateway,
                Effect::PaymentFailed,
                None,
            )?;
            Ok(CallbackResult::Applied(booking))
        }
    }
}

async fn ask_gateway(
    state: &AppState,
    attempt: &PaymentAttempt,
) -> Result<TransactionStatus, AppError> {
    state
        .gateway
        .transaction_status(&attempt.product_code, attempt.amount, &attempt.transaction_uuid)
        .await
        .map_err(|e| AppError::Gateway(format!("status check failed: {e:#}")))
}

/// Maps a status report to the outcome it settles, if it is final.
fn outcome_for(status: &TransactionStatus) -> Result<Option<CallbackOutcome>, AppError> {
    match status.status {
        GatewayStatus::Complete => {
            let transaction_id = status.ref_id.clone().ok_or_else(|| {
                AppError::Gateway("gateway reported completion without a reference id".into())
            })?;
            Ok(Some(CallbackOutcome::Success { transaction_id }))
        }
        GatewayStatus::Canceled | GatewayStatus::NotFound | GatewayStatus::FullRefund => {
            Ok(Some(CallbackOutcome::Failure))
        }
        _ => Ok(None),
    }
}

/// What the success redirect carried, before verification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuccessCallback {
    pub oid: Option<String>,
    pub amt: Option<String>,
    #[serde(rename = "refId")]
    pub ref_id: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfirmedPayment {
    pub transaction_uuid: String,
    pub total_amount: i64,
    pub ref_id: String,
    pub result: CallbackResult,
}

/// Verifies a success redirect and applies it. Signed payloads are checked
/// against the merchant key; the unsigned legacy triple is checked with the
/// gateway's status API.
pub async fn confirm_success(
    state: &AppState,
    callback: SuccessCallback,
) -> Result<ConfirmedPayment, AppError> {
    let config = &state.config.esewa;

    let (transaction_uuid, claimed_amount, ref_id, claimed_product, signed) =
        match callback.data.as_deref() {
            Some(data) => {
                let payload = CallbackPayload::decode(data)?;
                payload.verify(&config.secret_key)?;
                if payload.status != "COMPLETE" {
                    return Err(AppError::Gateway(format!(
                        "gateway reported status {}",
                        payload.status
                    )));
                }
                (
                    payload.transaction_uuid,
                    payload.total_amount,
                    payload.transaction_code,
                    Some(payload.product_code),
                    true,
                )
            }
            None => match (callback.oid, callback.amt, callback.ref_id) {
                (Some(oid), Some(amt), Some(ref_id)) => (oid, amt, ref_id, None, false),
                _ => return Err(AppError::Gateway("malformed success callback".into())),
            },
        };

    let claimed_amount = signature::parse_amount(&claimed_amount)
        .ok_or_else(|| AppError::Gateway(format!("unreadable amount {claimed_amount:?}")))?;

    let attempt = {
        let db = state.db()?;
        load_attempt(&db, &transaction_uuid)?.0
    };

    if claimed_amount != attempt.amount {
        return Err(AppError::Gateway(format!(
            "amount mismatch: gateway reported {claimed_amount}, expected {}",
            attempt.amount
        )));
    }
    if let Some(claimed) = claimed_product.as_deref() {
        if claimed != attempt.product_code {
            return Err(AppError::Gateway("product code mismatch".into()));
        }
    }

    let ref_id = if signed {
        ref_id
    } else {
        let status = ask_gateway(state, &attempt).await?;
        if status.status != GatewayStatus::Complete {
            return Err(AppError::Gateway(format!(
                "gateway reports transaction as {:?}",
                status.status
            )));
        }
        match status.ref_id {
            Some(confirmed) if confirmed != ref_id => {
                return Err(AppError::Gateway("reference id mismatch".into()));
            }
            _ => ref_id,
        }
    };

    let result = {
        let mut db = state.db()?;
        handle_callback(
            &mut db,
            &transaction_uuid,
            CallbackOutcome::Success {
                transaction_id: ref_id.clone(),
            },
        )?
    };

    Ok(ConfirmedPayment {
        transaction_uuid,
        total_amount: attempt.amount,
        ref_id,
        result,
    })
}

#[derive(Debug, Clone)]
pub enum FailureResolution {
    /// The gateway confirmed the attempt did not go through.
    Reverted(Booking),
    /// The gateway reports the attempt as paid after all.
    Settled(ConfirmedPayment),
    /// Not final, not the active attempt, or the gateway was unreachable.
    Unchanged(Booking),
}

/// Handles the failure redirect. The redirect itself is unsigned, so the
/// attempt's fate is taken from the gateway's status API before anything is
/// written.
pub async fn confirm_failure(
    state: &AppState,
    correlation_key: &str,
) -> Result<FailureResolution, AppError> {
    let (attempt, booking) = {
        let db = state.db()?;
        load_attempt(&db, correlation_key)?
    };
    if !awaiting(&booking, correlation_key) {
        tracing::info!(correlation_key, "failure redirect for inactive attempt ignored");
        return Ok(FailureResolution::Unchanged(booking));
    }

    let status = match ask_gateway(state, &attempt).await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(error = %e, correlation_key, "could not confirm failed payment");
            return Ok(FailureResolution::Unchanged(booking));
        }
    };

    let resolution = match outcome_for(&status)? {
        Some(CallbackOutcome::Success { transaction_id }) => {
            let result = {
                let mut db = state.db()?;
                handle_callback(
                    &mut db,
                    correlation_key,
                    CallbackOutcome::Success {
                        transaction_id: transaction_id.clone(),
                    },
                )?
            };
            FailureResolution::Settled(ConfirmedPayment {
                transaction_uuid: attempt.transaction_uuid,
                total_amount: attempt.amount,
                ref_id: transaction_id,
                result,
            })
        }
        Some(CallbackOutcome::Failure) => {
            let mut db = state.db()?;
            match handle_callback(&mut db, correlation_key, CallbackOutcome::Failure)? {
                CallbackResult::Applied(b) => FailureResolution::Reverted(b),
                CallbackResult::Unchanged(b) => FailureResolution::Unchanged(b),
            }
        }
        None => FailureResolution::Unchanged(booking),
    };

    tracing::info!(
        correlation_key,
        gateway_status = ?status.status,
        "payment failure redirect resolved"
    );
    Ok(resolution)
}

// ── Reconciliation ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub gateway_status: GatewayStatus,
    pub booking: Booking,
}

/// Asks the gateway about the booking's latest attempt and applies the answer.
/// Covers payments still pending and ones reverted by a failure redirect.
/// Non-final gateway states leave the booking as it is.
pub async fn reconcile(
    state: &AppState,
    booking_id: &str,
    actor: &Actor,
) -> Result<Reconciliation, AppError> {
    let booking = {
        let db = state.db()?;
        queries::get_booking_by_id(&db, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?
    };

    let allowed = actor.is_admin()
        || matches!(
            actor,
            Actor::User { id, role: Role::Customer } if *id == booking.customer_id
        );
    if !allowed {
        return Err(AppError::Forbidden(
            "only the booking's customer or an admin can verify its payment".into(),
        ));
    }

    let Some(transaction_uuid) = booking.gateway_transaction_uuid.clone() else {
        return Err(AppError::InvalidTransition(
            "no online payment has been initiated for this booking".into(),
        ));
    };
    let open = matches!(
        (booking.status, booking.payment_status),
        (BookingStatus::Booked, PaymentStatus::Pending)
            | (BookingStatus::Scheduled, PaymentStatus::Failed)
    );
    if !open {
        return Err(AppError::InvalidTransition(
            "no online payment is awaiting confirmation".into(),
        ));
    }

    let attempt = {
        let db = state.db()?;
        load_attempt(&db, &transaction_uuid)?.0
    };
    let status = ask_gateway(state, &attempt).await?;

    tracing::info!(
        booking_id = %booking_id,
        transaction_uuid = %transaction_uuid,
        gateway_status = ?status.status,
        "payment reconciled against gateway"
    );

    let booking = match outcome_for(&status)? {
        Some(outcome) => {
            let mut db = state.db()?;
            handle_callback(&mut db, &transaction_uuid, outcome)?
                .booking()
                .clone()
        }
        None => booking,
    };

    Ok(Reconciliation {
        gateway_status: status.status,
        booking,
    })
}

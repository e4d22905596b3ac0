use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Redirect;
use serde::Deserialize;

use crate::services::payment::{
    self, CallbackResult, ConfirmedPayment, FailureResolution, SuccessCallback,
};
use crate::state::AppState;

// Gateway redirects land here from the customer's browser. Every outcome,
// including internal failures, ends in a redirect to the frontend. Neither
// redirect is trusted on its own: success needs a signature or a status check,
// failure always gets a status check.

fn frontend_redirect(state: &AppState, path: &str, params: &[(&str, &str)]) -> Redirect {
    let base = format!("{}{path}", state.config.frontend_url);
    let url = if params.is_empty() {
        reqwest::Url::parse(&base)
    } else {
        reqwest::Url::parse_with_params(&base, params)
    };
    match url {
        Ok(url) => Redirect::to(url.as_str()),
        Err(e) => {
            tracing::error!(error = %e, base = %base, "invalid frontend url");
            Redirect::to(&base)
        }
    }
}

fn generic_failure(state: &AppState) -> Redirect {
    frontend_redirect(state, "/payment/failure", &[])
}

fn success_redirect(state: &AppState, confirmed: &ConfirmedPayment) -> Redirect {
    let amount = confirmed.total_amount.to_string();
    frontend_redirect(
        state,
        "/payment/success",
        &[
            ("oid", confirmed.transaction_uuid.as_str()),
            ("amt", amount.as_str()),
            ("refId", confirmed.ref_id.as_str()),
        ],
    )
}

// GET /api/payments/esewa/success
pub async fn esewa_success(
    State(state): State<Arc<AppState>>,
    Query(callback): Query<SuccessCallback>,
) -> Redirect {
    match payment::confirm_success(&state, callback).await {
        Ok(confirmed) => {
            tracing::info!(
                transaction_uuid = %confirmed.transaction_uuid,
                ref_id = %confirmed.ref_id,
                applied = matches!(confirmed.result, CallbackResult::Applied(_)),
                "payment success callback handled"
            );
            success_redirect(&state, &confirmed)
        }
        Err(e) => {
            tracing::warn!(error = %e, "payment success callback rejected");
            generic_failure(&state)
        }
    }
}

// GET /api/payments/esewa/failure
#[derive(Deserialize)]
pub struct FailureQuery {
    pub pid: Option<String>,
}

pub async fn esewa_failure(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FailureQuery>,
) -> Redirect {
    let Some(pid) = query.pid.filter(|p| !p.trim().is_empty()) else {
        tracing::warn!("payment failure callback without pid");
        return generic_failure(&state);
    };

    match payment::confirm_failure(&state, &pid).await {
        Ok(FailureResolution::Settled(confirmed)) => {
            tracing::info!(transaction_uuid = %pid, "failure redirect for a completed payment");
            success_redirect(&state, &confirmed)
        }
        Ok(resolution) => {
            tracing::info!(
                transaction_uuid = %pid,
                reverted = matches!(resolution, FailureResolution::Reverted(_)),
                "payment failure callback handled"
            );
            frontend_redirect(&state, "/payment/failure", &[("pid", pid.as_str())])
        }
        Err(e) => {
            tracing::warn!(error = %e, transaction_uuid = %pid, "payment failure callback rejected");
            generic_failure(&state)
        }
    }
}

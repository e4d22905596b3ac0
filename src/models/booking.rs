use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub customer_id: String,
    pub vendor_id: String,
    pub service_id: Option<String>,
    pub event_id: String,
    pub service_price: Option<i64>,
    pub message: Option<String>,
    pub status: BookingStatus,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_status: PaymentStatus,
    pub vendor_confirmed: bool,
    pub gateway_transaction_uuid: Option<String>,
    pub gateway_product_code: Option<String>,
    pub gateway_amount: Option<i64>,
    pub gateway_transaction_id: Option<String>,
    pub gateway_order_id: Option<String>,
    /// Bumped on every write; guards conditional updates.
    #[serde(skip)]
    pub version: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: BookingStatus,
    pub note: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Booked,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Accepted => "Accepted",
            BookingStatus::Rejected => "Rejected",
            BookingStatus::Scheduled => "Scheduled",
            BookingStatus::InProgress => "InProgress",
            BookingStatus::Completed => "Completed",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::Booked => "Booked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(BookingStatus::Pending),
            "Accepted" => Some(BookingStatus::Accepted),
            "Rejected" => Some(BookingStatus::Rejected),
            "Scheduled" => Some(BookingStatus::Scheduled),
            "InProgress" => Some(BookingStatus::InProgress),
            "Completed" => Some(BookingStatus::Completed),
            "Cancelled" => Some(BookingStatus::Cancelled),
            "Booked" => Some(BookingStatus::Booked),
            _ => None,
        }
    }

    /// Note written to the history when the caller doesn't supply one.
    pub fn default_note(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "Booking requested",
            BookingStatus::Accepted => "Booking accepted by vendor",
            BookingStatus::Rejected => "Booking rejected by vendor",
            BookingStatus::Scheduled => "Booking scheduled",
            BookingStatus::InProgress => "Booking in progress",
            BookingStatus::Completed => "Booking completed",
            BookingStatus::Cancelled => "Booking cancelled",
            BookingStatus::Booked => "Booking confirmed, awaiting online payment",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Online => "online",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "online" => Some(PaymentMethod::Online),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// One hand-off to the gateway. A booking keeps its latest attempt on the row;
/// earlier ones stay here so late callbacks for them still resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttempt {
    pub transaction_uuid: String,
    pub booking_id: String,
    pub product_code: String,
    pub amount: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub vendor_id: String,
    pub event_id: String,
    pub service_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetail {
    #[serde(flatten)]
    pub booking: Booking,
    pub status_history: Vec<StatusHistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Accepted,
            BookingStatus::Rejected,
            BookingStatus::Scheduled,
            BookingStatus::InProgress,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::Booked,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::parse("pending"), None);
    }

    #[test]
    fn payment_fields_serialize_lowercase() {
        assert_eq!(serde_json::to_value(PaymentMethod::Online).unwrap(), "online");
        assert_eq!(serde_json::to_value(PaymentStatus::Failed).unwrap(), "failed");
        assert_eq!(serde_json::to_value(BookingStatus::InProgress).unwrap(), "InProgress");
    }
}

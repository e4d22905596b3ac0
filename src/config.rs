use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub public_url: String,
    pub frontend_url: String,
    pub esewa: EsewaConfig,
}

/// Merchant credentials and endpoints for the eSewa gateway.
#[derive(Clone, Debug)]
pub struct EsewaConfig {
    pub product_code: String,
    pub secret_key: String,
    pub form_url: String,
    pub status_url: String,
    pub success_url: String,
    pub failure_url: String,
    pub tax_percent: i64,
    pub default_amount: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let public_url = env::var("PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "eventbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string())
                .trim_end_matches('/')
                .to_string(),
            esewa: EsewaConfig {
                product_code: env::var("ESEWA_PRODUCT_CODE")
                    .unwrap_or_else(|_| "EPAYTEST".to_string()),
                secret_key: env::var("ESEWA_SECRET_KEY")
                    .unwrap_or_else(|_| "8gBm/:&EnhH.1/q".to_string()),
                form_url: env::var("ESEWA_FORM_URL").unwrap_or_else(|_| {
                    "https://rc-epay.esewa.com.np/api/epay/main/v2/form".to_string()
                }),
                status_url: env::var("ESEWA_STATUS_URL").unwrap_or_else(|_| {
                    "https://rc.esewa.com.np/api/epay/transaction/status/".to_string()
                }),
                success_url: format!("{public_url}/api/payments/esewa/success"),
                failure_url: format!("{public_url}/api/payments/esewa/failure"),
                tax_percent: env::var("ESEWA_TAX_PERCENT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
                default_amount: env::var("DEFAULT_PAYMENT_AMOUNT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            },
            public_url,
        }
    }
}

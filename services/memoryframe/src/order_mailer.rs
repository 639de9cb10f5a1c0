//! Order form submission via the EmailJS REST API.
//!
//! [`OrderMailer`] validates the customer's details locally and then posts a
//! single templated email. Delivery is fire-and-forget: a failed send is
//! reported to the caller and never retried.

use crate::config::EmailConfig;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

/// Error type for order submission failures
#[derive(Debug, Error)]
pub enum OrderError {
    /// Required customer details missing
    #[error("{0}")]
    Validation(String),

    /// Email service ids are not configured
    #[error("Email service unavailable.")]
    NotConfigured,

    /// The underlying HTTP request failed (network, DNS, timeout, etc.)
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The email service returned a non-2xx status code
    #[error("Email service returned HTTP {0}")]
    HttpStatus(u16),
}

/// Customer details from the order form
#[derive(Debug, Clone, Default)]
pub struct OrderRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub requirements: String,
}

/// Body of a send request
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    template_params: TemplateParams<'a>,
}

/// Fields the order template expects
#[derive(Debug, Serialize, PartialEq)]
struct TemplateParams<'a> {
    customer_name: &'a str,
    customer_email: &'a str,
    customer_phone: &'a str,
    requirements: &'a str,
    package: &'a str,
    price: &'a str,
}

/// Sends order notifications through the transactional email API
pub struct OrderMailer {
    client: reqwest::Client,
    config: EmailConfig,
}

impl OrderMailer {
    pub fn new(config: EmailConfig, timeout: Duration) -> Result<Self, OrderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    /// Validate and send one order
    #[instrument(skip(self, order))]
    pub async fn submit(&self, order: &OrderRequest) -> Result<(), OrderError> {
        let order = normalize(order)?;

        if self.config.service_id.is_empty()
            || self.config.template_id.is_empty()
            || self.config.public_key.is_empty()
        {
            return Err(OrderError::NotConfigured);
        }

        let body = SendRequest {
            service_id: &self.config.service_id,
            template_id: &self.config.template_id,
            user_id: &self.config.public_key,
            template_params: template_params(&order, &self.config),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OrderError::HttpStatus(response.status().as_u16()));
        }

        info!(package = %self.config.package, "Order submitted");
        Ok(())
    }
}

/// Trim every field and require name, email and phone
fn normalize(order: &OrderRequest) -> Result<OrderRequest, OrderError> {
    let order = OrderRequest {
        name: order.name.trim().to_string(),
        email: order.email.trim().to_string(),
        phone: order.phone.trim().to_string(),
        requirements: order.requirements.trim().to_string(),
    };

    if order.name.is_empty() || order.email.is_empty() || order.phone.is_empty() {
        return Err(OrderError::Validation(
            "Please fill in name, email, and phone.".to_string(),
        ));
    }

    Ok(order)
}

fn template_params<'a>(order: &'a OrderRequest, config: &'a EmailConfig) -> TemplateParams<'a> {
    TemplateParams {
        customer_name: &order.name,
        customer_email: &order.email,
        customer_phone: &order.phone,
        requirements: &order.requirements,
        package: &config.package,
        price: &config.price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> OrderRequest {
        OrderRequest {
            name: " Ana ".to_string(),
            email: "ana@example.com".to_string(),
            phone: "555-0100".to_string(),
            requirements: "Gold frame\n".to_string(),
        }
    }

    #[test]
    fn test_normalize_trims_fields() {
        let normalized = normalize(&order()).unwrap();
        assert_eq!(normalized.name, "Ana");
        assert_eq!(normalized.requirements, "Gold frame");
    }

    #[test]
    fn test_normalize_requires_contact_details() {
        let mut missing_phone = order();
        missing_phone.phone = "  ".to_string();
        let err = normalize(&missing_phone).unwrap_err();
        assert_eq!(err.to_string(), "Please fill in name, email, and phone.");

        let mut no_requirements = order();
        no_requirements.requirements = String::new();
        assert!(normalize(&no_requirements).is_ok());
    }

    #[test]
    fn test_template_params_shape() {
        let config = EmailConfig::default();
        let normalized = normalize(&order()).unwrap();
        let value = serde_json::to_value(template_params(&normalized, &config)).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "customer_name": "Ana",
                "customer_email": "ana@example.com",
                "customer_phone": "555-0100",
                "requirements": "Gold frame",
                "package": "Premium Package",
                "price": "$49.99"
            })
        );
    }

    #[tokio::test]
    async fn test_submit_unconfigured_fails_before_sending() {
        let mailer = OrderMailer::new(EmailConfig::default(), Duration::from_secs(1)).unwrap();
        let err = mailer.submit(&order()).await.unwrap_err();
        assert!(matches!(err, OrderError::NotConfigured));
    }

    #[tokio::test]
    async fn test_submit_validates_before_config() {
        let mailer = OrderMailer::new(EmailConfig::default(), Duration::from_secs(1)).unwrap();
        let err = mailer.submit(&OrderRequest::default()).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[test]
    fn test_error_display_http_status() {
        assert_eq!(
            OrderError::HttpStatus(502).to_string(),
            "Email service returned HTTP 502"
        );
    }
}

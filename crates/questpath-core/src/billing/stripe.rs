//! [`PaymentGateway`] over the Stripe REST API.
//!
//! Requests are form-encoded with bearer auth. Responses are decoded into
//! private wire structs and converted to [`Customer`] / [`Subscription`]
//! here, so callers never see provider JSON.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{BillingConfig, CheckoutRequest, Customer, PaymentGateway, Subscription};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    config: BillingConfig,
}

#[derive(Debug, Deserialize)]
struct WireList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WireCheckoutSession {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCustomer {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct WireSubscription {
    id: String,
    #[serde(default)]
    current_period_end: Option<i64>,
    #[serde(default)]
    items: Option<WireList<WireSubscriptionItem>>,
}

#[derive(Debug, Deserialize)]
struct WireSubscriptionItem {
    #[serde(default)]
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: Option<String>,
}

impl From<WireSubscription> for Subscription {
    /// Newer API versions moved the period end onto subscription items.
    fn from(wire: WireSubscription) -> Self {
        let from_items = wire
            .items
            .as_ref()
            .and_then(|items| items.data.first())
            .and_then(|item| item.current_period_end);
        let current_period_end = wire
            .current_period_end
            .or(from_items)
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
        Self {
            id: wire.id,
            current_period_end,
        }
    }
}

impl From<WireCustomer> for Customer {
    fn from(wire: WireCustomer) -> Self {
        Self {
            id: wire.id,
            email: wire.email.filter(|e| !e.is_empty()),
        }
    }
}

impl StripeGateway {
    pub fn new(config: BillingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.api_base.trim_end_matches('/'))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .bearer_auth(&self.config.api_key)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
    }

    fn checkout_form(&self, request: &CheckoutRequest<'_>) -> Vec<(&'static str, String)> {
        vec![
            ("mode", "subscription".to_owned()),
            ("payment_method_types[0]", "card".to_owned()),
            ("line_items[0][quantity]", "1".to_owned()),
            ("line_items[0][price_data][currency]", self.config.currency.clone()),
            ("line_items[0][price_data][unit_amount]", self.config.price_cents.to_string()),
            ("line_items[0][price_data][recurring][interval]", "month".to_owned()),
            ("line_items[0][price_data][product_data][name]", self.config.product_name.clone()),
            ("success_url", self.config.success_url()),
            ("cancel_url", self.config.cancel_url()),
            ("customer_email", request.email.to_owned()),
            ("client_reference_id", request.user_id.to_string()),
            ("metadata[user_id]", request.user_id.to_string()),
            ("metadata[user_email]", request.email.to_owned()),
        ]
    }
}

/// Send a request and decode a successful JSON body. `Ok(None)` on 404.
async fn send_optional<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<Option<T>> {
    let response = request
        .send()
        .await
        .with_context(|| format!("request to {what} failed"))?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WireErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or(body);
        bail!("{what} returned {status}: {message}");
    }
    let decoded = response
        .json::<T>()
        .await
        .with_context(|| format!("failed to decode {what} response"))?;
    Ok(Some(decoded))
}

async fn send<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
    match send_optional(request, what).await? {
        Some(value) => Ok(value),
        None => bail!("{what} returned 404 Not Found"),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(&self, request: &CheckoutRequest<'_>) -> Result<String> {
        let form = self.checkout_form(request);
        let session: WireCheckoutSession =
            send(self.post("checkout/sessions").form(&form), "checkout session").await?;
        debug!(user_id = request.user_id, "checkout session created upstream");
        session.url.context("checkout session has no url")
    }

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let list: WireList<WireCustomer> = send(
            self.get("customers").query(&[("email", email), ("limit", "1")]),
            "customer search",
        )
        .await?;
        Ok(list.data.into_iter().next().map(Customer::from))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> Result<Option<Customer>> {
        let wire: Option<WireCustomer> =
            send_optional(self.get(&format!("customers/{customer_id}")), "customer").await?;
        Ok(wire.filter(|c| !c.deleted).map(Customer::from))
    }

    async fn list_active_subscriptions(&self, customer_id: &str) -> Result<Vec<Subscription>> {
        let list: WireList<WireSubscription> = send(
            self.get("subscriptions").query(&[
                ("customer", customer_id),
                ("status", "active"),
                ("limit", "10"),
            ]),
            "subscription list",
        )
        .await?;
        Ok(list.data.into_iter().map(Subscription::from).collect())
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> Result<Subscription> {
        let wire: WireSubscription = send(
            self.post(&format!("subscriptions/{subscription_id}"))
                .form(&[("cancel_at_period_end", "true")]),
            "subscription update",
        )
        .await?;
        Ok(wire.into())
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<Subscription> {
        let wire: WireSubscription =
            send(self.get(&format!("subscriptions/{subscription_id}")), "subscription").await?;
        Ok(wire.into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn subscription(value: serde_json::Value) -> Subscription {
        serde_json::from_value::<WireSubscription>(value).unwrap().into()
    }

    #[test]
    fn period_end_from_top_level() {
        let sub = subscription(json!({"id": "sub_1", "current_period_end": 1_700_000_000}));
        assert_eq!(sub.id, "sub_1");
        assert_eq!(sub.current_period_end.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn period_end_from_first_item() {
        let sub = subscription(json!({
            "id": "sub_2",
            "items": {"data": [{"current_period_end": 1_800_000_000}, {"current_period_end": 1}]}
        }));
        assert_eq!(sub.current_period_end.unwrap().timestamp(), 1_800_000_000);
    }

    #[test]
    fn period_end_missing() {
        let sub = subscription(json!({"id": "sub_3", "items": {"data": []}}));
        assert_eq!(sub.current_period_end, None);
    }

    #[test]
    fn customer_blank_email_is_none() {
        let wire: WireCustomer = serde_json::from_value(json!({"id": "cus_1", "email": ""})).unwrap();
        assert_eq!(Customer::from(wire).email, None);
    }

    #[test]
    fn checkout_form_carries_user_reference() {
        let gateway = StripeGateway::new(BillingConfig::new("sk_test", "whsec_test")).unwrap();
        let form = gateway.checkout_form(&CheckoutRequest {
            user_id: 42,
            email: "a@example.test",
        });
        let get = |k: &str| form.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("client_reference_id"), Some("42"));
        assert_eq!(get("metadata[user_id]"), Some("42"));
        assert_eq!(get("customer_email"), Some("a@example.test"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("500"));
        assert_eq!(get("mode"), Some("subscription"));
        assert_eq!(
            get("success_url"),
            Some("http://localhost:3000/dashboard?premium=success")
        );
    }
}

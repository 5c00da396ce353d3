//! Typed view of provider notification payloads.
//!
//! The envelope is `{id, type, data: {object}}`. Only the fields the
//! reconciler reads are modelled; everything else is ignored.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
pub const PAYMENT_FAILED: &str = "invoice.payment_failed";

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    data: NotificationData,
}

#[derive(Debug, Clone, Deserialize)]
struct NotificationData {
    object: Value,
}

/// The recognised notification kinds with their decoded objects.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    CheckoutCompleted(CheckoutSession),
    PaymentSucceeded(Invoice),
    SubscriptionDeleted(SubscriptionObject),
    PaymentFailed(Invoice),
    Unrecognized,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CheckoutSession {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub subscription: Option<String>,
}

impl CheckoutSession {
    /// The user this checkout was opened for: `client_reference_id`, falling
    /// back to `metadata.user_id`. Blank values count as absent.
    pub fn user_reference(&self) -> Option<&str> {
        self.client_reference_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                self.metadata
                    .get("user_id")
                    .map(String::as_str)
                    .filter(|s| !s.trim().is_empty())
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Invoice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    parent: Option<InvoiceParent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct InvoiceParent {
    #[serde(default)]
    subscription_details: Option<SubscriptionDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct SubscriptionDetails {
    #[serde(default)]
    subscription: Option<String>,
}

impl Invoice {
    /// Subscription the invoice bills for. Newer API versions nest it under
    /// `parent.subscription_details`.
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_deref().or_else(|| {
            self.parent
                .as_ref()
                .and_then(|p| p.subscription_details.as_ref())
                .and_then(|d| d.subscription.as_deref())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubscriptionObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
}

impl Notification {
    /// Decode the envelope. Fails when the payload is not an event object.
    pub fn from_slice(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Decode the embedded object according to the event type.
    pub fn kind(&self) -> serde_json::Result<NotificationKind> {
        let object = self.data.object.clone();
        Ok(match self.event_type.as_str() {
            CHECKOUT_COMPLETED => NotificationKind::CheckoutCompleted(serde_json::from_value(object)?),
            PAYMENT_SUCCEEDED => NotificationKind::PaymentSucceeded(serde_json::from_value(object)?),
            SUBSCRIPTION_DELETED => {
                NotificationKind::SubscriptionDeleted(serde_json::from_value(object)?)
            }
            PAYMENT_FAILED => NotificationKind::PaymentFailed(serde_json::from_value(object)?),
            _ => NotificationKind::Unrecognized,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> Notification {
        Notification::from_slice(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn checkout_prefers_client_reference_id() {
        let n = parse(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_1",
                "client_reference_id": "42",
                "metadata": {"user_id": "99"},
                "subscription": "sub_1"
            }}
        }));
        let NotificationKind::CheckoutCompleted(session) = n.kind().unwrap() else {
            panic!("expected checkout");
        };
        assert_eq!(session.user_reference(), Some("42"));
        assert_eq!(session.subscription.as_deref(), Some("sub_1"));
    }

    #[test]
    fn checkout_falls_back_to_metadata() {
        let n = parse(json!({
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": {"object": {"client_reference_id": null, "metadata": {"user_id": "7"}}}
        }));
        let NotificationKind::CheckoutCompleted(session) = n.kind().unwrap() else {
            panic!("expected checkout");
        };
        assert_eq!(session.user_reference(), Some("7"));
        assert_eq!(session.subscription, None);
    }

    #[test]
    fn checkout_without_reference() {
        let n = parse(json!({
            "id": "evt_3",
            "type": "checkout.session.completed",
            "data": {"object": {"client_reference_id": "", "metadata": {}}}
        }));
        let NotificationKind::CheckoutCompleted(session) = n.kind().unwrap() else {
            panic!("expected checkout");
        };
        assert_eq!(session.user_reference(), None);
    }

    #[test]
    fn invoice_subscription_from_either_location() {
        let legacy: Invoice =
            serde_json::from_value(json!({"customer_email": "a@b.c", "subscription": "sub_old"}))
                .unwrap();
        assert_eq!(legacy.subscription_id(), Some("sub_old"));

        let nested: Invoice = serde_json::from_value(json!({
            "customer_email": "a@b.c",
            "parent": {"subscription_details": {"subscription": "sub_new"}}
        }))
        .unwrap();
        assert_eq!(nested.subscription_id(), Some("sub_new"));

        let none: Invoice = serde_json::from_value(json!({"customer_email": "a@b.c"})).unwrap();
        assert_eq!(none.subscription_id(), None);
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        let n = parse(json!({
            "id": "evt_4",
            "type": "customer.created",
            "data": {"object": {"id": "cus_1"}}
        }));
        assert_eq!(n.kind().unwrap(), NotificationKind::Unrecognized);
    }

    #[test]
    fn subscription_deleted_reads_customer() {
        let n = parse(json!({
            "id": "evt_5",
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_1", "customer": "cus_9"}}
        }));
        let NotificationKind::SubscriptionDeleted(sub) = n.kind().unwrap() else {
            panic!("expected deletion");
        };
        assert_eq!(sub.customer.as_deref(), Some("cus_9"));
    }

    #[test]
    fn non_event_payloads_fail() {
        assert!(Notification::from_slice(b"not json").is_err());
        assert!(Notification::from_slice(br#"{"type":"x"}"#).is_err());
    }

    #[test]
    fn wrongly_typed_object_fails_kind() {
        let n = parse(json!({
            "id": "evt_6",
            "type": "invoice.payment_succeeded",
            "data": {"object": {"customer_email": 17}}
        }));
        assert!(n.kind().is_err());
    }
}

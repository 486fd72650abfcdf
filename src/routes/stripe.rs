use axum::Json;
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use axum::{http::StatusCode, response::Response};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::synchronizer::{remove_subscription, sync_subscription};
use crate::billing::BillingError;
use crate::responses::JsonResponse;
use crate::services::stripe::{StripeEvent, SubscriptionInfo};
use crate::state::AppState;

// Small helper: nested json lookup
fn jget<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str()
}

fn extract_i64(val: &serde_json::Value, path: &[&str]) -> Option<i64> {
    jget(val, path)?.as_i64()
}

fn extract_bool(val: &serde_json::Value, path: &[&str]) -> Option<bool> {
    jget(val, path)?.as_bool()
}

fn extract_checkout_user_id(event: &serde_json::Value) -> Option<Uuid> {
    // checkout.session payload shape
    let obj = jget(event, &["data", "object"])?;
    if let Some(uid) = obj
        .get("metadata")
        .and_then(|m| m.get("user_id"))
        .and_then(|v| v.as_str())
    {
        if let Ok(id) = Uuid::parse_str(uid) {
            return Some(id);
        }
    }
    if let Some(id_str) = obj.get("client_reference_id").and_then(|v| v.as_str()) {
        if let Ok(id) = Uuid::parse_str(id_str) {
            return Some(id);
        }
    }
    None
}

fn extract_customer_id(event: &serde_json::Value) -> Option<String> {
    extract_str(event, &["data", "object", "customer"]).map(|s| s.to_string())
}

fn extract_subscription_id(event: &serde_json::Value) -> Option<String> {
    extract_str(event, &["data", "object", "subscription"]).map(|s| s.to_string())
}

/// Map a customer.subscription.* payload into the gateway shape so the
/// synchronizer can skip the extra Stripe fetch.
fn subscription_info_from_payload(event: &serde_json::Value) -> Option<SubscriptionInfo> {
    let id = extract_str(event, &["data", "object", "id"])?.to_string();
    let customer = extract_customer_id(event)?;
    let status = extract_str(event, &["data", "object", "status"])
        .unwrap_or("unknown")
        .to_string();

    let price = jget(event, &["data", "object", "items", "data"])
        .and_then(|items| items.as_array())
        .and_then(|items| items.first())
        .and_then(|item| item.get("price"));

    Some(SubscriptionInfo {
        id,
        customer,
        status,
        price_id: price
            .and_then(|p| p.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        currency: price
            .and_then(|p| p.get("currency"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        amount_due: price.and_then(|p| p.get("unit_amount")).and_then(|v| v.as_i64()),
        current_period_start: extract_i64(event, &["data", "object", "current_period_start"]),
        current_period_end: extract_i64(event, &["data", "object", "current_period_end"]),
        cancel_at_period_end: extract_bool(event, &["data", "object", "cancel_at_period_end"])
            .unwrap_or(false),
        canceled_at: extract_i64(event, &["data", "object", "canceled_at"]),
        trial_end: extract_i64(event, &["data", "object", "trial_end"]),
    })
}

fn ack() -> Response {
    Json(serde_json::json!({ "received": true })).into_response()
}

// POST /api/stripe/webhook
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature").into_response(),
    };

    let evt = match app_state.stripe.verify_webhook(&body, sig) {
        Ok(e) => e,
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            return (StatusCode::BAD_REQUEST, "invalid webhook").into_response();
        }
    };

    match app_state.event_log.has_processed_event(&evt.id).await {
        Ok(true) => {
            info!(event_id = %evt.id, "stripe event already processed; acknowledging");
            return ack();
        }
        Ok(false) => {}
        Err(err) => {
            error!(?err, event_id = %evt.id, "failed to consult stripe event log");
            return JsonResponse::server_error("event log unavailable").into_response();
        }
    }

    match handle_event(&app_state, &evt).await {
        Ok(()) => {
            // Recorded only after success so Stripe's retry can redeliver a
            // failed event.
            if let Err(err) = app_state.event_log.record_event(&evt.id).await {
                warn!(?err, event_id = %evt.id, "failed to record processed stripe event");
            }
            ack()
        }
        Err(err) => {
            error!(
                ?err,
                event_id = %evt.id,
                evt_type = %evt.r#type,
                "stripe webhook handler failed"
            );
            JsonResponse::server_error("webhook handler failed").into_response()
        }
    }
}

async fn handle_event(app_state: &AppState, evt: &StripeEvent) -> Result<(), BillingError> {
    let evt_type = evt.r#type.as_str();
    let payload = &evt.payload;

    match evt_type {
        // Checkout completion carries the user id; this is where the
        // user -> Stripe customer mapping is established.
        "checkout.session.completed" => {
            let user_id = extract_checkout_user_id(payload);
            let customer_id = extract_customer_id(payload);

            match (user_id, customer_id.as_deref()) {
                (Some(uid), Some(cus)) => {
                    app_state.db.upsert_stripe_customer(uid, cus).await?;
                }
                _ => {
                    warn!(evt_type, "checkout completion without resolvable user and customer");
                }
            }

            match extract_subscription_id(payload) {
                Some(sub_id) => {
                    // The session payload carries no subscription detail;
                    // fetch the full object from Stripe.
                    sync_subscription(
                        app_state.db.as_ref(),
                        app_state.stripe.as_ref(),
                        &app_state.catalog,
                        &sub_id,
                        None,
                    )
                    .await?;
                }
                None => {
                    info!(evt_type, "checkout completion without subscription; nothing to sync");
                }
            }
            Ok(())
        }

        "customer.subscription.created" | "customer.subscription.updated" => {
            match subscription_info_from_payload(payload) {
                Some(info) => {
                    let sub_id = info.id.clone();
                    sync_subscription(
                        app_state.db.as_ref(),
                        app_state.stripe.as_ref(),
                        &app_state.catalog,
                        &sub_id,
                        Some(info),
                    )
                    .await?;
                }
                None => {
                    warn!(evt_type, "subscription event payload missing id or customer");
                }
            }
            Ok(())
        }

        "customer.subscription.deleted" => {
            let sub_id = match extract_str(payload, &["data", "object", "id"]) {
                Some(id) => id.to_string(),
                None => {
                    warn!(evt_type, "subscription deletion payload missing id");
                    return Ok(());
                }
            };
            let scheduled = extract_bool(payload, &["data", "object", "cancel_at_period_end"])
                .unwrap_or(false);

            // Claims are recomputed from the surviving records; the scheduled
            // end-of-period death of a superseded subscription must not touch
            // the winner's access.
            remove_subscription(
                app_state.db.as_ref(),
                app_state.stripe.as_ref(),
                &app_state.catalog,
                &sub_id,
            )
            .await?;

            info!(
                subscription_id = %sub_id,
                scheduled,
                "processed subscription deletion"
            );
            Ok(())
        }

        "invoice.paid" | "invoice.payment_failed" => {
            match extract_subscription_id(payload) {
                Some(sub_id) => {
                    // Invoice payloads lag the subscription state; refetch so
                    // past_due/active transitions land.
                    sync_subscription(
                        app_state.db.as_ref(),
                        app_state.stripe.as_ref(),
                        &app_state.catalog,
                        &sub_id,
                        None,
                    )
                    .await?;
                }
                None => {
                    info!(evt_type, "invoice event without subscription; nothing to sync");
                }
            }
            Ok(())
        }

        // Other events acknowledged to avoid retries; primary logic handled above.
        _ => {
            info!(evt_type, "unhandled stripe event acknowledged");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::resolver::PriceCatalog;
    use crate::config::{Config, StripeSettings};
    use crate::db::mock_db::{MockBillingDb, MockEventLog};
    use crate::models::plan::PlanTier;
    use crate::services::stripe::MockStripeGateway;
    use crate::state::AppState;
    use axum::extract::State as AxumState;
    use axum::http::{HeaderMap, HeaderValue};
    use std::sync::Arc;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            database_url: String::new(),
            frontend_origin: "https://app.example.com".into(),
            stripe: StripeSettings {
                secret_key: "stub".into(),
                webhook_secret: "whsec_stub".into(),
            },
            pro_price_ids: vec!["price_pro".into()],
            business_price_ids: vec!["price_biz".into()],
        })
    }

    fn test_state(
        db: Arc<MockBillingDb>,
        stripe: Arc<MockStripeGateway>,
        event_log: Arc<MockEventLog>,
    ) -> AppState {
        let config = test_config();
        AppState {
            db,
            event_log,
            stripe,
            catalog: Arc::new(PriceCatalog::new(
                config.pro_price_ids.clone(),
                config.business_price_ids.clone(),
            )),
            config,
        }
    }

    fn stub_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_static("t=1,v1=stub"));
        headers
    }

    async fn deliver(state: AppState, body: serde_json::Value) -> Response {
        webhook(
            AxumState(state),
            stub_headers(),
            axum::body::Bytes::from(serde_json::to_vec(&body).unwrap()),
        )
        .await
    }

    fn subscription_payload(
        evt_id: &str,
        evt_type: &str,
        sub_id: &str,
        customer: &str,
        status: &str,
        price_id: &str,
        unit_amount: i64,
        period_end: i64,
        cancel_at_period_end: bool,
    ) -> serde_json::Value {
        serde_json::json!({
            "id": evt_id,
            "type": evt_type,
            "data": { "object": {
                "id": sub_id,
                "customer": customer,
                "status": status,
                "cancel_at_period_end": cancel_at_period_end,
                "current_period_start": period_end - 2_592_000,
                "current_period_end": period_end,
                "items": { "data": [ { "price": {
                    "id": price_id,
                    "unit_amount": unit_amount,
                    "currency": "usd"
                } } ] }
            } }
        })
    }

    #[tokio::test]
    async fn webhook_missing_signature_header_is_rejected() {
        let state = test_state(
            Arc::new(MockBillingDb::default()),
            Arc::new(MockStripeGateway::new()),
            Arc::new(MockEventLog::default()),
        );

        let resp = webhook(
            AxumState(state),
            HeaderMap::new(),
            axum::body::Bytes::from_static(b"{}"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_checkout_completed_maps_customer_and_syncs_subscription() {
        let user_id = Uuid::new_v4();
        let db = Arc::new(MockBillingDb::default());
        let stripe = Arc::new(MockStripeGateway::new().with_subscription(
            crate::services::stripe::SubscriptionInfo {
                id: "sub_1".into(),
                customer: "cus_1".into(),
                status: "active".into(),
                price_id: Some("price_pro".into()),
                currency: Some("usd".into()),
                amount_due: Some(1500),
                current_period_start: Some(1_797_000_000),
                current_period_end: Some(1_800_000_000),
                cancel_at_period_end: false,
                canceled_at: None,
                trial_end: None,
            },
        ));
        let state = test_state(db.clone(), stripe, Arc::new(MockEventLog::default()));

        let body = serde_json::json!({
            "id": "evt_checkout",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_123",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "user_id": user_id.to_string() }
            } }
        });

        let resp = deliver(state, body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(
            db.customers.lock().unwrap().get("cus_1").copied(),
            Some(user_id)
        );
        let claims = db.claims_for(user_id).expect("claims written");
        assert_eq!(claims.plan, PlanTier::Pro);
        assert!(claims.stripe_active);
        assert!(!claims.stripe_past_due);
    }

    #[tokio::test]
    async fn webhook_subscription_updated_syncs_from_payload() {
        let user_id = Uuid::new_v4();
        let db = Arc::new(MockBillingDb::default().with_customer("cus_1", user_id));
        // No subscription seeded in the gateway: the payload must be enough.
        let state = test_state(
            db.clone(),
            Arc::new(MockStripeGateway::new()),
            Arc::new(MockEventLog::default()),
        );

        let body = subscription_payload(
            "evt_upd",
            "customer.subscription.updated",
            "sub_1",
            "cus_1",
            "active",
            "price_biz",
            30_000,
            1_800_000_000,
            false,
        );

        let resp = deliver(state, body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let claims = db.claims_for(user_id).unwrap();
        assert_eq!(claims.plan, PlanTier::Business);
        assert!(claims.stripe_active);
    }

    #[tokio::test]
    async fn webhook_deleted_superseded_subscription_keeps_winner_claims() {
        let user_id = Uuid::new_v4();
        let db = Arc::new(MockBillingDb::default().with_customer("cus_1", user_id));
        let stripe = Arc::new(MockStripeGateway::new());
        let event_log = Arc::new(MockEventLog::default());

        // A Pro subscription arrives first, then a Business one wins the
        // reconciliation; the Pro record ends up superseded with cancellation
        // scheduled at period end.
        let resp = deliver(
            test_state(db.clone(), stripe.clone(), event_log.clone()),
            subscription_payload(
                "evt_1",
                "customer.subscription.created",
                "sub_pro",
                "cus_1",
                "active",
                "price_pro",
                1500,
                1_800_000_000,
                false,
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = deliver(
            test_state(db.clone(), stripe.clone(), event_log.clone()),
            subscription_payload(
                "evt_2",
                "customer.subscription.created",
                "sub_biz",
                "cus_1",
                "active",
                "price_biz",
                30_000,
                1_799_000_000,
                false,
            ),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(db.subscription("sub_pro").unwrap().superseded);
        assert!(stripe
            .cancel_requests
            .lock()
            .unwrap()
            .contains(&("sub_pro".to_string(), true)));

        // The superseded Pro subscription dies at period end. Its deletion
        // must not revoke the Business claims.
        let resp = deliver(
            test_state(db.clone(), stripe.clone(), event_log.clone()),
            serde_json::json!({
                "id": "evt_3",
                "type": "customer.subscription.deleted",
                "data": { "object": {
                    "id": "sub_pro",
                    "customer": "cus_1",
                    "status": "canceled",
                    "cancel_at_period_end": true
                } }
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let claims = db.claims_for(user_id).unwrap();
        assert_eq!(claims.plan, PlanTier::Business);
        assert!(claims.stripe_active);
        // History survives: the record is soft-marked, not deleted.
        assert_eq!(db.subscription("sub_pro").unwrap().status, "canceled");
    }

    #[tokio::test]
    async fn webhook_duplicate_event_id_is_not_reprocessed() {
        let user_id = Uuid::new_v4();
        let db = Arc::new(MockBillingDb::default().with_customer("cus_1", user_id));
        let stripe = Arc::new(MockStripeGateway::new());
        let event_log = Arc::new(MockEventLog::default());

        let body = subscription_payload(
            "evt_dup",
            "customer.subscription.updated",
            "sub_1",
            "cus_1",
            "active",
            "price_pro",
            1500,
            1_800_000_000,
            false,
        );

        let resp = deliver(
            test_state(db.clone(), stripe.clone(), event_log.clone()),
            body.clone(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(*db.reconcile_calls.lock().unwrap(), 1);

        let resp = deliver(test_state(db.clone(), stripe, event_log), body).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(*db.reconcile_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn webhook_unknown_event_type_is_acknowledged_without_state_change() {
        let db = Arc::new(MockBillingDb::default());
        let state = test_state(
            db.clone(),
            Arc::new(MockStripeGateway::new()),
            Arc::new(MockEventLog::default()),
        );

        let body = serde_json::json!({
            "id": "evt_misc",
            "type": "customer.created",
            "data": { "object": { "id": "cus_9" } }
        });

        let resp = deliver(state, body).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(db.subscriptions.lock().unwrap().is_empty());
        assert!(db.claims_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_unmatched_customer_is_a_silent_ack() {
        let db = Arc::new(MockBillingDb::default());
        let state = test_state(
            db.clone(),
            Arc::new(MockStripeGateway::new()),
            Arc::new(MockEventLog::default()),
        );

        let body = subscription_payload(
            "evt_orphan",
            "customer.subscription.updated",
            "sub_1",
            "cus_unknown",
            "active",
            "price_pro",
            1500,
            1_800_000_000,
            false,
        );

        let resp = deliver(state, body).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(db.claims_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_invoice_payment_failed_surfaces_past_due_claims() {
        let user_id = Uuid::new_v4();
        let db = Arc::new(MockBillingDb::default().with_customer("cus_1", user_id));
        let stripe = Arc::new(MockStripeGateway::new().with_subscription(
            crate::services::stripe::SubscriptionInfo {
                id: "sub_1".into(),
                customer: "cus_1".into(),
                status: "past_due".into(),
                price_id: Some("price_pro".into()),
                currency: Some("usd".into()),
                amount_due: Some(1500),
                current_period_start: Some(1_797_000_000),
                current_period_end: Some(1_800_000_000),
                cancel_at_period_end: false,
                canceled_at: None,
                trial_end: None,
            },
        ));
        let state = test_state(db.clone(), stripe, Arc::new(MockEventLog::default()));

        let body = serde_json::json!({
            "id": "evt_inv",
            "type": "invoice.payment_failed",
            "data": { "object": {
                "id": "in_1",
                "customer": "cus_1",
                "subscription": "sub_1"
            } }
        });

        let resp = deliver(state, body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let claims = db.claims_for(user_id).unwrap();
        assert_eq!(claims.plan, PlanTier::Pro);
        assert!(!claims.stripe_active);
        assert!(claims.stripe_past_due);
    }

    #[tokio::test]
    async fn webhook_handler_failure_returns_500_and_stays_retryable() {
        let db = Arc::new(MockBillingDb::default());
        // Gateway has no such subscription, so the invoice-driven refetch
        // fails and the handler surfaces a 500.
        let stripe = Arc::new(MockStripeGateway::new());
        let event_log = Arc::new(MockEventLog::default());
        let state = test_state(db, stripe, event_log.clone());

        let body = serde_json::json!({
            "id": "evt_fail",
            "type": "invoice.paid",
            "data": { "object": { "id": "in_9", "subscription": "sub_missing" } }
        });

        let resp = deliver(state, body).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Not recorded as processed: Stripe's retry will be handled afresh.
        assert!(!event_log.seen.lock().unwrap().contains("evt_fail"));
    }
}

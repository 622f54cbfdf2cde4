mod app;
mod auth;
mod error;
mod escrow;
mod ledger;
mod payroll;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use pyrnado_platform::{PgStore, RedisBus, ServiceConfig, apply_schema, connect_database};
use tracing::info;

use crate::app::{AppState, build_router};

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "pyrnado_gateway=info,tower_http=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    apply_schema(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let store = PgStore::new(pool, config.settlement.delay());
    let state = AppState::new(Arc::new(store), Arc::new(redis));
    let router = build_router(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode, header},
    };
    use pyrnado_core::TenantId;
    use pyrnado_memstore::{MemoryStore, RecordingNotifier};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::app::{AppState, build_router};

    struct Harness {
        router: Router,
        notifier: Arc<RecordingNotifier>,
        token: String,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::default());
        let token = store.register_user(TenantId::new()).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::new(store, notifier.clone());
        Harness {
            router: build_router(state),
            notifier,
            token,
        }
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn contract_body() -> Value {
        json!({
            "title": "Storefront rebuild",
            "description": "New checkout flow",
            "client": "Acme",
            "totalAmount": "10000",
            "isPublic": true,
            "milestones": [
                {"title": "Design", "amount": "4000", "dueDate": "2026-12-01"},
                {"title": "Build", "amount": "6000", "dueDate": "2027-01-15"}
            ]
        })
    }

    fn bid_body(name: &str, amount: &str) -> Value {
        json!({
            "contractorName": name,
            "contractorEmail": format!("{}@example.com", name.to_lowercase()),
            "proposal": "Can start Monday",
            "amount": amount
        })
    }

    async fn active_contract(h: &Harness) -> (String, Value) {
        let (status, created) = call(
            &h.router,
            Method::POST,
            "/escrow/contracts",
            Some(&h.token),
            Some(contract_body()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, bid) = call(
            &h.router,
            Method::POST,
            &format!("/escrow/public/{id}/bid"),
            None,
            Some(bid_body("Rhea", "9500")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let bid_id = bid["id"].as_str().unwrap();

        let (status, detail) = call(
            &h.router,
            Method::PUT,
            &format!("/escrow/contracts/{id}/bids/{bid_id}/accept"),
            Some(&h.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (id, detail)
    }

    #[tokio::test]
    async fn healthz_answers_without_credentials() {
        let h = harness().await;
        let response = h
            .router
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tenant_routes_require_a_known_token() {
        let h = harness().await;

        let (status, body) =
            call(&h.router, Method::GET, "/escrow/contracts", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");

        let (status, _) = call(
            &h.router,
            Method::GET,
            "/escrow/contracts",
            Some("not-a-token"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepting_a_bid_activates_the_contract() {
        let h = harness().await;
        let (id, detail) = active_contract(&h).await;

        assert_eq!(detail["status"], "active");
        assert_eq!(detail["contractor"], "Rhea");
        assert_eq!(detail["totalAmount"], "9500");
        assert_eq!(detail["bids"][0]["status"], "accepted");
        assert_eq!(detail["bids"][0]["isVerified"], false);

        let (status, _) = call(
            &h.router,
            Method::GET,
            &format!("/escrow/public/{id}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &h.router,
            Method::POST,
            &format!("/escrow/public/{id}/bid"),
            None,
            Some(bid_body("Late", "100")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Conflict");
    }

    #[tokio::test]
    async fn authenticated_bidders_are_marked_verified() {
        let h = harness().await;
        let (_, created) = call(
            &h.router,
            Method::POST,
            "/escrow/contracts",
            Some(&h.token),
            Some(contract_body()),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let (status, bid) = call(
            &h.router,
            Method::POST,
            &format!("/escrow/public/{id}/bid"),
            Some(&h.token),
            Some(bid_body("Iris", "9000")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(bid["isVerified"], true);
        assert_eq!(bid["status"], "pending");

        let (status, public) = call(
            &h.router,
            Method::GET,
            &format!("/escrow/public/{id}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(public["bidCount"], 1);
        assert!(public.get("bids").is_none());
    }

    #[tokio::test]
    async fn over_release_is_rejected_with_an_error_body() {
        let h = harness().await;
        let (id, _) = active_contract(&h).await;

        let (status, body) = call(
            &h.router,
            Method::PUT,
            &format!("/escrow/contracts/{id}/release"),
            Some(&h.token),
            Some(json!({"amount": "10000.01"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InsufficientFunds");
        assert!(body["message"].as_str().unwrap().contains("10000.01"));

        let (status, body) = call(
            &h.router,
            Method::PUT,
            &format!("/escrow/contracts/{id}/release"),
            Some(&h.token),
            Some(json!({"amount": "2500"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contract"]["lockedAmount"], "7000");
        assert_eq!(body["contract"]["releasedAmount"], "2500");
    }

    #[tokio::test]
    async fn milestone_release_announces_its_settlement() {
        let h = harness().await;
        let (id, detail) = active_contract(&h).await;
        let milestone_id = detail["milestones"][0]["id"].as_str().unwrap().to_string();
        let milestone_uri = format!("/escrow/contracts/{id}/milestones/{milestone_id}");

        let (status, body) = call(
            &h.router,
            Method::PUT,
            &milestone_uri,
            Some(&h.token),
            Some(json!({"status": "released"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "InvalidTransition");

        for next in ["completed", "approved"] {
            let (status, body) = call(
                &h.router,
                Method::PUT,
                &milestone_uri,
                Some(&h.token),
                Some(json!({"status": next})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], next);
        }

        let (status, release) = call(
            &h.router,
            Method::PUT,
            &format!("/escrow/contracts/{id}/release"),
            Some(&h.token),
            Some(json!({"milestoneId": milestone_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(release["milestone"]["status"], "released");
        assert_eq!(release["transaction"]["status"], "pending");

        let task_id = release["settlement"]["id"].as_str().unwrap();
        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_string(), task_id);

        let (status, transactions) = call(
            &h.router,
            Method::GET,
            "/transactions?limit=10",
            Some(&h.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(transactions.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_json_maps_to_invalid_input() {
        let h = harness().await;
        let (status, body) = call(
            &h.router,
            Method::POST,
            "/payroll/workers",
            Some(&h.token),
            Some(json!({"name": 42})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidInput");
    }

    #[tokio::test]
    async fn unparsable_ids_and_queries_map_to_invalid_input() {
        let h = harness().await;
        for uri in [
            "/escrow/contracts/not-a-uuid",
            "/escrow/contracts/not-a-uuid/bids/also-not/accept",
            "/payroll/batches/42",
            "/transactions?limit=abc",
        ] {
            let method = if uri.ends_with("/accept") {
                Method::PUT
            } else {
                Method::GET
            };
            let (status, body) = call(&h.router, method, uri, Some(&h.token), None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "InvalidInput", "{uri}");
            assert!(body["message"].is_string(), "{uri}");
        }
    }

    #[tokio::test]
    async fn private_contract_is_activated_by_its_owner() {
        let h = harness().await;
        let mut body = contract_body();
        body["isPublic"] = json!(false);
        body["contractor"] = json!("Known Contractor");
        let (status, created) = call(
            &h.router,
            Method::POST,
            "/escrow/contracts",
            Some(&h.token),
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();
        let activate = format!("/escrow/contracts/{id}/activate");

        let (status, _) = call(&h.router, Method::PUT, &activate, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, detail) = call(&h.router, Method::PUT, &activate, Some(&h.token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["status"], "active");
        assert_eq!(detail["lockedAmount"], "10000");

        let (status, release) = call(
            &h.router,
            Method::PUT,
            &format!("/escrow/contracts/{id}/release"),
            Some(&h.token),
            Some(json!({"amount": "1000"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(release["contract"]["lockedAmount"], "9000");

        let (status, body) = call(&h.router, Method::PUT, &activate, Some(&h.token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "InvalidTransition");
    }

    #[tokio::test]
    async fn payroll_batch_walks_to_execution() {
        let h = harness().await;
        let mut worker_ids = Vec::new();
        for name in ["Ada", "Lin"] {
            let (status, worker) = call(
                &h.router,
                Method::POST,
                "/payroll/workers",
                Some(&h.token),
                Some(json!({
                    "name": name,
                    "email": format!("{}@example.com", name.to_lowercase()),
                    "walletAddress": "0xabc",
                    "salary": "4000"
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            worker_ids.push(worker["id"].clone());
        }

        let (status, body) = call(
            &h.router,
            Method::POST,
            "/payroll/batches",
            Some(&h.token),
            Some(json!({
                "name": "October",
                "workerIds": worker_ids,
                "amounts": ["4000"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "MalformedBatch");

        let (status, batch) = call(
            &h.router,
            Method::POST,
            "/payroll/batches",
            Some(&h.token),
            Some(json!({
                "name": "October",
                "workerIds": worker_ids,
                "amounts": ["4000", "3500"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(batch["totalAmount"], "7500");
        let id = batch["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &h.router,
            Method::PUT,
            &format!("/payroll/batches/{id}/execute"),
            Some(&h.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        for step in ["submit", "approve"] {
            let (status, _) = call(
                &h.router,
                Method::PUT,
                &format!("/payroll/batches/{id}/{step}"),
                Some(&h.token),
                None,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, execution) = call(
            &h.router,
            Method::PUT,
            &format!("/payroll/batches/{id}/execute"),
            Some(&h.token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(execution["status"], "processing");
        assert_eq!(execution["payments"].as_array().unwrap().len(), 2);
        assert_eq!(h.notifier.sent().await.len(), 1);
    }
}

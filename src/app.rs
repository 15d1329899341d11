use std::{net::SocketAddr, time::Duration};

use axum::{
    http::{Request, Response},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Span;

use crate::state::AppState;
use crate::{auth, docs, users};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(users::router())
                .merge(auth::router())
                .route("/health", get(|| async { "ok" })),
        )
        .merge(docs::router(state.docs.as_ref()))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                        status = tracing::field::Empty,
                    )
                })
                .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                    let status = res.status();
                    span.record("status", status.as_u16());
                    let latency_ms = latency.as_millis() as u64;
                    // rejected logins and conflicts show up at warn
                    if status.is_server_error() {
                        tracing::error!(%status, latency_ms, "response");
                    } else if status.is_client_error() {
                        tracing::warn!(%status, latency_ms, "response");
                    } else {
                        tracing::info!(%status, latency_ms, "response");
                    }
                }),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::docs::ApiDocs;

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(req.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = build_app(AppState::fake());
        let res = send(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_then_lookup_never_exposes_plaintext() {
        let state = AppState::fake();
        let app = build_app(state.clone());

        let res = send(
            &app,
            Method::POST,
            "/api/v1/users",
            Some(json!({ "email": "a@x.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let location = res.headers()[header::LOCATION].to_str().unwrap().to_string();
        let created = json_body(res).await;
        assert_eq!(created["email"], "a@x.com");
        assert_eq!(created["hasPassword"], true);
        assert!(created.get("password").is_none());
        assert_eq!(location, format!("/api/v1/users/{}", created["id"].as_str().unwrap()));

        // the stored record holds a bcrypt digest
        let stored = state.users.find_by_email("a@x.com").await.unwrap();
        let digest = stored.password.unwrap();
        assert_ne!(digest, "secret1");
        assert!(digest.starts_with("$2b$04$"));

        let res = send(&app, Method::GET, "/api/v1/users?email=a@x.com", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let found = json_body(res).await;
        assert_eq!(found["id"], created["id"]);
        assert!(!found.to_string().contains("secret1"));

        let res = send(&app, Method::GET, &location, None).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let app = build_app(AppState::fake());
        let body = json!({ "email": "a@x.com", "password": "secret1" });
        let first = send(&app, Method::POST, "/api/v1/users", Some(body.clone())).await;
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = send(&app, Method::POST, "/api/v1/users", Some(body)).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let err = json_body(second).await;
        assert_eq!(err["error"], "Email already registered");
    }

    #[tokio::test]
    async fn invalid_registration_is_bad_request() {
        let app = build_app(AppState::fake());
        let res = send(
            &app,
            Method::POST,
            "/api/v1/users",
            Some(json!({ "email": "nope", "password": "secret1" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_links_identity_and_changes_password() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let res = send(
            &app,
            Method::POST,
            "/api/v1/users",
            Some(json!({ "email": "a@x.com", "password": "secret1" })),
        )
        .await;
        let id = json_body(res).await["id"].as_str().unwrap().to_string();
        let before = state.users.find_by_email("a@x.com").await.unwrap().password;

        let res = send(
            &app,
            Method::PATCH,
            &format!("/api/v1/users/{id}"),
            Some(json!({ "googleId": "g-1" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["googleId"], "g-1");
        let after_link = state.users.find_by_email("a@x.com").await.unwrap().password;
        assert_eq!(before, after_link);

        let res = send(
            &app,
            Method::PATCH,
            &format!("/api/v1/users/{id}"),
            Some(json!({ "password": "secret2" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let after_change = state.users.find_by_email("a@x.com").await.unwrap().password;
        assert_ne!(after_link, after_change);

        let res = send(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "a@x.com", "password": "secret2" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let app = build_app(AppState::fake());
        send(
            &app,
            Method::POST,
            "/api/v1/users",
            Some(json!({ "email": "a@x.com", "password": "secret1" })),
        )
        .await;
        let res = send(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "a@x.com", "password": "wrong-one" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"], "Invalid credentials");
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let app = build_app(AppState::fake());
        let res = send(
            &app,
            Method::GET,
            &format!("/api/v1/users/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn docs_endpoints_disabled_without_description() {
        let app = build_app(AppState::fake());
        assert_eq!(
            send(&app, Method::GET, "/api-docs", None).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            send(&app, Method::GET, "/swagger.json", None).await.status(),
            StatusCode::NOT_FOUND
        );

        // core endpoints keep working
        let res = send(
            &app,
            Method::POST,
            "/api/v1/users",
            Some(json!({ "email": "a@x.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let res = send(&app, Method::GET, "/api/v1/users?email=a@x.com", None).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn docs_endpoints_serve_description() {
        let docs = ApiDocs::from_yaml("openapi: 3.0.0\ninfo:\n  title: Accounts\n  version: '1'\n")
            .unwrap();
        let app = build_app(AppState::fake_with_docs(Some(Arc::new(docs))));

        let res = send(&app, Method::GET, "/swagger.json", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(json_body(res).await["info"]["title"], "Accounts");

        let res = send(&app, Method::GET, "/api-docs", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let html = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8_lossy(&html);
        assert!(html.contains("/swagger.json"));
        assert!(html.contains(r##"dom_id: "#swagger-ui""##));
    }
}

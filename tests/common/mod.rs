use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use cart_api::{
    auth::AuthService,
    config::AppConfig,
    db,
    entities::{customer, product},
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};

/// Helper harness for spinning up an application state backed by a
/// throwaway SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = TempDir::new().expect("failed to create temp dir for test database");
        let db_path = db_dir.path().join("cart_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test_secret_key_for_testing_purposes_only_48_chars".to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth = Arc::new(AuthService::new(cfg.auth_config()));
        let services = AppServices::new(db_arc.clone(), Arc::new(event_sender.clone()));

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth,
        };

        let router = Router::new()
            .nest("/api/v1", cart_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Issue a bearer token for the given customer id.
    #[allow(dead_code)]
    pub fn token_for(&self, customer_id: Uuid) -> String {
        self.state
            .auth
            .issue_access_token(customer_id, None, None)
            .expect("failed to issue test token")
    }

    /// Fire a request at the router and decode the JSON response body.
    #[allow(dead_code)]
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("failed to build request"),
            None => builder.body(Body::empty()).expect("failed to build request"),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to read response body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, value)
    }
}

/// Insert a product row directly into the test database.
#[allow(dead_code)]
pub async fn seed_product(
    app: &TestApp,
    name: &str,
    category: &str,
    price: Decimal,
    stock: i32,
    company_id: Uuid,
) -> Uuid {
    let product_id = Uuid::new_v4();
    let now = Utc::now();

    let row = product::ActiveModel {
        id: Set(product_id),
        name: Set(name.to_string()),
        category: Set(category.to_string()),
        price: Set(price),
        stock: Set(stock),
        company_id: Set(company_id),
        created_at: Set(now),
        updated_at: Set(now),
    };
    row.insert(&*app.state.db)
        .await
        .expect("failed to seed product");

    product_id
}

/// Insert a customer row directly into the test database.
#[allow(dead_code)]
pub async fn seed_customer(app: &TestApp, first_name: &str, last_name: &str) -> Uuid {
    let customer_id = Uuid::new_v4();
    let now = Utc::now();

    let row = customer::ActiveModel {
        id: Set(customer_id),
        email: Set(format!(
            "{}.{}.{}@example.com",
            first_name.to_lowercase(),
            last_name.to_lowercase(),
            customer_id.simple()
        )),
        first_name: Set(first_name.to_string()),
        last_name: Set(last_name.to_string()),
        phone: Set(None),
        status: Set(customer::CustomerStatus::Active),
        created_at: Set(now),
        updated_at: Set(now),
    };
    row.insert(&*app.state.db)
        .await
        .expect("failed to seed customer");

    customer_id
}

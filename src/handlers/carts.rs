use crate::handlers::common::{
    created_response, map_service_error, success_response, validate_input,
};
use crate::{
    auth::CurrentUser,
    entities::{cart, cart_item},
    errors::ApiError,
    services::cart_service::{AddToCartInput, CartRecord, CheckoutCartInput},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/cart/company/:company_id", get(get_company_report))
        .route("/cart/checkout", post(checkout))
        .route("/cart/:product_id", delete(remove_from_cart))
}

/// Get the authenticated customer's active cart with expanded products
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    tag = "Carts",
    responses(
        (status = 200, description = "Active cart with items and freshly computed total"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Customer has no active cart"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(user.customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Add a product to the authenticated customer's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart",
    tag = "Carts",
    responses(
        (status = 200, description = "Product added; updated cart returned"),
        (status = 400, description = "Quantity exceeds available stock"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Product not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let input = AddToCartInput {
        product_id: payload.product_id,
        quantity: payload.quantity,
    };

    let record = state
        .services
        .cart
        .add_item(user.customer_id, input)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartMessageResponse::new(
        "Product added to cart",
        record,
    )))
}

/// Remove a product from the authenticated customer's cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/{product_id}",
    tag = "Carts",
    params(("product_id" = Uuid, Path, description = "Product to remove")),
    responses(
        (status = 200, description = "Product removed; updated cart returned"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Customer has no active cart"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .services
        .cart
        .remove_item(user.customer_id, product_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartMessageResponse::new(
        "Product removed from cart",
        record,
    )))
}

/// Empty the authenticated customer's cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    tag = "Carts",
    responses(
        (status = 200, description = "Cart emptied"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "Customer has no active cart"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .services
        .cart
        .clear_cart(user.customer_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartMessageResponse::new(
        "Cart emptied",
        record,
    )))
}

/// Convert a submitted cart snapshot into a pending order record
#[utoipa::path(
    post,
    path = "/api/v1/cart/checkout",
    tag = "Carts",
    responses(
        (status = 201, description = "Order record created from the submitted cart"),
        (status = 400, description = "Submitted cart is missing or empty"),
        (status = 401, description = "Missing or invalid token"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .cart
        .checkout(user.customer_id, payload.cart)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(order))
}

/// Per-company sales report across all carts
#[utoipa::path(
    get,
    path = "/api/v1/cart/company/{company_id}",
    tag = "Carts",
    params(("company_id" = Uuid, Path, description = "Company whose products to report on")),
    responses(
        (status = 200, description = "Flattened report rows, sorted by customer then product"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "No carts, or no cart references the company"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_company_report(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(company_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .services
        .cart
        .company_report(company_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(rows))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub cart: Option<CheckoutCartInput>,
}

/// Mutation response: a human-readable message plus the updated cart
#[derive(Debug, Serialize)]
pub struct CartMessageResponse {
    pub message: String,
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

impl CartMessageResponse {
    fn new(message: &str, record: CartRecord) -> Self {
        Self {
            message: message.to_string(),
            cart: record.cart,
            items: record.items,
        }
    }
}

use axum::{response::Json, routing::get, Router};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cart API",
        version = "0.1.0",
        description = r#"
Shopping cart backend for an e-commerce platform.

Maintains one active cart per customer with stock-aware mutations, converts
submitted cart snapshots into pending order records at checkout, and exposes
a per-company sales report over all carts.

All cart endpoints require a bearer JWT:

```
Authorization: Bearer <your-jwt-token>
```
        "#,
    ),
    paths(
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::remove_from_cart,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::checkout,
        crate::handlers::carts::get_company_report,
    ),
    components(schemas(crate::errors::ErrorResponse)),
    modifiers(&SecurityAddon),
    tags(
        (name = "Carts", description = "Shopping cart endpoints")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// Router serving the generated OpenAPI document
pub fn docs_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_all_cart_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        assert!(paths.contains(&&"/api/v1/cart".to_string()));
        assert!(paths.contains(&&"/api/v1/cart/{product_id}".to_string()));
        assert!(paths.contains(&&"/api/v1/cart/checkout".to_string()));
        assert!(paths.contains(&&"/api/v1/cart/company/{company_id}".to_string()));
    }

    #[test]
    fn security_scheme_is_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components should exist");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}

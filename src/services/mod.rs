/// Cart services module - business logic behind the HTTP handlers
pub mod cart_service;

// Re-export services for convenience
pub use cart_service::{
    AddToCartInput, CartRecord, CartService, CartWithItems, CheckoutCartInput, CheckoutItemInput,
    CompanyReportRow,
};

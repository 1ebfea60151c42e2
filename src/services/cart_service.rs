use crate::{
    entities::{
        cart::{self, CartStatus},
        cart_item, customer, product, Cart, CartItem, Customer, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Shopping cart service.
///
/// Maintains one active cart per customer and processes mutations with
/// stock-aware validation. Every mutation runs as a single transaction
/// around the whole read-modify-write (find cart, change items, recompute
/// the derived total, save), so concurrent requests for the same cart cannot
/// lose updates between the read and the write.
///
/// Checkout never mutates the active cart: it writes a second, `pending`
/// cart as the order record, with prices snapshotted from the live catalog.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds a product to the customer's active cart, creating the cart on
    /// first use.
    ///
    /// Fails with `NotFound` when the product does not exist and with
    /// `InsufficientStock` when the requested quantity (combined with any
    /// quantity already in the cart) exceeds the product's stock. On a
    /// rejected add the stored cart is left exactly as it was.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartRecord, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        if input.quantity > product.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} units of {} available",
                product.stock, product.name
            )));
        }

        // Lazily create the active cart on first add.
        let (cart, cart_created) = match self.find_active_cart(&txn, customer_id).await? {
            Some(cart) => (cart, false),
            None => {
                let now = Utc::now();
                let cart = cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    customer_id: Set(customer_id),
                    status: Set(CartStatus::Active),
                    total: Set(Decimal::ZERO),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                (cart.insert(&txn).await?, true)
            }
        };

        let existing_item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .one(&txn)
            .await?;

        if let Some(item) = existing_item {
            let combined = item.quantity + input.quantity;
            if combined > product.stock {
                return Err(ServiceError::InsufficientStock(format!(
                    "Cannot hold more than {} units of {} in total",
                    product.stock, product.name
                )));
            }
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(combined);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let now = Utc::now();
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(input.product_id),
                quantity: Set(input.quantity),
                unit_price: Set(None),
                subtotal: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            };
            item.insert(&txn).await?;
        }

        let record = self.store_recomputed_total(&txn, cart.id).await?;
        txn.commit().await?;

        if cart_created {
            self.event_sender
                .send_or_log(Event::CartCreated(record.cart.id))
                .await;
        }
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: record.cart.id,
                product_id: input.product_id,
            })
            .await;

        info!(
            "Added product {} x{} to cart {}",
            input.product_id, input.quantity, record.cart.id
        );
        Ok(record)
    }

    /// Retrieves the customer's active cart with every item expanded to its
    /// full product, plus a total computed fresh from current prices.
    ///
    /// The returned total is derived from each item's own product and may
    /// differ from the stored `cart.total` if prices changed since the last
    /// mutation. Items whose product has been delisted are returned with a
    /// null product and contribute nothing to the total.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, customer_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = self
            .find_active_cart(&*self.db, customer_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let items = cart.find_related(CartItem).all(&*self.db).await?;
        let product_ids: BTreeSet<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products = self.load_products(&*self.db, product_ids).await?;

        let mut expanded = Vec::with_capacity(items.len());
        let mut total = Decimal::ZERO;
        for item in items {
            let product = products.get(&item.product_id).cloned();
            if let Some(product) = &product {
                total += product.price * Decimal::from(item.quantity);
            }
            expanded.push(CartItemWithProduct { item, product });
        }

        Ok(CartWithItems {
            cart,
            items: expanded,
            total,
        })
    }

    /// Removes every line matching the product from the customer's active
    /// cart and recomputes the total.
    ///
    /// Removing a product that is not in the cart is a no-op, not an error;
    /// only a missing cart is `NotFound`.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartRecord, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self
            .find_active_cart(&txn, customer_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;

        let record = self.store_recomputed_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: record.cart.id,
                product_id,
            })
            .await;

        Ok(record)
    }

    /// Empties the customer's active cart and zeroes its total.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, customer_id: Uuid) -> Result<CartRecord, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self
            .find_active_cart(&txn, customer_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        let mut active: cart::ActiveModel = cart.into();
        active.total = Set(Decimal::ZERO);
        active.updated_at = Set(Utc::now());
        let cart = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;

        info!("Cleared cart: {}", cart.id);
        Ok(CartRecord {
            cart,
            items: Vec::new(),
        })
    }

    /// Converts a caller-supplied cart snapshot into a `pending` order
    /// record; the customer's active cart is left untouched.
    ///
    /// Every submitted line is re-priced from the live catalog in one batch
    /// lookup. Lines whose product still exists get `unit_price` and
    /// `subtotal` stamped; lines whose product has been delisted are carried
    /// through unpriced and contribute nothing to the order total.
    #[instrument(skip(self, submitted))]
    pub async fn checkout(
        &self,
        customer_id: Uuid,
        submitted: Option<CheckoutCartInput>,
    ) -> Result<CartRecord, ServiceError> {
        let submitted = submitted
            .filter(|cart| !cart.items.is_empty())
            .ok_or_else(|| ServiceError::ValidationError("The cart is empty".to_string()))?;

        if submitted.items.iter().any(|item| item.quantity < 1) {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let product_ids: BTreeSet<Uuid> =
            submitted.items.iter().map(|item| item.product_id).collect();
        let products = self.load_products(&txn, product_ids).await?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let mut total = Decimal::ZERO;
        let mut lines = Vec::with_capacity(submitted.items.len());
        for item in &submitted.items {
            let (unit_price, subtotal) = match products.get(&item.product_id) {
                Some(product) => {
                    let subtotal = product.price * Decimal::from(item.quantity);
                    total += subtotal;
                    (Some(product.price), Some(subtotal))
                }
                None => (None, None),
            };
            lines.push(cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(unit_price),
                subtotal: Set(subtotal),
                created_at: Set(now),
                updated_at: Set(now),
            });
        }

        let order = cart::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer_id),
            status: Set(CartStatus::Pending),
            total: Set(total),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        CartItem::insert_many(lines).exec(&txn).await?;
        let items = order.find_related(CartItem).all(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id,
                customer_id,
            })
            .await;

        info!(
            "Checked out customer {}: order {} with {} lines",
            customer_id,
            order_id,
            items.len()
        );
        Ok(CartRecord { cart: order, items })
    }

    /// Flattens every cart line whose product belongs to the company into
    /// report rows, sorted by customer name and then product name.
    ///
    /// Scans carts of every status: order records count toward the report
    /// just like working carts. `NotFound` both when no carts exist at all
    /// and when no line references the company.
    #[instrument(skip(self))]
    pub async fn company_report(
        &self,
        company_id: Uuid,
    ) -> Result<Vec<CompanyReportRow>, ServiceError> {
        let carts = Cart::find().all(&*self.db).await?;
        if carts.is_empty() {
            return Err(ServiceError::NotFound("No carts available".to_string()));
        }

        let cart_ids: Vec<Uuid> = carts.iter().map(|cart| cart.id).collect();
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.is_in(cart_ids))
            .all(&*self.db)
            .await?;

        let product_ids: BTreeSet<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products = self.load_products(&*self.db, product_ids).await?;

        let customer_ids: BTreeSet<Uuid> = carts.iter().map(|cart| cart.customer_id).collect();
        let customers: HashMap<Uuid, customer::Model> = Customer::find()
            .filter(customer::Column::Id.is_in(customer_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|customer| (customer.id, customer))
            .collect();

        let carts_by_id: HashMap<Uuid, &cart::Model> =
            carts.iter().map(|cart| (cart.id, cart)).collect();

        let mut rows = Vec::new();
        for item in &items {
            let product = match products.get(&item.product_id) {
                Some(product) if product.company_id == company_id => product,
                _ => continue,
            };
            let cart = match carts_by_id.get(&item.cart_id) {
                Some(cart) => *cart,
                None => continue,
            };
            // Carts whose customer record has been removed are skipped
            // rather than reported with a fabricated name.
            let customer = match customers.get(&cart.customer_id) {
                Some(customer) => customer,
                None => continue,
            };

            rows.push(CompanyReportRow {
                cart_id: cart.id,
                user_name: customer.full_name(),
                product_name: product.name.clone(),
                product_category: product.category.clone(),
                price: product.price,
                quantity: item.quantity,
                total: product.price * Decimal::from(item.quantity),
                created_at: cart.created_at,
                updated_at: cart.updated_at,
            });
        }

        if rows.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "No products found for company {}",
                company_id
            )));
        }

        sort_report_rows(&mut rows);
        Ok(rows)
    }

    /// The single active cart a customer owns, if any.
    async fn find_active_cart(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .one(conn)
            .await?)
    }

    async fn load_products(
        &self,
        conn: &impl ConnectionTrait,
        ids: BTreeSet<Uuid>,
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(Product::find()
            .filter(product::Column::Id.is_in(ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect())
    }

    /// Reprices every line from its own product and persists the derived
    /// total. Lines whose product has been delisted contribute nothing.
    async fn store_recomputed_total(
        &self,
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<CartRecord, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;

        let product_ids: BTreeSet<Uuid> = items.iter().map(|item| item.product_id).collect();
        let products = self.load_products(conn, product_ids).await?;

        let total: Decimal = items
            .iter()
            .filter_map(|item| {
                products
                    .get(&item.product_id)
                    .map(|product| product.price * Decimal::from(item.quantity))
            })
            .sum();

        let mut active: cart::ActiveModel = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?
            .into();
        active.total = Set(total);
        active.updated_at = Set(Utc::now());
        let cart = active.update(conn).await?;

        Ok(CartRecord { cart, items })
    }
}

/// Primary key: customer name, byte order. Secondary key: product name,
/// case-insensitive.
fn sort_report_rows(rows: &mut [CompanyReportRow]) {
    rows.sort_by(|a, b| {
        a.user_name.cmp(&b.user_name).then_with(|| {
            a.product_name
                .to_lowercase()
                .cmp(&b.product_name.to_lowercase())
        })
    });
}

/// Input for adding an item to the cart
#[derive(Debug, Deserialize)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Caller-supplied cart snapshot submitted for checkout
#[derive(Debug, Deserialize)]
pub struct CheckoutCartInput {
    #[serde(default)]
    pub items: Vec<CheckoutItemInput>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A cart plus its raw lines, as persisted
#[derive(Debug, Serialize)]
pub struct CartRecord {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

/// Active cart with items expanded to their products and a freshly computed
/// total
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: cart::Model,
    pub items: Vec<CartItemWithProduct>,
    pub total: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CartItemWithProduct {
    #[serde(flatten)]
    pub item: cart_item::Model,
    pub product: Option<product::Model>,
}

/// One flattened (cart, item) pair of the per-company sales report
#[derive(Debug, Serialize)]
pub struct CompanyReportRow {
    pub cart_id: Uuid,
    pub user_name: String,
    pub product_name: String,
    pub product_category: String,
    pub price: Decimal,
    pub quantity: i32,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn add_to_cart_input_deserialization() {
        let json = r#"{
            "product_id": "550e8400-e29b-41d4-a716-446655440000",
            "quantity": 3
        }"#;

        let input: AddToCartInput =
            serde_json::from_str(json).expect("deserialization should succeed");
        assert_eq!(input.quantity, 3);
        assert_eq!(
            input.product_id.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn checkout_cart_input_items_default_to_empty() {
        let input: CheckoutCartInput = serde_json::from_str("{}").unwrap();
        assert!(input.items.is_empty());
    }

    #[test]
    fn line_total_calculation() {
        let unit_price = dec!(25.50);
        let quantity = 3;
        let line_total = unit_price * Decimal::from(quantity);

        assert_eq!(line_total, dec!(76.50));
    }

    #[test]
    fn subtotal_sums_only_priced_lines() {
        let priced = vec![Some(dec!(25.00)), None, Some(dec!(14.50))];
        let total: Decimal = priced.into_iter().flatten().sum();

        assert_eq!(total, dec!(39.50));
    }

    fn report_row(user_name: &str, product_name: &str) -> CompanyReportRow {
        CompanyReportRow {
            cart_id: Uuid::new_v4(),
            user_name: user_name.to_string(),
            product_name: product_name.to_string(),
            product_category: "misc".to_string(),
            price: dec!(1.00),
            quantity: 1,
            total: dec!(1.00),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn report_rows_sort_by_user_then_product() {
        let mut rows = vec![
            report_row("Bruno Diaz", "Widget"),
            report_row("Ana Alvarez", "zephyr vane"),
            report_row("Ana Alvarez", "Anvil"),
        ];

        sort_report_rows(&mut rows);

        let order: Vec<(&str, &str)> = rows
            .iter()
            .map(|row| (row.user_name.as_str(), row.product_name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Ana Alvarez", "Anvil"),
                ("Ana Alvarez", "zephyr vane"),
                ("Bruno Diaz", "Widget"),
            ]
        );
    }

    #[test]
    fn product_name_ordering_ignores_case() {
        let mut rows = vec![
            report_row("Ana Alvarez", "beacon"),
            report_row("Ana Alvarez", "Anvil"),
        ];

        sort_report_rows(&mut rows);

        assert_eq!(rows[0].product_name, "Anvil");
        assert_eq!(rows[1].product_name, "beacon");
    }
}

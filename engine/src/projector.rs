//! DerivedViewProjector - pure projections from store + cart to screens.
//!
//! Every function here is referentially transparent: no IO, no interior
//! state, and ties are always broken by product id, so projecting the same
//! inputs twice yields structurally equal output. Renderers rely on that to
//! skip redundant work by comparing the previous and next value.

use crate::{
    CartLineId, CartTable, EntityStore, Price, ProductId, ProductSnapshot, ProductStatus,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Default catalog page size.
pub const DEFAULT_PAGE_SIZE: usize = 12;

/// Default number of best-seller cards.
pub const DEFAULT_BEST_SELLERS: usize = 8;

/// Field the catalog is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Price,
    Stock,
    Sold,
    /// Most recently listed first, by product id
    Newest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// The one active sort. Setting a new sort replaces the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub key: SortKey,
    pub direction: SortDirection,
}

/// Filters, sort and pagination cursor for the catalog view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFilter {
    /// Case-insensitive substring of the product name
    pub search: Option<String>,
    pub category: Option<String>,
    pub status: Option<ProductStatus>,
    pub seller_id: Option<String>,
    pub min_price: Option<Price>,
    pub max_price: Option<Price>,
    /// Hide products whose displayed stock is zero
    pub in_stock_only: bool,
    pub sort: Option<Sort>,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            search: None,
            category: None,
            status: None,
            seller_id: None,
            min_price: None,
            max_price: None,
            in_stock_only: false,
            sort: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl CatalogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self.page = 1;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self.page = 1;
        self
    }

    pub fn status(mut self, status: ProductStatus) -> Self {
        self.status = Some(status);
        self.page = 1;
        self
    }

    pub fn seller(mut self, seller_id: impl Into<String>) -> Self {
        self.seller_id = Some(seller_id.into());
        self.page = 1;
        self
    }

    pub fn price_range(mut self, min: Option<Price>, max: Option<Price>) -> Self {
        self.min_price = min;
        self.max_price = max;
        self.page = 1;
        self
    }

    pub fn in_stock_only(mut self, enabled: bool) -> Self {
        self.in_stock_only = enabled;
        self.page = 1;
        self
    }

    /// Sort by a single key. Any previous sort is discarded.
    pub fn sort_by(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.sort = Some(Sort { key, direction });
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn matches(&self, product: &ProductSnapshot) -> bool {
        if let Some(search) = &self.search {
            let needle = search.trim().to_lowercase();
            if !needle.is_empty() && !product.name.to_lowercase().contains(&needle) {
                return false;
            }
        }
        if self.category.as_ref().is_some_and(|c| *c != product.category) {
            return false;
        }
        if self.status.is_some_and(|s| s != product.status) {
            return false;
        }
        if self.seller_id.as_ref().is_some_and(|s| *s != product.seller_id) {
            return false;
        }
        if self.min_price.is_some_and(|min| product.price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| product.price > max) {
            return false;
        }
        !(self.in_stock_only && product.available() == 0)
    }
}

/// A product as rendered in the catalog and best-seller lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCard {
    pub product_id: ProductId,
    pub name: String,
    pub category: String,
    pub status: ProductStatus,
    pub price: Price,
    /// Displayed stock, optimistic reservations included
    pub available_stock: u64,
    pub sold: u64,
    /// Quantity of this product in the local cart
    pub in_cart: u32,
}

impl ProductCard {
    fn from_product(product: &ProductSnapshot, cart: &CartTable) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            category: product.category.clone(),
            status: product.status,
            price: product.price,
            available_stock: product.available(),
            sold: product.sold,
            in_cart: cart.quantity(&product.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub cards: Vec<ProductCard>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

/// Health of a cart line relative to its product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineState {
    Available,
    /// Local reservations exceed the server's stock
    OutOfStock,
    /// The product exists but is no longer approved for sale
    Unavailable,
    /// The product is gone from the store
    Vanished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub line_id: CartLineId,
    pub product_id: ProductId,
    pub name: Option<String>,
    pub quantity: u32,
    pub unit_price: Price,
    pub line_total: Price,
    pub state: LineState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub lines: Vec<CartLineView>,
    pub subtotal: Price,
    pub total_units: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeCounter {
    pub number: u64,
    pub show: bool,
}

impl BadgeCounter {
    pub fn new(number: u64) -> Self {
        Self {
            number,
            show: number > 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badges {
    /// Units awaiting server confirmation
    pub pending: BadgeCounter,
    /// Units in the cart
    pub cart: BadgeCounter,
}

/// Which projection to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewKind {
    Catalog,
    BestSellers,
    Cart,
    Badges,
}

/// One projection, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "view", rename_all = "camelCase")]
pub enum View {
    Catalog(CatalogPage),
    BestSellers(Vec<ProductCard>),
    Cart(CartView),
    Badges(Badges),
}

/// Every projection, computed together from one consistent state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSet {
    pub catalog: CatalogPage,
    pub best_sellers: Vec<ProductCard>,
    pub cart: CartView,
    pub badges: Badges,
}

impl Default for ViewSet {
    fn default() -> Self {
        Self {
            catalog: CatalogPage {
                cards: Vec::new(),
                page: 1,
                page_size: DEFAULT_PAGE_SIZE,
                total_items: 0,
                total_pages: 0,
            },
            best_sellers: Vec::new(),
            cart: CartView::default(),
            badges: Badges::default(),
        }
    }
}

impl ViewSet {
    pub fn get(&self, kind: ViewKind) -> View {
        match kind {
            ViewKind::Catalog => View::Catalog(self.catalog.clone()),
            ViewKind::BestSellers => View::BestSellers(self.best_sellers.clone()),
            ViewKind::Cart => View::Cart(self.cart.clone()),
            ViewKind::Badges => View::Badges(self.badges),
        }
    }
}

fn compare(a: &ProductSnapshot, b: &ProductSnapshot, sort: Option<Sort>) -> Ordering {
    let primary = match sort {
        None => Ordering::Equal,
        Some(Sort { key, direction }) => {
            let ordering = match key {
                SortKey::Price => a.price.cmp(&b.price),
                SortKey::Stock => a.available().cmp(&b.available()),
                SortKey::Sold => a.sold.cmp(&b.sold),
                SortKey::Newest => b.id.cmp(&a.id),
            };
            match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        }
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Filtered, sorted, paginated catalog.
///
/// A page past the end clamps to the last page.
pub fn catalog_view(store: &EntityStore, cart: &CartTable, filter: &CatalogFilter) -> CatalogPage {
    let mut matching: Vec<&ProductSnapshot> = store.iter().filter(|p| filter.matches(p)).collect();
    matching.sort_by(|a, b| compare(a, b, filter.sort));

    let page_size = filter.page_size.max(1);
    let total_items = matching.len();
    let total_pages = total_items.div_ceil(page_size);
    let page = filter.page.clamp(1, total_pages.max(1));

    let cards = matching
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .map(|p| ProductCard::from_product(p, cart))
        .collect();

    CatalogPage {
        cards,
        page,
        page_size,
        total_items,
        total_pages,
    }
}

/// Top approved products by units sold.
pub fn best_sellers_view(store: &EntityStore, cart: &CartTable, limit: usize) -> Vec<ProductCard> {
    let mut approved: Vec<&ProductSnapshot> = store.iter().filter(|p| p.is_purchasable()).collect();
    approved.sort_by(|a, b| {
        compare(
            a,
            b,
            Some(Sort {
                key: SortKey::Sold,
                direction: SortDirection::Descending,
            }),
        )
    });
    approved
        .into_iter()
        .take(limit)
        .map(|p| ProductCard::from_product(p, cart))
        .collect()
}

/// Cart lines joined to their products, oldest line first.
pub fn cart_view(store: &EntityStore, cart: &CartTable) -> CartView {
    let mut dated: Vec<(u64, CartLineView)> = cart
        .lines()
        .map(|line| {
            let product = store.get(&line.product_id);
            let state = match product {
                None => LineState::Vanished,
                Some(p) if !p.is_purchasable() => LineState::Unavailable,
                Some(p) if p.is_oversubscribed() => LineState::OutOfStock,
                Some(_) => LineState::Available,
            };
            let view = CartLineView {
                line_id: line.id.clone(),
                product_id: line.product_id.clone(),
                name: product.map(|p| p.name.clone()),
                quantity: line.quantity,
                unit_price: line.unit_price_snapshot,
                line_total: line.total(),
                state,
            };
            (line.added_at, view)
        })
        .collect();
    dated.sort_by(|(at_a, a), (at_b, b)| at_a.cmp(at_b).then_with(|| a.line_id.cmp(&b.line_id)));
    let lines: Vec<CartLineView> = dated.into_iter().map(|(_, view)| view).collect();

    let subtotal = lines
        .iter()
        .map(|l| l.line_total)
        .fold(0, Price::saturating_add);

    CartView {
        lines,
        subtotal,
        total_units: cart.total_units(),
    }
}

/// Pending-confirmation and cart badges.
///
/// `pending` maps products to units reserved by unconfirmed writes; a
/// pending release counts by its magnitude.
pub fn badge_view(pending: &BTreeMap<ProductId, i64>, cart: &CartTable) -> Badges {
    let pending_units = pending.values().map(|units| units.unsigned_abs()).sum();
    Badges {
        pending: BadgeCounter::new(pending_units),
        cart: BadgeCounter::new(cart.total_units()),
    }
}

/// All projections at once.
pub fn project(
    store: &EntityStore,
    cart: &CartTable,
    pending: &BTreeMap<ProductId, i64>,
    filter: &CatalogFilter,
    best_seller_limit: usize,
) -> ViewSet {
    ViewSet {
        catalog: catalog_view(store, cart, filter),
        best_sellers: best_sellers_view(store, cart, best_seller_limit),
        cart: cart_view(store, cart),
        badges: badge_view(pending, cart),
    }
}

//! Stockline - terminal storefront for the Stockline marketplace.
//!
//! Loads the catalog, keeps it in sync with the server's push feed and
//! accepts cart commands on stdin:
//!
//! ```text
//! add <product>   one more unit
//! dec <product>   one fewer unit
//! rm <product>    drop the line
//! views           print catalog, cart and badges
//! refresh         re-pull the catalog
//! quit            send pending writes and exit
//! ```

use std::sync::Arc;

use stockline_client::{Config, HttpTransport, Marketplace};
use stockline_engine::ViewSet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockline_client=debug,stockline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(api = %config.api_url, role = ?config.role, "Starting Stockline");

    let transport = Arc::new(HttpTransport::new(&config)?);
    let marketplace = Marketplace::start(transport, &config);

    // Log committed view changes
    let mut views = marketplace.subscribe();
    tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let badges = views.borrow().badges;
            tracing::info!(
                cart = badges.cart.number,
                pending = badges.pending.number,
                "Views updated"
            );
        }
    });

    // Print notices as they arrive
    let mut notices = marketplace.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            println!("[{:?}] {}", notice.level, notice.message);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (Some("add"), Some(product)) => marketplace.add_to_cart(product),
            (Some("dec"), Some(product)) => marketplace.decrement(product),
            (Some("rm"), Some(product)) => marketplace.remove_from_cart(product),
            (Some("views"), None) => {
                print_views(&marketplace.views());
                Ok(())
            }
            (Some("refresh"), None) => marketplace.refresh(),
            (Some("quit"), None) => break,
            (None, _) => Ok(()),
            _ => {
                println!("commands: add <id> | dec <id> | rm <id> | views | refresh | quit");
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!("Command failed: {}", e);
            break;
        }
    }

    tracing::info!("Shutting down, sending pending cart writes");
    marketplace.shutdown().await?;

    Ok(())
}

fn print_views(views: &ViewSet) {
    let catalog = &views.catalog;
    println!(
        "catalog page {}/{} ({} products)",
        catalog.page, catalog.total_pages, catalog.total_items
    );
    for card in &catalog.cards {
        println!(
            "  {:<12} {:<28} {:>8} stock {:>4} in cart {}",
            card.product_id,
            card.name,
            format_price(card.price),
            card.available_stock,
            card.in_cart
        );
    }

    println!("best sellers:");
    for card in &views.best_sellers {
        println!("  {:<12} {:<28} sold {}", card.product_id, card.name, card.sold);
    }

    println!("cart:");
    for line in &views.cart.lines {
        println!(
            "  {:<12} x{:<3} {:>8} {:?}",
            line.product_id,
            line.quantity,
            format_price(line.line_total),
            line.state
        );
    }
    println!(
        "  subtotal {} ({} units, {} pending)",
        format_price(views.cart.subtotal),
        views.badges.cart.number,
        views.badges.pending.number
    );
}

fn format_price(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

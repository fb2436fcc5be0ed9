use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;

use studysync_billing::config::Config;
use studysync_billing::handlers;
use studysync_billing::services::{
    account::AccountService,
    database::DatabaseService,
    gateway::{GatewayFactory, TokenCache},
    payment::PaymentService,
    store::BillingStore,
    subscription::SubscriptionService,
};
use studysync_billing::tasks::expiry_task::spawn_expiry_task;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let database = DatabaseService::connect(&config.database)
        .await
        .context("Failed to initialize database")?;
    let store: Arc<dyn BillingStore> = Arc::new(database);

    let subscriptions = SubscriptionService::new(store.clone(), &config.app);
    let default_plan = subscriptions
        .ensure_default_plans()
        .await
        .context("Failed to seed subscription plans")?;
    log::info!("Default plan: {} ({} {})", default_plan.name, default_plan.price, default_plan.currency);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.gateways.http_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;
    let tokens = TokenCache::new(chrono::Duration::seconds(
        config.gateways.token_refresh_margin_secs,
    ));
    let gateways = GatewayFactory::from_config(&config.gateways, client, tokens);
    log::info!("Payment gateways enabled: {:?}", gateways.supported_methods());

    let payments = PaymentService::new(
        store.clone(),
        gateways,
        subscriptions.clone(),
        config.frontend_url.clone(),
    );
    let accounts = AccountService::new(store, subscriptions.clone());

    spawn_expiry_task(
        subscriptions.clone(),
        Duration::from_secs(config.app.expiry_sweep_interval_secs),
    );

    let bind_address = config.bind_address();
    log::info!("Starting StudySync billing server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .supports_credentials(),
            )
            .app_data(handlers::json_config())
            .app_data(web::Data::new(subscriptions.clone()))
            .app_data(web::Data::new(payments.clone()))
            .app_data(web::Data::new(accounts.clone()))
            .configure(handlers::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

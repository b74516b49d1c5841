mod config;
mod crm;
mod dedupe;
mod dispatch;
mod lead;
mod lead_source;
mod message;
mod outcome;
mod phone;
mod smoke;
#[cfg(test)]
mod testing;
mod twilio;
mod vapi;
mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use config::Config;
use crm::ghl::GhlClient;
use crm::CrmClient;
use dispatch::Dispatcher;
use lead_source::{LeadSourceResolver, NormalizationTable};
use outcome::CallOutcomeWatcher;
use phone::PhoneValidator;
use twilio::{SmsSender, TwilioClient};
use vapi::{CallApi, VapiClient};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    /// Follows up on placed calls and sends the SMS fallback.
    pub watcher: Arc<CallOutcomeWatcher>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--smoke-test") => {
            let Some(phone) = args.get(2) else {
                eprintln!("--smoke-test needs a phone number");
                print_usage();
                std::process::exit(1);
            };
            let first_name = args.get(3).map(String::as_str).unwrap_or("Test");
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(smoke_test(phone, first_name));
        }
        Some("--version") => println!("lead-line {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(server());
        }
    }
}

fn print_usage() {
    println!("lead-line {VERSION}");
    println!("Calls new CRM leads with a voice assistant and texts the ones who miss it");
    println!();
    println!("Usage: lead-line [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --smoke-test <phone> [first-name]  Create a test contact and text it");
    println!("  --version                          Print version");
    println!("  --help, -h                         Print this help message");
    println!();
    println!("Without options, starts the webhook server.");
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_line=info,tower_http=info".into()),
        )
        .init();
}

fn load_config() -> Config {
    match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    }
}

async fn smoke_test(phone: &str, first_name: &str) {
    init_tracing();
    let config = load_config();

    let crm = GhlClient::new(&config.crm);
    let sms = TwilioClient::new(&config.twilio);
    let validator = PhoneValidator::new(&config.phone.default_country_code);

    match smoke::run(&crm, &sms, &validator, &config.fallback, phone, first_name).await {
        Ok(report) => {
            println!("Smoke test passed");
            println!("  contact:  {}", report.contact_id);
            println!("  phone:    {}", report.phone);
            println!("  message:  {}", report.message_sid);
        }
        Err(e) => {
            eprintln!("Smoke test failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn server() {
    init_tracing();
    let config = load_config();

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        location_id = %config.crm.location_id,
        "Starting lead-line"
    );

    if config.webhook.secret.is_empty() {
        tracing::warn!("webhook.secret not set, CRM webhook signatures are not verified");
    }

    let crm: Arc<dyn CrmClient> = Arc::new(GhlClient::new(&config.crm));
    let calls: Arc<dyn CallApi> = Arc::new(VapiClient::new(&config.vapi));
    let sms: Arc<dyn SmsSender> = Arc::new(TwilioClient::new(&config.twilio));
    let validator = PhoneValidator::new(&config.phone.default_country_code);
    let resolver = LeadSourceResolver::new(NormalizationTable::with_aliases(
        &config.lead_source.aliases,
    ));

    let state = AppState {
        dispatcher: Arc::new(Dispatcher::new(
            crm.clone(),
            calls.clone(),
            resolver,
            validator.clone(),
        )),
        watcher: Arc::new(CallOutcomeWatcher::new(
            crm,
            calls,
            sms,
            validator,
            config.fallback.clone(),
        )),
        config: Arc::new(config.clone()),
    };

    let app = Router::new()
        // CRM lead events
        .route("/webhooks/ghl", post(webhook::ghl::handle_ghl))
        // Voice API call reports
        .route("/webhooks/vapi", post(webhook::vapi::handle_vapi))
        .route("/health", get(health))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("Invalid server address");

    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}

async fn health() -> &'static str {
    "ok"
}

use crate::{
    api::routes::{
        funding_source_info, health, invoice_status, lnpay_webhook_router, new_invoice,
        paid_invoices_events, payment_status, send_payment,
    },
    config::{FundingSourceKind, Settings},
    domain::settlements::{InvoicePoller, SettlementListener},
    infra::{
        funding_source::{FundingSource, SettlementMode},
        http::build_reqwest_client,
        lnd_rest::LndRestWallet,
        lnpay::LnPayWallet,
        lntxbot::LntxbotWallet,
        void::VoidWallet,
    },
};
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{connect_info::IntoMakeServiceWithConnectInfo, ConnectInfo, Request},
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware::{self, AddExtension, Next},
    response::IntoResponse,
    routing::{get, post},
    serve::Serve,
    Router,
};
use log::{error, info, warn};
use reqwest_middleware::ClientWithMiddleware;
use std::{collections::HashMap, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::signal::unix::{signal, SignalKind};
use tokio::{net::TcpListener, select, sync::broadcast, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Settled checking-ids kept for slow SSE subscribers before they lag
const SETTLEMENT_BROADCAST_CAPACITY: usize = 1024;

pub struct Application {
    server: Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            config.api_settings.domain, config.api_settings.port
        );
        let listener = SocketAddr::from_str(&address)?;
        let origins = config.api_settings.origins.clone();
        let (app_state, webhooks, background_tasks, cancellation_token) = build_app(config).await?;
        let server = build_server(listener, app_state, webhooks, origins).await?;
        Ok(Self {
            server,
            cancellation_token,
            background_tasks,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        match self.server.with_graceful_shutdown(shutdown_signal()).await {
            Ok(_) => {
                info!("Server shutdown initiated");
                self.cancellation_token.cancel();

                let timeout = tokio::time::sleep(Duration::from_secs(10));
                select! {
                    _ = self.background_tasks.wait() => {
                        info!("Background tasks completed gracefully");
                    }
                    _ = timeout => {
                        warn!("Background tasks timed out during shutdown");
                    }
                }

                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();

                let _ =
                    tokio::time::timeout(Duration::from_secs(5), self.background_tasks.wait())
                        .await;

                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub funding_source: Arc<dyn FundingSource>,
    /// Present when the funding source settles by polling
    pub poller: Option<Arc<InvoicePoller>>,
    /// Fan-out of the funding source's paid invoices stream
    pub settlements: broadcast::Sender<String>,
    pub background_threads: Arc<HashMap<String, JoinHandle<()>>>,
}

impl AppState {
    /// State without any background work attached
    pub fn new(funding_source: Arc<dyn FundingSource>) -> Self {
        let (settlements, _) = broadcast::channel(SETTLEMENT_BROADCAST_CAPACITY);
        Self {
            funding_source,
            poller: None,
            settlements,
            background_threads: Arc::new(HashMap::new()),
        }
    }
}

/// Only the configured backend is constructed, the webhook router is
/// returned alongside when that backend settles by push.
pub fn build_funding_source(
    config: &Settings,
    client: ClientWithMiddleware,
) -> Result<(Arc<dyn FundingSource>, Option<Router>), anyhow::Error> {
    let timeout = Duration::from_secs(config.funding_settings.http_timeout_secs);
    match config.funding_settings.kind {
        FundingSourceKind::Void => {
            warn!("No funding source configured, invoices can neither be created nor paid");
            Ok((Arc::new(VoidWallet::new()), None))
        }
        FundingSourceKind::LnPay => {
            let wallet = Arc::new(LnPayWallet::new(client, &config.lnpay_settings));
            let webhooks = lnpay_webhook_router(wallet.clone());
            let funding_source: Arc<dyn FundingSource> = wallet;
            Ok((funding_source, Some(webhooks)))
        }
        FundingSourceKind::Lntxbot => {
            let wallet = LntxbotWallet::new(
                client,
                &config.lntxbot_settings,
                config.funding_settings.enable_poller,
            );
            Ok((Arc::new(wallet), None))
        }
        FundingSourceKind::LndRest => {
            let wallet = LndRestWallet::new(client, &config.lnd_rest_settings, timeout)?;
            Ok((Arc::new(wallet), None))
        }
    }
}

pub async fn build_app(
    config: Settings,
) -> Result<(AppState, Option<Router>, TaskTracker, CancellationToken), anyhow::Error> {
    let reqwest_client = build_reqwest_client(Duration::from_secs(
        config.funding_settings.http_timeout_secs,
    ))?;
    let (funding_source, webhooks) = build_funding_source(&config, reqwest_client)?;
    info!(
        "Funding source {} configured ({} settlements)",
        funding_source.name(),
        funding_source.settlement_mode()
    );

    let mut app_state = AppState::new(funding_source.clone());
    let tracker = TaskTracker::new();
    let mut threads = HashMap::new();
    let cancel_token = CancellationToken::new();

    if funding_source.settlement_mode() == SettlementMode::Poll {
        let poller = Arc::new(InvoicePoller::new(
            funding_source.clone(),
            cancel_token.clone(),
            Duration::from_secs(config.funding_settings.poll_interval_secs),
        ));
        let watcher = poller.clone();
        let poller_task = tracker.spawn(async move {
            match watcher.watch().await {
                Ok(_) => info!("Successfully shutdown invoice poller"),
                Err(e) => error!("Error in invoice poller: {}", e),
            }
        });
        threads.insert(String::from("invoice_poller"), poller_task);
        app_state.poller = Some(poller);
    }

    if funding_source.settlement_mode() != SettlementMode::Unsupported {
        let listener = SettlementListener::new(
            funding_source,
            app_state.settlements.clone(),
            cancel_token.clone(),
        );
        let listener_task = tracker.spawn(async move {
            match listener.listen().await {
                Ok(_) => info!("Successfully shutdown settlement listener"),
                Err(e) => error!("Error in settlement listener: {}", e),
            }
        });
        threads.insert(String::from("settlement_listener"), listener_task);
    }

    tracker.close();
    app_state.background_threads = Arc::new(threads);
    Ok((app_state, webhooks, tracker, cancel_token))
}

pub async fn build_server(
    socket_addr: SocketAddr,
    app_state: AppState,
    webhooks: Option<Router>,
    origins: Vec<String>,
) -> Result<
    Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    anyhow::Error,
> {
    let listener = TcpListener::bind(socket_addr).await?;

    info!("Setting up service");
    let app = app(app_state, webhooks, origins);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    info!(
        "Service running @: http://{}:{}",
        socket_addr.ip(),
        socket_addr.port()
    );
    Ok(server)
}

pub fn app(app_state: AppState, webhooks: Option<Router>, origins: Vec<String>) -> Router {
    let origins: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    let funding_endpoints = Router::new()
        .route("/funding_source", get(funding_source_info))
        .route("/invoices", post(new_invoice))
        .route("/invoices/paid/stream", get(paid_invoices_events))
        .route("/invoices/{checking_id}", get(invoice_status))
        .route("/payments", post(send_payment))
        .route("/payments/{checking_id}", get(payment_status));

    let router = Router::new()
        .route("/api/v1/health_check", get(health))
        .nest("/api/v1", funding_endpoints)
        .with_state(Arc::new(app_state));

    let router = match webhooks {
        Some(webhooks) => router.merge(webhooks),
        None => router,
    };

    router.layer(middleware::from_fn(log_request)).layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    // query strings are not logged, webhook callers may put secrets there
    let path = request.uri().path().to_owned();
    info!(target: "http_request","new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}

async fn shutdown_signal() {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        _ => {
            error!("Failed to install signal handlers, waiting for ctrl-c instead");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            return;
        }
    };

    select! {
        _ = sigint.recv() => info!("Received SIGINT signal"),
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
    }
}

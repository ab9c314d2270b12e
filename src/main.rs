mod anshar;
mod api;
mod archive;
mod cluster;
mod config;
mod et;
mod journeys;
mod metrics;
mod scheduler;
mod siri;
mod stops;
mod subscriptions;
mod sx;

use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use anshar::pipeline::{spawn_et_consumer, spawn_sx_consumer};
use anshar::{
    client_host_id, AnsharClient, AnsharSubscriber, FeedKind, FeedPipeline, PollWorkflow,
    HEARTBEAT_INTERVAL_MS, SUBSCRIPTION_DURATION_MIN,
};
use api::{HealthState, SiriMessagesState};
use archive::{FileArchive, MessageArchive, NoopArchive};
use cluster::{
    establish_requestor_id, ClusterCoordinator, InflightRegistry, MemoryMap, SharedMap,
};
use config::Config;
use et::EtProcessor;
use journeys::{InMemoryLiveJourneys, LiveJourneys};
use metrics::Metrics;
use scheduler::TriggerScheduler;
use stops::{QuayStopPlaceMap, TiamatRefresh};
use subscriptions::{InMemorySubscriptionIndex, LoggingNotifier};
use sx::LoggingSituationHandler;

#[derive(OpenApi)]
#[openapi(
    info(title = "Avvik", version = "0.1.0"),
    paths(api::health::status),
    components(schemas(api::health::StatusResponse, metrics::MetricsSnapshot)),
    tags((name = "health", description = "Replica health and status"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let config = Config::load("config.yaml").expect("Failed to load config");
    config.validate();
    tracing::info!(
        operator = %config.operator,
        use_subscription = config.use_subscription,
        et_enabled = config.et_enabled,
        sx_enabled = config.sx_enabled,
        "Loaded configuration"
    );

    let metrics = Arc::new(Metrics::new());
    let shared_map: Arc<dyn SharedMap> = Arc::new(MemoryMap::new());
    let requestor_id = establish_requestor_id(shared_map.as_ref(), &config.product_name)
        .await
        .expect("Failed to establish requestor id");

    // Collaborators around the matching engine
    let quay_map = Arc::new(QuayStopPlaceMap::new());
    let subscription_index = Arc::new(InMemorySubscriptionIndex::new(quay_map.clone()));
    let live_journeys = Arc::new(InMemoryLiveJourneys::new());
    let archive: Arc<dyn MessageArchive> = if config.store_messages_to_file {
        Arc::new(
            FileArchive::new(&config.archive_dir).expect("Failed to create archive directory"),
        )
    } else {
        Arc::new(NoopArchive)
    };

    // Per-kind queues and their consumers
    let (pipeline, et_rx, sx_rx) = FeedPipeline::new(config.operator.clone(), metrics.clone());
    let pipeline = Arc::new(pipeline);
    let et_processor = Arc::new(EtProcessor::new(
        subscription_index.clone(),
        Arc::new(LoggingNotifier),
        live_journeys.clone(),
        quay_map.clone(),
        archive,
        metrics.clone(),
    ));
    spawn_et_consumer(et_rx, et_processor, metrics.clone());
    spawn_sx_consumer(sx_rx, Arc::new(LoggingSituationHandler), metrics.clone());

    let client =
        Arc::new(AnsharClient::new(&config.product_name).expect("Failed to build HTTP client"));
    let coordinator = Arc::new(ClusterCoordinator::new(shared_map.clone()));
    let inflight = Arc::new(InflightRegistry::new());
    let scheduler = Arc::new(TriggerScheduler::new(coordinator.clone(), inflight));

    let polling_interval = Duration::from_millis(config.polling_interval_ms);

    {
        let live_journeys = live_journeys.clone();
        scheduler.register_trigger(
            "flushOldJourneys",
            polling_interval,
            "flush-old-journeys",
            move || {
                let live_journeys = live_journeys.clone();
                async move {
                    live_journeys.flush_old_journeys();
                }
            },
        );
    }

    if config.tiamat.enabled {
        let refresh = Arc::new(TiamatRefresh::new(
            client.clone(),
            config.tiamat.url.clone(),
            quay_map.clone(),
            metrics.clone(),
        ));
        scheduler.register_trigger(
            "getStopPlacesFromTiamat",
            Duration::from_millis(config.tiamat.interval_ms),
            "tiamat-refresh",
            move || {
                let refresh = refresh.clone();
                async move {
                    refresh.run().await;
                }
            },
        );
    }

    let subscriber = Arc::new(AnsharSubscriber::new(
        client.clone(),
        shared_map.clone(),
        metrics.clone(),
        requestor_id.clone(),
        config.product_name.clone(),
        config.anshar.subscription_url.clone(),
        config.anshar.own_base_url.clone(),
        config.et_enabled,
        config.sx_enabled,
    ));

    let callback_state = if config.use_subscription {
        if !config.et_enabled && !config.sx_enabled {
            tracing::warn!(
                "No point in setting up subscription routes since both ET and SX are disabled"
            );
            None
        } else {
            {
                let subscriber = subscriber.clone();
                scheduler.register_trigger(
                    "AnsharSubscriptionRenewer",
                    Duration::from_millis(SUBSCRIPTION_DURATION_MIN as u64 * 60_000),
                    "subscription-renewer",
                    move || {
                        let subscriber = subscriber.clone();
                        async move {
                            subscriber.renew().await;
                        }
                    },
                );
            }
            {
                let subscriber = subscriber.clone();
                scheduler.register_trigger(
                    "AnsharSubscriptionChecker",
                    Duration::from_millis(HEARTBEAT_INTERVAL_MS),
                    "subscription-checker",
                    move || {
                        let subscriber = subscriber.clone();
                        async move {
                            subscriber.check().await;
                        }
                    },
                );
            }
            Some(SiriMessagesState {
                requestor_id: requestor_id.clone(),
                et_enabled: config.et_enabled,
                sx_enabled: config.sx_enabled,
                subscriber: subscriber.clone(),
                pipeline: pipeline.clone(),
                metrics: metrics.clone(),
            })
        }
    } else {
        if config.et_enabled {
            let workflow = Arc::new(PollWorkflow::new(
                client.clone(),
                pipeline.clone(),
                FeedKind::Et,
                config.polling_et_url(&requestor_id),
                metrics.clone(),
            ));
            scheduler.register_trigger("pollAnsharET", polling_interval, "et-retriever", move || {
                let workflow = workflow.clone();
                async move {
                    workflow.run().await;
                }
            });
        } else {
            tracing::warn!("ET polling is disabled");
        }
        if config.sx_enabled {
            let workflow = Arc::new(PollWorkflow::new(
                client.clone(),
                pipeline.clone(),
                FeedKind::Sx,
                config.polling_sx_url(&requestor_id),
                metrics.clone(),
            ));
            scheduler.register_trigger("pollAnsharSX", polling_interval, "sx-retriever", move || {
                let workflow = workflow.clone();
                async move {
                    workflow.run().await;
                }
            });
        } else {
            tracing::warn!("SX polling is disabled");
        }
        None
    };

    scheduler.start();

    let health_state = HealthState {
        node_started: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        hostname: client_host_id(&config.product_name),
        use_subscription: config.use_subscription,
        et_enabled: config.et_enabled,
        sx_enabled: config.sx_enabled,
        coordinator,
        scheduler: scheduler.clone(),
        metrics: metrics.clone(),
        quay_map,
    };

    let app = api::router(health_state, callback_state)
        .route("/api-docs/openapi.json", axum::routing::get(openapi))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind {}: {e}", config.bind));
    tracing::info!(bind = %config.bind, %requestor_id, "Server running");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn openapi() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}

use crate::api;
use crate::config::RentalsConfig;
use crate::domain::billing::BillingCalculator;
use crate::domain::ledger::LedgerManager;
use crate::domain::orchestrator::{DeploymentOrchestrator, OrchestratorContext};
use crate::domain::registry::RentalRegistry;
use crate::domain::status::StatusResolver;
use crate::provisioner::Ec2Provisioner;
use crate::storage::{
    PostgresConnection, SqlCatalogService, SqlClusterRepository, SqlCostRecordRepository,
    SqlLedgerRepository, SqlRentalRepository,
};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub status: Arc<StatusResolver>,
    pub registry: Arc<RentalRegistry>,
}

/// Rentals server hosting the HTTP surface.
pub struct RentalsServer {
    config: RentalsConfig,
    connection: Arc<PostgresConnection>,
    state: AppState,
}

impl RentalsServer {
    pub async fn new(config: RentalsConfig) -> anyhow::Result<Self> {
        info!("Initializing Neotix rentals server");

        let connection = Arc::new(PostgresConnection::connect(&config.database_url).await?);

        let ledger = Arc::new(LedgerManager::new(Arc::new(SqlLedgerRepository::new(
            connection.clone(),
        ))));
        let registry = Arc::new(RentalRegistry::new(Arc::new(SqlRentalRepository::new(
            connection.clone(),
        ))));
        let clusters = Arc::new(SqlClusterRepository::new(connection.clone()));
        let costs = Arc::new(SqlCostRecordRepository::new(connection.clone()));
        let catalog = Arc::new(SqlCatalogService::new(connection.clone()));
        let provisioner = Arc::new(Ec2Provisioner::new(config.provisioner.clone()).await);

        let calculator =
            BillingCalculator::new(config.billing.tax_rate, config.billing.platform_fee_rate);

        let orchestrator = Arc::new(DeploymentOrchestrator::new(OrchestratorContext {
            registry: registry.clone(),
            ledger: ledger.clone(),
            provisioner,
            catalog,
            clusters: clusters.clone(),
            costs: costs.clone(),
            calculator,
            provision_timeout: Duration::from_secs(config.provisioner.create_timeout_secs),
        }));

        let status = Arc::new(StatusResolver::new(
            registry.clone(),
            clusters,
            costs,
            ledger,
            calculator,
        ));

        Ok(Self {
            config,
            connection,
            state: AppState {
                orchestrator,
                status,
                registry,
            },
        })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        self.connection.run_migrations().await?;
        Ok(())
    }

    fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        api::routes(self.state.clone()).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
    }

    /// Run the server until the shutdown future resolves.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_address.as_str())
            .await
            .map_err(|e| {
                anyhow::anyhow!("failed to bind to {}: {e}", self.config.listen_address)
            })?;

        info!("Neotix rentals service listening on {}", self.config.listen_address);

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

        Ok(())
    }
}

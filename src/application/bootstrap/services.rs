use std::sync::Arc;
use tracing::info;

use crate::application::bootstrap::persistence::PersistenceHandle;
use crate::application::exchange_sync::ExchangeSyncService;
use crate::application::import_reconciliation::{ImportJobWorker, ImportReconciliationService};
use crate::application::instrument_pool::InstrumentPool;
use crate::application::message_dispatcher::MessageDispatcher;
use crate::application::message_service::MessageService;
use crate::application::peer_registry::PeerRegistry;
use crate::application::price_pool::PricePool;
use crate::application::supplier_history::{ExchangeSyncAnswerHandler, SupplierHistoryService};
use crate::config::GtNetEnvConfig;
use crate::domain::ports::PeerTransport;
use crate::infrastructure::observability::Metrics;

/// Every GTNet service, sharing one store
#[derive(Clone)]
pub struct GtNetServices {
    pub persistence: PersistenceHandle,
    pub registry: Arc<PeerRegistry>,
    pub messages: Arc<MessageService>,
    pub instruments: Arc<InstrumentPool>,
    pub prices: Arc<PricePool>,
    pub supplier_history: Arc<SupplierHistoryService>,
    pub exchange_sync: Arc<ExchangeSyncService>,
    pub imports: Arc<ImportReconciliationService>,
    pub metrics: Metrics,
}

impl GtNetServices {
    /// A worker for the import job queue; several may run side by side
    pub fn import_worker(&self) -> ImportJobWorker {
        ImportJobWorker::new(
            self.persistence.import_repository.clone(),
            self.persistence.local_entity_repository.clone(),
            self.metrics.clone(),
        )
    }

    pub fn dispatcher(&self, transport: Arc<dyn PeerTransport>, batch_size: usize) -> MessageDispatcher {
        MessageDispatcher::new(
            self.registry.clone(),
            self.messages.clone(),
            transport,
            self.metrics.clone(),
            batch_size,
        )
    }
}

pub struct ServicesBootstrap;

impl ServicesBootstrap {
    pub fn init(
        config: &GtNetEnvConfig,
        persistence: PersistenceHandle,
        metrics: Metrics,
    ) -> GtNetServices {
        info!("Initializing GTNet services...");

        let registry = Arc::new(PeerRegistry::new(
            persistence.peer_repository.clone(),
            config.my_entry_id,
        ));
        let instruments = Arc::new(InstrumentPool::new(
            persistence.instrument_repository.clone(),
        ));
        let supplier_history = Arc::new(SupplierHistoryService::new(
            persistence.supplier_detail_repository.clone(),
        ));
        let messages = Arc::new(
            MessageService::new(
                registry.clone(),
                persistence.message_repository.clone(),
                metrics.clone(),
                config.answer_ttl_seconds,
            )
            .with_answer_handler(Arc::new(ExchangeSyncAnswerHandler::new(
                instruments.clone(),
                supplier_history.clone(),
            ))),
        );
        let prices = Arc::new(PricePool::new(
            instruments.clone(),
            persistence.lastprice_repository.clone(),
            persistence.exchange_repository.clone(),
            persistence.local_entity_repository.clone(),
            metrics.clone(),
        ));
        let exchange_sync = Arc::new(ExchangeSyncService::new(
            registry.clone(),
            messages.clone(),
            instruments.clone(),
            persistence.exchange_repository.clone(),
            persistence.local_entity_repository.clone(),
            supplier_history.clone(),
            metrics.clone(),
            config.default_exchange_flags,
        ));
        let imports = Arc::new(ImportReconciliationService::new(
            persistence.import_repository.clone(),
            persistence.local_entity_repository.clone(),
            instruments.clone(),
        ));

        GtNetServices {
            persistence,
            registry,
            messages,
            instruments,
            prices,
            supplier_history,
            exchange_sync,
            imports,
            metrics,
        }
    }
}

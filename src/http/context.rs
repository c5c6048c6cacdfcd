use crate::config::Config;
use crate::delivery::DeliveryEngine;
use crate::storage::{DeliveryStorage, Storage, WebhookStorage};
use crate::tracker::JobTracker;
use std::{ops::Deref, sync::Arc};

pub struct InnerWebContext {
    pub(crate) config: Config,
    pub(crate) tracker: Arc<JobTracker>,
    pub(crate) engine: Arc<DeliveryEngine>,
    pub(crate) webhook_storage: Arc<dyn WebhookStorage>,
    pub(crate) delivery_storage: Arc<dyn DeliveryStorage>,
    pub(crate) storage: Arc<dyn Storage>,
}

#[derive(Clone)]
pub struct WebContext(pub(crate) Arc<InnerWebContext>);

impl Deref for WebContext {
    type Target = InnerWebContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WebContext {
    pub fn new(
        config: Config,
        tracker: Arc<JobTracker>,
        engine: Arc<DeliveryEngine>,
        webhook_storage: Arc<dyn WebhookStorage>,
        delivery_storage: Arc<dyn DeliveryStorage>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self(Arc::new(InnerWebContext {
            config,
            tracker,
            engine,
            webhook_storage,
            delivery_storage,
            storage,
        }))
    }

    pub fn webhook_storage(&self) -> &Arc<dyn WebhookStorage> {
        &self.0.webhook_storage
    }

    pub fn delivery_storage(&self) -> &Arc<dyn DeliveryStorage> {
        &self.0.delivery_storage
    }
}

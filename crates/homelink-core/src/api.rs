// ── Collaborator seams ──
//
// The monitor talks to the cloud through these two traits. The production
// implementations are `ApplianceClient` and `EventStream`; tests plug in
// in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use homelink_api::{
    ApplianceClient, Error, EventListener, EventStream, Resource, SubscriptionHandle, Value,
};

/// Reads and writes single resources of an appliance.
#[async_trait]
pub trait ApplianceApi: Send + Sync {
    async fn read(&self, ha_id: &str, resource: &Resource) -> Result<Value, Error>;

    async fn write(&self, ha_id: &str, resource: &Resource, value: &Value) -> Result<(), Error>;
}

#[async_trait]
impl ApplianceApi for ApplianceClient {
    async fn read(&self, ha_id: &str, resource: &Resource) -> Result<Value, Error> {
        self.read_resource(ha_id, resource).await
    }

    async fn write(&self, ha_id: &str, resource: &Resource, value: &Value) -> Result<(), Error> {
        self.write_resource(ha_id, resource, value).await
    }
}

/// Opens and closes event subscriptions.
pub trait EventSubscriber: Send + Sync {
    fn subscribe(&self, ha_id: &str, listener: Arc<dyn EventListener>) -> SubscriptionHandle;

    /// Returns `false` if the subscription was already gone.
    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool;
}

impl EventSubscriber for EventStream {
    fn subscribe(&self, ha_id: &str, listener: Arc<dyn EventListener>) -> SubscriptionHandle {
        EventStream::subscribe(self, ha_id, listener)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        EventStream::unsubscribe(self, handle)
    }
}

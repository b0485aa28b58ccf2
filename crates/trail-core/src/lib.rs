pub mod bus;
pub mod errors;
pub mod ids;
pub mod records;
pub mod severity;

pub use bus::{EventBus, SubscriptionId};
pub use errors::ProviderError;
pub use ids::{ActionId, EventId, SessionId};
pub use records::{
    ActionRecord, EventRecord, EventType, IngestionTask, NewAction, SessionRecord,
};
pub use severity::{IssueSeverity, RiskLevel};

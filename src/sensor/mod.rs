//! Sensor state: identity, data model, classification and the merged store.

pub mod capability;
pub mod classify;
pub mod id;
pub mod store;
pub mod types;

pub use capability::{capability_for, CapabilityMapper, CapabilityValue, Catalog, Translate};
pub use classify::classify;
pub use id::{CompositeId, ParseIdError};
pub use store::{format_update, IngestOutcome, SensorStore};
pub use types::{
    DisplayView, FieldMap, FieldValue, Locale, RawSignalResult, SensorRecord, SensorType,
};

//! Weather Sensor Agent - state fusion for 433 MHz weather sensors.
//!
//! Decoded radio messages arrive as partial, independent results. This
//! library merges them into one record per physical sensor, infers what kind
//! of sensor it is from the fields it reports, maps those fields to device
//! capabilities, forwards changes to paired devices, and evicts sensors that
//! stop transmitting.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Weather Sensor Agent                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐             │
//! │  │ LineSource  │──▶│  Protocol   │──▶│ SensorStore │             │
//! │  │ (stdin/file)│   │  Registry   │   │ merge+diff  │             │
//! │  └─────────────┘   └─────────────┘   └─────────────┘             │
//! │                          │                  │                     │
//! │                          ▼                  ▼                     │
//! │                   ┌─────────────┐   ┌─────────────┐               │
//! │                   │  EventBus   │◀──│ Classifier  │               │
//! │                   │ + realtime  │   │ + Mapper    │               │
//! │                   └─────────────┘   └─────────────┘               │
//! │                     │         │                                   │
//! │                     ▼         ▼                                   │
//! │            ┌─────────────┐ ┌─────────────┐  ┌─────────────┐       │
//! │            │   Device    │ │  HTTP/SSE   │  │  Lifecycle  │       │
//! │            │  Bindings   │ │  (server)   │  │  Monitor    │       │
//! │            └─────────────┘ └─────────────┘  └─────────────┘       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use weather_sensor_agent::{Hub, HubOptions, LogNotifier, MemorySettings, ProtocolRegistry};
//!
//! let mut hub = Hub::new(
//!     ProtocolRegistry::builtin(),
//!     Box::new(MemorySettings::new()),
//!     Box::new(LogNotifier),
//!     HubOptions::default(),
//! );
//!
//! let line = r#"{"model":"Nexus-TH","id":42,"channel":1,"temperature_C":21.5,"humidity":55}"#;
//! hub.handle_payload("rtl433", line).ok();
//!
//! for sensor in hub.query().all_sensors() {
//!     println!("{} {}", sensor.id, sensor.type_label);
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod hub;
pub mod lifecycle;
pub mod notify;
pub mod protocol;
pub mod query;
pub mod runtime;
pub mod sensor;
pub mod settings;
pub mod source;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::Config;
pub use device::{DeviceBinding, DeviceBindingRegistry, PairedDevice};
pub use error::{ConfigError, DeviceError, HubError, NotifyError, SettingsError, SourceError};
pub use events::{EventBus, HubEvent, RealtimeMessage, Subscriber, SubscriptionId, Topic};
pub use hub::{Hub, HubOptions};
pub use lifecycle::{LifecycleMonitor, SweepReport};
pub use notify::{ChannelNotifier, LogNotifier, Notification, Notifier};
pub use protocol::{Protocol, ProtocolInfo, ProtocolRegistry};
pub use query::{PairingCandidate, ProtocolStatus, Query, SettingsSummary};
pub use runtime::HubHandle;
pub use sensor::{
    CapabilityMapper, CapabilityValue, CompositeId, DisplayView, FieldValue, Locale,
    RawSignalResult, SensorRecord, SensorStore, SensorType,
};
pub use settings::{AppSettings, FileSettings, MemorySettings, SettingsStore};
pub use source::{LineInput, LineSource};
pub use stats::{ProtocolStats, StatsLog};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

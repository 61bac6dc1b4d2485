pub mod command;
pub mod constants;
pub mod counters;
pub mod decode;
pub mod error;
pub mod frame;
pub mod session;
pub mod transport;

// Re-export the main types for easy access
pub use command::{Request, RequestDescriptor};
pub use counters::{CounterStore, SequenceState};
pub use decode::{BatteryState, BatterySummary, DecodedPayload, FieldValue};
pub use error::ECError;
pub use session::{Session, SessionConfig, SessionState};
pub use transport::SerialConfig;

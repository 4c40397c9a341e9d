pub mod aggregate;
pub mod classify;
pub mod events;
pub mod extract;
pub mod peaks;
pub mod runtime;
pub mod transition;

pub use aggregate::{aggregate, leg_imbalance, Aggregate};
pub use classify::{FloorProfile, LoadProfile, TempTier, TemperatureProfile, Tier};
pub use events::{Alert, Event, EventLog, EventOrder, Severity};
pub use extract::{CircuitReading, DeviceReading, FieldExtractor, FieldSource, FieldTables};
pub use peaks::PeakTracker;
pub use runtime::{RuntimeEstimate, RuntimeEstimator};
pub use transition::TransitionDetector;

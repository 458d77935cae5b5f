pub mod channel;
pub mod documents;
pub mod snapshot;

pub use channel::{value_columns, Channel, SensorIdentity, RESERVED_SLOTS, TIMESTAMP_COLUMN};
pub use documents::{truncate_to_hour, HourDocument, TrackedMaxima, WeekDocument, WeekKey};
pub use snapshot::{parse_line, round_to, Reading, Snapshot};

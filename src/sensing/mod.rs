pub mod aggregator;
pub mod bus;
pub mod calibration;
pub mod reader;

pub use aggregator::{AggregatePolicy, AssembleError, ReadingAggregator};
pub use bus::{SensorBus, SysfsBus};
pub use calibration::{default_entries, CalibrationTable, SensorEntry};
pub use reader::{ReadError, ReadPolicy, SensorReader};

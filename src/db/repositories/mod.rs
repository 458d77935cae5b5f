pub mod readings;

pub use readings::READINGS_TABLE;

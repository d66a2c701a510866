use crate::schema::PropertyId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid loan duration: {periods} amortization periods ({details})")]
    InvalidLoanDuration { periods: f64, details: String },

    #[error("Invalid period {per}: must be between 1 and {nper}")]
    InvalidPeriod { per: u32, nper: u32 },

    #[error("Invalid loan configuration '{loan}': {details}")]
    InvalidLoanConfig { loan: String, details: String },

    #[error("Invalid depreciation duration {duration} for amortization type '{name}'")]
    InvalidDepreciationDuration { name: String, duration: u32 },

    #[error("Property {0} does not exist")]
    MissingProperty(PropertyId),

    #[error("{entity} {id} not found for property {property_id}")]
    NotFound {
        entity: &'static str,
        id: u64,
        property_id: PropertyId,
    },

    #[error("Cached data for property {0} was invalidated while being recomputed")]
    StaleReadRace(PropertyId),

    #[error("Store lock poisoned: {0}")]
    StorePoisoned(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

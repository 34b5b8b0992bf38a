//! Data models for observations, positions, trades, and training examples.

mod observation;
mod position;
mod trade;
mod training;

pub use observation::{MarketBatch, MarketContext, MarketObservation};
pub use position::Position;
pub use trade::{Trade, TradeAction};
pub use training::{
    ExampleRecord, FeatureVector, FoundationDetails, FoundationInput, FoundationOutput,
    FoundationRecord, TrainingExample,
};

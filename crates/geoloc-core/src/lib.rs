//! Geoloc Core: Stage Trait, Runner, Collaborators and Data Model
//!
//! Staged core for answering "where was this photo taken?": every stage owns
//! the [`PipelineState`] while it runs and hands back the state it produced.

pub mod collaborators;
pub mod context;
pub mod data_model;
pub mod error;
pub mod runner;
pub mod stage;

pub use collaborators::{ChatMessage, ChatRole, ObjectDetector, QueryExecutor, TextGenerator};
pub use context::{PipelineOptions, PipelineState};
pub use data_model::{
    BoundingBox, DetectedObject, Direction, ExecutionRecord, FailureRecord, Intent, LocationPair,
    MatchSupport, QueryDescriptor, Row, StageTrace,
};
pub use error::GeolocError;
pub use runner::PipelineRunner;
pub use stage::{Stage, StageError};

/// Version of the geoloc engine
pub const GEOLOC_VERSION: &str = "1.0.0";

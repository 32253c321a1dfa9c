//! Core types for the Tessella pipeline.
//!
//! This module contains the foundational pieces every operation builds on:
//! - Reference-counted pixel and metadata buffers
//! - Rectangle algebra
//! - Band formats and sample conversion
//! - Image handles and the generate contract
//! - Regions and demand-driven materialization
//! - Configuration and error types

pub mod area;
pub mod config;
pub mod error;
pub mod format;
pub mod image;
pub mod rect;
pub mod region;

// Re-export commonly used types
pub use area::{AreaType, ArrayDouble, ArrayInt, Blob, RefString, TypedArea};
pub use config::EngineConfig;
pub use error::{ConfigError, PipelineError, PipelineResult, TessellaError, TessellaResult};
pub use format::{BandFormat, Coding, Interpretation};
pub use image::{DemandStyle, Generate, Image, ImageBuilder, ImageDesc, StopFlag};
pub use rect::Rect;
pub use region::Region;

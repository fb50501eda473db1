//! Maintenance Report Export Library
//!
//! Turns a set of maintenance log records, with optional photo attachments,
//! into a single paginated PDF report. Also hosts the queue-driven export
//! worker that runs the pipeline in the background.
//!
//! ## Module Overview
//!
//! - `normalizer`: decode, orient, downscale and re-encode attachments as JPEG
//! - `formatter`: validate records and lay them out as measured blocks
//! - `paginator`: greedy-fill blocks into stamped pages
//! - `assembler`: write pages, fonts and images with pdf-writer
//! - `generator`: run the whole pipeline for one request
//! - `export`: write a rendered report to disk for an export job
//! - `job`, `queue`: Redis-backed export jobs
//! - `telemetry`: OpenTelemetry integration and structured logging
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use report_export::{
//!     config::ReportConfig,
//!     generator::ReportGenerator,
//!     record::LogRecord,
//!     report::{Branding, ReportRequest},
//! };
//! use std::sync::Arc;
//!
//! let generator = ReportGenerator::new(Arc::new(ReportConfig::default()));
//! let request = ReportRequest {
//!     records: vec![LogRecord {
//!         id: "42".to_string(),
//!         title: "Leak under sink".to_string(),
//!         category: "Plumbing".to_string(),
//!         description: "Water pooling in the staff kitchen.".to_string(),
//!         created_at: Some(Utc::now()),
//!         ..LogRecord::default()
//!     }],
//!     branding: Branding::new("South Dade Academy"),
//!     generated_at: Utc::now(),
//! };
//!
//! let output = generator.generate(&request).unwrap();
//! std::fs::write(output.suggested_filename(), &output.pdf).unwrap();
//! ```

pub mod assembler;
pub mod canvas;
pub mod config;
pub mod error;
pub mod export;
pub mod formatter;
pub mod generator;
pub mod job;
pub mod normalizer;
pub mod paginator;
pub mod queue;
pub mod record;
pub mod report;
pub mod svg;
pub mod telemetry;
pub mod text;

//! # Chart Engine
//!
//! Routes flattened metric series to chart and dimension bindings and keeps
//! the materialized chart state of one collection job in sync across build
//! cycles.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                             CHART ENGINE                              │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  SERIES → FILTER → ROUTE CACHE → MATCH INDEX → AUTOGEN                │
//! │                         ↓                                             │
//! │                   DEDUPE CLAIMS → MATERIALIZE → CAPS → EXPIRY → PLAN  │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Templates**: exact and glob metric patterns, tag selectors, instance
//!   labels that split one template into many charts
//! - **Autogen**: fallback charts for unmatched counters, gauges, histogram
//!   buckets, summary quantiles and state sets
//! - **Route Cache**: per-series memo invalidated by template reloads and
//!   build sequence rollbacks
//! - **Lifecycle**: per-chart dimension caps and cycle-based expiry
//! - **Build Sequence Guard**: a regressing collector never corrupts state
//!
//! ## Example
//!
//! ```
//! use chartengine::{AutogenPolicy, Engine, EngineOptions, EnginePolicy, LabelSet, Series, SeriesMeta};
//!
//! let mut engine = Engine::new(EngineOptions::new().with_policy(EnginePolicy {
//!     autogen: Some(AutogenPolicy::enabled()),
//!     ..EnginePolicy::default()
//! }))?;
//!
//! let series = Series::new("app.requests_total", LabelSet::from_pairs([("pod", "a")]), SeriesMeta::counter());
//! let plan = engine.plan(&[series], 1);
//! assert_eq!(plan.routes[0].binding.chart_id, "app.requests_total-pod=a");
//! # Ok::<(), chartengine::EngineError>(())
//! ```

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod autogen;
pub mod build_seq;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod match_index;
pub mod route;
pub mod route_cache;
pub mod runtime_store;
pub mod selector;
pub mod series;
pub mod state;
pub mod template;

pub use autogen::AutogenPolicy;
pub use build_seq::{BuildSeqTransition, PlannerMode};
pub use config::{ChartTemplateConfig, DimensionConfig, EngineConfig, LifecycleConfig};
pub use engine::{Engine, EngineOptions, EnginePolicy, Plan, PlannedRoute, SeriesSelection};
pub use error::{ConfigError, EngineError, EngineResult, SelectorError, TemplateError};
pub use lifecycle::{ChartRemoval, DimensionRemoval, Removals};
pub use logging::{init_logging, LoggingConfig};
pub use route::{RouteBinding, RouteOrigin};
pub use runtime_store::{EngineStats, PlanSample, RecordingRuntimeStore, RuntimeStore};
#[cfg(feature = "prometheus-store")]
pub use runtime_store::PrometheusRuntimeStore;
pub use selector::{parse_selector, Selector, Tags};
pub use series::{FlattenRole, LabelSet, MetricKind, Series, SeriesIdentity, SeriesMeta};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

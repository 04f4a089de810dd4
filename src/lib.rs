//! Forecast serving for multivariate gold price sequence models.
//!
//! Reconciles mixed-frequency market, macro and geopolitical-risk series onto
//! one daily calendar, projects them onto the 13-indicator feature contract,
//! scales fixed-length windows with the parameters the models were trained
//! with, and runs a catalog of GRU / LSTM / RNN / MLP models side by side.
//! Results come back ranked by each model's offline R².
//!
//! ```no_run
//! use goldsight_inference::{
//!     CancellationToken, ForecastConfig, ForecastPipeline, ModelRegistry,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> goldsight_inference::Result<()> {
//! let config = ForecastConfig::default();
//! let registry = Arc::new(ModelRegistry::load(Path::new("models/catalog.toml"), &config)?);
//! let pipeline = ForecastPipeline::new(config, registry);
//!
//! let sources = goldsight_inference::load_source_dir(Path::new("data"))?;
//! let token = CancellationToken::new();
//! let prepared = pipeline.prepare(&sources, &token)?;
//! let report = pipeline.forecast_latest(&prepared, &token)?;
//! println!("{:?}", report.recommended());
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod calendar;
pub mod cancel;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod scenario;
pub mod series;
pub mod window;

pub use aggregate::{
    EntryOutcome, ForecastAggregator, ForecastEntry, ForecastReport, PricePrediction,
    ReportStatus,
};
pub use calendar::{AlignedPanel, CalendarAligner, SourceStaleness};
pub use cancel::CancellationToken;
pub use config::{ForecastConfig, StalenessAction, StalenessPolicy};
pub use ensemble::{EnsembleRunner, ModelRun};
pub use error::{DataQualityWarning, ForecastError, ModelError, Result};
pub use features::{Feature, FeatureAssembler, FeatureTable, TARGET_COLUMN};
pub use metrics::RealizedMetrics;
pub use model::{Architecture, ModelDescriptor, ModelRegistry, OfflineMetrics, ScorableModel};
pub use normalize::{FeatureScaler, NormalizationParameters};
pub use pipeline::{BacktestReport, ForecastPipeline, PreparedData};
pub use scenario::{ScenarioForecast, ScenarioRequest};
pub use series::{load_source_dir, Frequency, SourceKind, SourceSeries};
pub use window::{InputLayout, InputShape, Window, WindowBuilder};

pub mod analytics;
pub mod enhanced;
pub mod graph;
pub mod learning;
pub mod model;
pub mod recommender;
pub mod similarity;

pub use analytics::{AnalyticsSource, PgAnalytics};
pub use enhanced::EnhancedRecommender;
pub use learning::{LearningEngine, LearningLoopHandle};
pub use recommender::Recommender;

pub mod svg;

pub use svg::{extract_features, SvgFeatureExtractor};

//! License expression parsing and license classification.

mod classifier;
pub mod expression;

pub use classifier::{KnownLicenseClassifier, LicenseClassifier};
pub use expression::{extract_identifiers, identifiers_in_order, ExpressionScan};

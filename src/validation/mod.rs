//! Validation of eval specs.
//!
//! A raw spec document is checked against the canonical schema before any
//! session is scheduled. Validation is all-or-nothing: either every rule
//! passes and a [`ValidatedSpec`] is produced, or the complete list of
//! violations is returned.

pub mod spec_validator;

pub use spec_validator::{SpecValidator, ValidatedSpec, WEIGHT_TOLERANCE};

use std::path::Path;

use crate::diagnostics::Diagnostics;
use crate::error::SpecError;

/// Loads and validates a spec file in one step.
pub fn load_and_validate(
    path: &Path,
    rubrics_dir: Option<&Path>,
    diagnostics: &Diagnostics,
) -> Result<ValidatedSpec, SpecError> {
    let raw = crate::spec::load_raw(path)?;
    let mut validator = SpecValidator::new(diagnostics.clone());
    if let Some(dir) = rubrics_dir {
        validator = validator.with_rubrics_dir(dir);
    }
    validator.validate(&raw)
}

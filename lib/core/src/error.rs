//! Error handling foundation for pons.
//!
//! This module provides only the `Result` type alias using rootcause.
//! Each crate defines its own domain-specific error types in their own
//! error modules, and wraps them in a [`Report`] where they cross a layer.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn result_carries_domain_context() {
        let failed: Result<(), StoreError> = Err(StoreError::InvalidKey {
            key: "../escape".to_string(),
        }
        .into());
        let rendered = failed.expect_err("should be an error").to_string();
        assert!(rendered.contains("invalid store key"));
    }
}

//! Feature selection utilities.
//!
//! This module contains univariate selection routines (a la scikit-learn)
//! for scoring and ranking features based on correlation and F-statistics.
pub mod univariate_selection;

pub use univariate_selection::SelectKBest;

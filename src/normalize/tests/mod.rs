//! Behavioral test suites for the normalization engines.

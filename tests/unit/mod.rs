//! Integration test suites exercising the public crate surface.

mod dispatch_tests;
mod pipeline_tests;
mod property_tests;

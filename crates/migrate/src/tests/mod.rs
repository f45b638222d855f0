//! Test support and cross-component tests

//! Integration test harness.

mod login_flow;

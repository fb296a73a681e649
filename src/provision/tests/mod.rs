//! Unit tests for guest provisioning.

mod guest;

//! Unit tests for the container runtime adapter.

mod classify;

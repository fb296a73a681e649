//! Unit tests for the `VirtualBox` adapter.

mod state;

//! Reconciliation scenarios driven by fake drivers and a real file store.

mod bdd_steps;
mod scenarios;
mod test_helpers;

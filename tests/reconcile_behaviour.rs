//! Behavioural scenarios for host reconciliation.

mod reconcile;

//! Application layer: the session lifecycle and purchase settlement.
//!
//! [`session_manager::SessionManager`] owns the current session and hands out
//! read-only handles. [`orchestrator::PurchaseOrchestrator`] reads such a
//! handle and settles purchases through the gateway adapter and the ledger
//! client.

pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod session_manager;

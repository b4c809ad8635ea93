//! End-to-end scenarios across the registry, decision service, bootstrap
//! and dispatch gateway.

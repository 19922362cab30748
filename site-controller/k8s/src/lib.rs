//! Kubernetes backends for the site controller: credential records live in
//! Secrets, workload ports come from the apps/core APIs, and link state comes
//! from the router's management endpoint.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod mgmt;
mod store;
mod workload;

pub use self::{mgmt::RouterMgmtClient, store::SecretStore, workload::WorkloadPorts};

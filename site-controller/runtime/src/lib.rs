//! Command-line surface of the site controller.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod commands;
mod site;

pub use self::{args::Args, site::SiteHandle};

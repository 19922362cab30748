pub mod link;
pub mod service;
pub mod token;

use vanlink_site_controller_core::{LinkClass, Protocol};

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LinkClassArg {
    Edge,
    InterRouter,
}

impl From<LinkClassArg> for LinkClass {
    fn from(arg: LinkClassArg) -> Self {
        match arg {
            LinkClassArg::Edge => LinkClass::Edge,
            LinkClassArg::InterRouter => LinkClass::InterRouter,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ProtocolArg {
    Tcp,
    Http,
    Http2,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Tcp => Protocol::Tcp,
            ProtocolArg::Http => Protocol::Http,
            ProtocolArg::Http2 => Protocol::Http2,
        }
    }
}

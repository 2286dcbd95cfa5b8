#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod conn_cache;
mod error;
mod forward;
mod interceptor;
pub mod kv;
pub mod local;
pub mod metrics;
mod resolver;
mod service;

pub use conn_cache::{ConnectionCache, DialError};
pub use forward::{forward_stream, forward_unary};
pub use interceptor::{
    AuthInterceptor, CallerIdentity, DpuProxyInterceptor, InterceptorChain, PeerIdentity, Step,
};
pub use resolver::DpuResolver;
pub use service::SwitchControlService;

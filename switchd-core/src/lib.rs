#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod dpu;
mod registry;
mod routing;

pub use self::{
    dpu::{DpuIndex, DpuPort, DpuRecord, ResolveError},
    registry::{
        Method, MethodMode, MethodRegistry, METHOD_INSTALL_PACKAGE, METHOD_REBOOT,
        METHOD_SERVER_REFLECTION, METHOD_TIME, METHOD_TRANSFER_FILE_FROM_REMOTE,
        METHOD_UPLOAD_FILE,
    },
    routing::{classify, RejectReason, RoutingDecision, RoutingHeaders, DPU_TARGET_TYPE},
};

/// Header name carrying the routing target type (`"dpu"` or host-local).
pub const TARGET_TYPE_HEADER: &str = "x-sonic-ss-target-type";

/// Header name carrying the routing target index (e.g. `"0"`, `"1"`).
pub const TARGET_INDEX_HEADER: &str = "x-sonic-ss-target-index";

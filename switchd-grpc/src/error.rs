use crate::conn_cache::DialError;
use switchd_core::ResolveError;
use tonic::Status;

/// Maps the core's routing-rejection and resolver errors onto RPC status
/// codes, per spec.md §7 ("Routing rejection ... Surfaced as unimplemented,
/// unavailable, or not-found respectively").
pub fn resolve_error_to_status(err: ResolveError) -> Status {
    match err {
        ResolveError::NotFound(index) => {
            Status::not_found(format!("DPU{index} not found"))
        }
        ResolveError::MissingIp(index) => {
            Status::not_found(format!("DPU{index} has no configured address"))
        }
        ResolveError::Internal(index, cause) => {
            Status::internal(format!("DPU{index} lookup failed: {cause}"))
        }
    }
}

pub fn dial_error_to_status(err: DialError) -> Status {
    Status::unavailable(format!(
        "DPU{} unreachable on ports {:?}: {}",
        err.index, err.ports, err.cause
    ))
}

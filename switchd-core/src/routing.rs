use crate::dpu::DpuIndex;
use crate::registry::{Method, MethodMode, MethodRegistry};

/// The value of the target-type header that selects DPU routing. Any other
/// value (or its absence) means the call is host-local.
pub const DPU_TARGET_TYPE: &str = "dpu";

/// The per-call routing headers, as read off the wire. Neither field implies
/// the other is present.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingHeaders {
    pub target_type: Option<String>,
    pub target_index: Option<String>,
}

impl RoutingHeaders {
    /// Builds headers from iterators of raw header values, taking the first
    /// value of each when more than one is present.
    pub fn from_values<'a>(
        target_type: impl IntoIterator<Item = &'a str>,
        target_index: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            target_type: target_type.into_iter().next().map(str::to_owned),
            target_index: target_index.into_iter().next().map(str::to_owned),
        }
    }

    /// True iff the caller asked for DPU routing, i.e. `target-type == "dpu"`.
    pub fn is_dpu(&self) -> bool {
        self.target_type.as_deref() == Some(DPU_TARGET_TYPE)
    }

    /// True iff either header was present at all.
    pub fn present(&self) -> bool {
        self.target_type.is_some() || self.target_index.is_some()
    }

    /// Parses the target index, if present and well formed.
    pub fn dpu_index(&self) -> Option<DpuIndex> {
        self.target_index.as_deref()?.parse().ok()
    }
}

/// The outcome of classifying a call by (method, routing headers, registry).
/// Never stored; recomputed per call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Answer the call on the host.
    Local,
    /// Proxy the call to the named DPU.
    Forward(DpuIndex),
    /// Fail the call before any forwarding is attempted.
    Reject(RejectReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The method is not registered for DPU routing.
    Unimplemented,
    /// `target-type=dpu` was set without a parseable `target-index`.
    MissingTargetIndex,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unimplemented => write!(
                f,
                "method is not implemented for DPU routing; remove the x-sonic-ss-target-* headers to call it host-locally"
            ),
            Self::MissingTargetIndex => write!(f, "x-sonic-ss-target-index is missing or not a valid DPU index"),
        }
    }
}

/// Classifies a call by method name, routing headers, and registry
/// contents. Pure and deterministic (spec.md §8): the same three inputs
/// always yield the same decision.
pub fn classify(method: &Method, headers: &RoutingHeaders, registry: &MethodRegistry) -> RoutingDecision {
    if !headers.present() {
        return RoutingDecision::Local;
    }
    if !headers.is_dpu() {
        // A target-type was given but it isn't the DPU sentinel: host-local.
        return RoutingDecision::Local;
    }
    let Some(index) = headers.dpu_index() else {
        return RoutingDecision::Reject(RejectReason::MissingTargetIndex);
    };
    match registry.mode_of(method) {
        (Some(MethodMode::Forward), true) => RoutingDecision::Forward(index),
        (Some(MethodMode::HandleLocally), true) => RoutingDecision::Local,
        (None, false) => RoutingDecision::Reject(RejectReason::Unimplemented),
        (mode, found) => unreachable!("mode_of returned inconsistent ({mode:?}, {found})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absence_of_both_is_host_local() {
        let h = RoutingHeaders::default();
        assert!(!h.present());
        assert!(!h.is_dpu());
    }

    #[test]
    fn first_value_wins() {
        let h = RoutingHeaders::from_values(["dpu", "host"], ["1", "2"]);
        assert_eq!(h.target_type.as_deref(), Some("dpu"));
        assert_eq!(h.target_index.as_deref(), Some("1"));
    }

    #[test]
    fn unrecognized_target_type_is_host_local() {
        let h = RoutingHeaders::from_values(["host"], ["0"]);
        assert!(!h.is_dpu());
    }

    #[test]
    fn dpu_index_parses_target_index() {
        let h = RoutingHeaders::from_values(["dpu"], ["3"]);
        assert_eq!(h.dpu_index(), Some(DpuIndex(3)));
    }

    #[test]
    fn classify_empty_headers_is_local_regardless_of_method() {
        let registry = MethodRegistry::default();
        let decision = classify("/not/registered", &RoutingHeaders::default(), &registry);
        assert_eq!(decision, RoutingDecision::Local);
    }

    #[test]
    fn classify_dpu_unknown_method_is_unimplemented() {
        let registry = MethodRegistry::default();
        let headers = RoutingHeaders::from_values(["dpu"], ["0"]);
        let decision = classify("/not/registered", &headers, &registry);
        assert_eq!(
            decision,
            RoutingDecision::Reject(RejectReason::Unimplemented)
        );
    }

    #[test]
    fn classify_dpu_forward_method_forwards_to_index() {
        let registry =
            MethodRegistry::with_entries([("/svc/Forwarded", MethodMode::Forward)]);
        let headers = RoutingHeaders::from_values(["dpu"], ["2"]);
        let decision = classify("/svc/Forwarded", &headers, &registry);
        assert_eq!(decision, RoutingDecision::Forward(DpuIndex(2)));
    }

    #[test]
    fn classify_dpu_handle_locally_method_is_local() {
        let registry =
            MethodRegistry::with_entries([("/svc/Local", MethodMode::HandleLocally)]);
        let headers = RoutingHeaders::from_values(["dpu"], ["0"]);
        let decision = classify("/svc/Local", &headers, &registry);
        assert_eq!(decision, RoutingDecision::Local);
    }

    #[test]
    fn classify_dpu_missing_index_is_rejected() {
        let registry =
            MethodRegistry::with_entries([("/svc/Forwarded", MethodMode::Forward)]);
        let headers = RoutingHeaders::from_values(["dpu"], []);
        let decision = classify("/svc/Forwarded", &headers, &registry);
        assert_eq!(
            decision,
            RoutingDecision::Reject(RejectReason::MissingTargetIndex)
        );
    }

    #[test]
    fn classify_non_dpu_target_type_is_local() {
        let registry =
            MethodRegistry::with_entries([("/svc/Forwarded", MethodMode::Forward)]);
        let headers = RoutingHeaders::from_values(["host"], ["0"]);
        let decision = classify("/svc/Forwarded", &headers, &registry);
        assert_eq!(decision, RoutingDecision::Local);
    }
}

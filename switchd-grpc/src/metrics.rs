//! Request-routing and transport metrics, exported for the admin endpoint
//! in `switchd-runtime`. Labels add `grpc_target` (host-local vs. DPU<n>)
//! to the usual gRPC server metric set, since distinguishing the two is
//! the whole point of this service.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::{
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct GrpcServerMetricsFamily {
    started: Family<Labels, Counter>,
    handling: Family<Labels, Histogram>,
    handled: Family<CodeLabels, Counter>,
    msg_received: Family<Labels, Counter>,
    msg_sent: Family<Labels, Counter>,
}

#[derive(Clone, Debug)]
pub(crate) struct GrpcServerRpcMetrics {
    started: Counter,
    msg_received: Counter,
    msg_sent: Counter,
    handling: Histogram,
    handled: Family<CodeLabels, Counter>,
    labels: Labels,
}

pub(crate) struct ResponseObserver {
    msg_sent: Counter,
    handled: Option<ResponseHandle>,
}

struct ResponseHandle {
    start: time::Instant,
    durations: Histogram,
    codes: Family<CodeLabels, Counter>,
    labels: Labels,
}

/// Where a call was routed, for metrics purposes only. `"local"` covers
/// both calls that never carried routing headers and calls explicitly
/// handled on the host; `"dpu"` covers forwarded calls regardless of
/// which DPU index.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug)]
pub enum Target {
    Local,
    Dpu,
}

impl Target {
    fn as_str(self) -> &'static str {
        match self {
            Target::Local => "local",
            Target::Dpu => "dpu",
        }
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct Labels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
    grpc_target: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct CodeLabels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
    grpc_target: &'static str,
    grpc_code: &'static str,
}

impl GrpcServerMetricsFamily {
    pub fn register(reg: &mut Registry) -> Self {
        let started = Family::<Labels, Counter>::default();
        reg.register(
            "started",
            "Total number of RPCs started on the server",
            started.clone(),
        );

        let msg_received = Family::<Labels, Counter>::default();
        reg.register(
            "msg_received",
            "Total number of RPC stream messages received on the server",
            msg_received.clone(),
        );

        let msg_sent = Family::<Labels, Counter>::default();
        reg.register(
            "msg_sent",
            "Total number of gRPC stream messages sent by the server",
            msg_sent.clone(),
        );

        let handled = Family::<CodeLabels, Counter>::default();
        reg.register(
            "handled",
            "Total number of RPCs completed on the server, regardless of success or failure",
            handled.clone(),
        );

        let handling = Family::<Labels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.01, 0.1, 1.0, 10.0, 30.0])
        });
        reg.register_with_unit(
            "handling",
            "Histogram of response latency (seconds) of RPCs handled by the server",
            prometheus_client::registry::Unit::Seconds,
            handling.clone(),
        );

        Self {
            started,
            msg_received,
            msg_sent,
            handled,
            handling,
        }
    }

    pub(crate) fn unary_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
        target: Target,
    ) -> GrpcServerRpcMetrics {
        self.rpc(svc, method, "unary", target)
    }

    pub(crate) fn client_stream_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
        target: Target,
    ) -> GrpcServerRpcMetrics {
        self.rpc(svc, method, "client_stream", target)
    }

    fn rpc(
        &self,
        grpc_service: &'static str,
        grpc_method: &'static str,
        grpc_type: &'static str,
        target: Target,
    ) -> GrpcServerRpcMetrics {
        let labels = Labels {
            grpc_service,
            grpc_method,
            grpc_type,
            grpc_target: target.as_str(),
        };
        GrpcServerRpcMetrics {
            started: self.started.get_or_create(&labels).clone(),
            msg_received: self.msg_received.get_or_create(&labels).clone(),
            msg_sent: self.msg_sent.get_or_create(&labels).clone(),
            handled: self.handled.clone(),
            handling: self.handling.get_or_create(&labels).clone(),
            labels,
        }
    }
}

impl GrpcServerRpcMetrics {
    pub(crate) fn start(&self) -> ResponseObserver {
        self.started.inc();
        self.msg_received.inc();

        ResponseObserver {
            msg_sent: self.msg_sent.clone(),
            handled: Some(ResponseHandle {
                start: time::Instant::now(),
                durations: self.handling.clone(),
                codes: self.handled.clone(),
                labels: self.labels.clone(),
            }),
        }
    }
}

impl ResponseObserver {
    pub(crate) fn msg_sent(&self) {
        self.msg_sent.inc();
    }

    pub(crate) fn end(mut self, code: tonic::Code) {
        self.handled
            .take()
            .expect("handle must be set")
            .inc_end(code);
    }
}

impl Drop for ResponseObserver {
    fn drop(&mut self) {
        if let Some(inner) = self.handled.take() {
            inner.inc_end(tonic::Code::Cancelled);
        }
    }
}

impl ResponseHandle {
    #[inline]
    fn inc_end(self, code: tonic::Code) {
        let Self {
            start,
            durations,
            codes,
            labels,
        } = self;
        durations.observe(start.elapsed().as_secs_f64());
        codes
            .get_or_create(&CodeLabels {
                grpc_service: labels.grpc_service,
                grpc_method: labels.grpc_method,
                grpc_type: labels.grpc_type,
                grpc_target: labels.grpc_target,
                grpc_code: code_str(code),
            })
            .inc();
    }
}

fn code_str(code: tonic::Code) -> &'static str {
    use tonic::Code::*;
    match code {
        Ok => "OK",
        Cancelled => "CANCELLED",
        Unknown => "UNKNOWN",
        InvalidArgument => "INVALID_ARGUMENT",
        DeadlineExceeded => "DEADLINE_EXCEEDED",
        NotFound => "NOT_FOUND",
        AlreadyExists => "ALREADY_EXISTS",
        PermissionDenied => "PERMISSION_DENIED",
        ResourceExhausted => "RESOURCE_EXHAUSTED",
        FailedPrecondition => "FAILED_PRECONDITION",
        Aborted => "ABORTED",
        OutOfRange => "OUT_OF_RANGE",
        Unimplemented => "UNIMPLEMENTED",
        Internal => "INTERNAL",
        Unavailable => "UNAVAILABLE",
        DataLoss => "DATA_LOSS",
        Unauthenticated => "UNAUTHENTICATED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_end_records_one_handled_sample() {
        let mut reg = Registry::default();
        let family = GrpcServerMetricsFamily::register(&mut reg);
        let rpc = family.unary_rpc("switchd.v1.SwitchControl", "Time", Target::Dpu);
        let obs = rpc.start();
        obs.end(tonic::Code::Ok);
    }

    #[test]
    fn dropping_observer_without_end_counts_as_cancelled() {
        let mut reg = Registry::default();
        let family = GrpcServerMetricsFamily::register(&mut reg);
        let rpc = family.unary_rpc("switchd.v1.SwitchControl", "Reboot", Target::Local);
        let _ = rpc.start();
    }
}

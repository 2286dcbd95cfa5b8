//! The Interceptor Chain (spec.md §4.7): composes a finite ordered list of
//! interceptors into one hook that runs on every call, unary or streaming.
//! Tonic inserts a [`tonic::GrpcMethod`] extension and the raw header map
//! into every `Request<()>` it hands to an interceptor before decoding the
//! body, which is all the extractor and registry need; neither needs the
//! typed message, so one chain covers both call shapes.

use std::sync::Arc;
use switchd_core::{classify, MethodRegistry, RejectReason, RoutingDecision, RoutingHeaders};
use tonic::{Code, Request, Status};

const TARGET_TYPE_HEADER: &str = switchd_core::TARGET_TYPE_HEADER;
const TARGET_INDEX_HEADER: &str = switchd_core::TARGET_INDEX_HEADER;

/// One link in the chain. An interceptor may transform the request, read
/// it for its own bookkeeping (e.g. to attach caller identity), or
/// short-circuit the whole call by returning `Err`.
pub trait Step: Send + Sync {
    fn call(&self, request: Request<()>) -> Result<Request<()>, Status>;
}

/// Composes interceptors in construction order; built from the inside out
/// so each step's continuation is simply "call the next step" (spec.md §9
/// "Interceptor chain").
#[derive(Clone)]
pub struct InterceptorChain {
    steps: Arc<[Arc<dyn Step>]>,
}

impl InterceptorChain {
    pub fn new(steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

impl tonic::service::Interceptor for InterceptorChain {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let mut req = request;
        for step in self.steps.iter() {
            req = step.call(req)?;
        }
        Ok(req)
    }
}

/// Establishes the caller's identity from the TLS peer certificate
/// presented during the handshake (spec.md §2 data flow: "authentication
/// interceptor establishes caller"). Authorization/RBAC beyond this is out
/// of scope (spec.md §1 Non-goals); this step only records who the peer
/// claimed to be, for downstream logging.
///
/// The identity itself is carried on the connection, not the call: the
/// front end (the TLS accept loop in `switchd-runtime`) attaches
/// [`PeerIdentity`] as a connection-level extension the same way tonic's
/// own `TcpConnectInfo`/`TlsConnectInfo` are attached, and tonic copies
/// connection extensions onto every request made on that connection.
pub struct AuthInterceptor {
    pub require_client_cert: bool,
}

/// The subject name read off a client certificate during the TLS
/// handshake, attached to the connection by the front end. Absent on
/// connections that did not present a client certificate.
#[derive(Clone, Debug, Default)]
pub struct PeerIdentity {
    pub subject: Option<String>,
}

/// The identity established for a call, if any (attached as a request
/// extension by [`AuthInterceptor`]).
#[derive(Clone, Debug, Default)]
pub struct CallerIdentity {
    pub subject: Option<String>,
}

impl Step for AuthInterceptor {
    fn call(&self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let subject = request
            .extensions()
            .get::<PeerIdentity>()
            .and_then(|p| p.subject.clone());

        if self.require_client_cert && subject.is_none() {
            return Err(Status::unauthenticated(
                "a client certificate is required but was not presented",
            ));
        }

        request
            .extensions_mut()
            .insert(CallerIdentity { subject });
        Ok(request)
    }
}

/// Reads the per-call routing headers, classifies the call against the
/// method registry, and attaches the resulting [`RoutingDecision`] as a
/// request extension (spec.md §4.1, §4.2). Rejects up front when the
/// decision is `Reject`; the continuation (the concrete `SwitchControl`
/// method implementation) reads the attached decision to choose between
/// answering locally and forwarding.
pub struct DpuProxyInterceptor {
    pub registry: Arc<MethodRegistry>,
}

impl Step for DpuProxyInterceptor {
    fn call(&self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let method = grpc_method_path(&request)
            .ok_or_else(|| Status::internal("missing gRPC method metadata"))?;

        let headers = RoutingHeaders::from_values(
            request
                .metadata()
                .get_all(TARGET_TYPE_HEADER)
                .iter()
                .filter_map(|v| v.to_str().ok()),
            request
                .metadata()
                .get_all(TARGET_INDEX_HEADER)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        );

        let decision = classify(&method, &headers, &self.registry);
        if let RoutingDecision::Reject(reason) = &decision {
            return Err(reject_status(reason));
        }

        request.extensions_mut().insert(decision);
        Ok(request)
    }
}

fn grpc_method_path(request: &Request<()>) -> Option<String> {
    let gm = request.extensions().get::<tonic::GrpcMethod>()?;
    Some(format!("/{}/{}", gm.service(), gm.method()))
}

fn reject_status(reason: &RejectReason) -> Status {
    match reason {
        RejectReason::Unimplemented => Status::new(Code::Unimplemented, reason.to_string()),
        RejectReason::MissingTargetIndex => {
            Status::new(Code::InvalidArgument, reason.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchd_core::{MethodMode, TARGET_INDEX_HEADER, TARGET_TYPE_HEADER};

    fn request_for(method: &'static str, target_type: Option<&str>, target_index: Option<&str>) -> Request<()> {
        let mut req = Request::new(());
        req.extensions_mut()
            .insert(tonic::GrpcMethod::new("svc", method));
        if let Some(tt) = target_type {
            req.metadata_mut().insert(TARGET_TYPE_HEADER, tt.parse().unwrap());
        }
        if let Some(ti) = target_index {
            req.metadata_mut().insert(TARGET_INDEX_HEADER, ti.parse().unwrap());
        }
        req
    }

    #[test]
    fn unknown_dpu_method_is_rejected_before_reaching_handler() {
        let registry = Arc::new(MethodRegistry::with_entries([]));
        let step = DpuProxyInterceptor { registry };
        let req = request_for("Nonexistent", Some("dpu"), Some("0"));
        let err = step.call(req).unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[test]
    fn forward_method_attaches_forward_decision() {
        let registry = Arc::new(MethodRegistry::with_entries([("/svc/Known", MethodMode::Forward)]));
        let step = DpuProxyInterceptor { registry };
        let req = request_for("Known", Some("dpu"), Some("1"));
        let req = step.call(req).unwrap();
        assert!(matches!(
            req.extensions().get::<RoutingDecision>(),
            Some(RoutingDecision::Forward(_))
        ));
    }

    #[test]
    fn absent_headers_attach_local_decision() {
        let registry = Arc::new(MethodRegistry::with_entries([("/svc/Known", MethodMode::Forward)]));
        let step = DpuProxyInterceptor { registry };
        let req = request_for("Known", None, None);
        let req = step.call(req).unwrap();
        assert_eq!(
            req.extensions().get::<RoutingDecision>(),
            Some(&RoutingDecision::Local)
        );
    }
}

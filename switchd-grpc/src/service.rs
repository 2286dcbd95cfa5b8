//! The `SwitchControl` service: wires the routing decision attached by
//! [`crate::interceptor::DpuProxyInterceptor`] to either the local handler
//! or a DPU forward, for every RPC (spec.md §4.5, §4.6).

use std::sync::Arc;

use switchd_core::{DpuIndex, RoutingDecision};
use switchd_proto::switch_control_client::SwitchControlClient;
use switchd_proto::switch_control_server::SwitchControl;
use switchd_proto::{
    InstallPackageRequest, InstallPackageResponse, RebootRequest, RebootResponse, TimeRequest,
    TimeResponse, TransferFileFromRemoteRequest, TransferFileFromRemoteResponse, UploadFileChunk,
    UploadFileResponse,
};
use tonic::{Request, Response, Status, Streaming};

use crate::conn_cache::ConnectionCache;
use crate::error::{dial_error_to_status, resolve_error_to_status};
use crate::forward::{forward_stream, forward_unary};
use crate::local::LocalHandler;
use crate::resolver::DpuResolver;

/// The assembled `SwitchControl` implementation. Each method looks at the
/// [`RoutingDecision`] the interceptor chain already computed and attached
/// to the request; it never reclassifies.
pub struct SwitchControlService {
    resolver: DpuResolver,
    conn_cache: Arc<ConnectionCache>,
    local: Arc<dyn LocalHandler>,
}

impl SwitchControlService {
    pub fn new(
        resolver: DpuResolver,
        conn_cache: Arc<ConnectionCache>,
        local: Arc<dyn LocalHandler>,
    ) -> Self {
        Self {
            resolver,
            conn_cache,
            local,
        }
    }

    /// Resolves `index` and returns a connected client, mapping both
    /// failure modes onto the status codes named in spec.md §7.
    async fn dial(&self, index: DpuIndex) -> Result<SwitchControlClient<tonic::transport::Channel>, Status> {
        let record = self
            .resolver
            .resolve(index)
            .await
            .map_err(resolve_error_to_status)?;
        if !record.reachable {
            return Err(Status::unavailable(format!(
                "DPU{index} is marked unreachable; no dial attempted"
            )));
        }
        let channel = self
            .conn_cache
            .get_or_dial(index, record.address, &record.ports)
            .await
            .map_err(dial_error_to_status)?;
        Ok(SwitchControlClient::new(channel))
    }

    fn decision(request: &Request<impl Send>) -> RoutingDecision {
        request
            .extensions()
            .get::<RoutingDecision>()
            .cloned()
            .unwrap_or(RoutingDecision::Local)
    }
}

#[tonic::async_trait]
impl SwitchControl for SwitchControlService {
    #[tracing::instrument(skip(self, request))]
    async fn time(&self, request: Request<TimeRequest>) -> Result<Response<TimeResponse>, Status> {
        match Self::decision(&request) {
            RoutingDecision::Forward(index) => {
                let mut client = self.dial(index).await?;
                forward_unary(request, |req| async move { client.time(req).await }).await
            }
            RoutingDecision::Local => {
                let resp = self.local.time(request.into_inner()).await?;
                Ok(Response::new(resp))
            }
            RoutingDecision::Reject(_) => unreachable!("rejected calls never reach the service"),
        }
    }

    #[tracing::instrument(skip(self, request))]
    async fn upload_file(
        &self,
        request: Request<Streaming<UploadFileChunk>>,
    ) -> Result<Response<UploadFileResponse>, Status> {
        match Self::decision(&request) {
            RoutingDecision::Forward(index) => {
                let mut client = self.dial(index).await?;
                forward_stream(request.into_inner(), |outbound| async move {
                    client.upload_file(outbound).await
                })
                .await
            }
            RoutingDecision::Local => Err(Status::unimplemented(
                "UploadFile is only handled on a DPU; set x-sonic-ss-target-type=dpu",
            )),
            RoutingDecision::Reject(_) => unreachable!("rejected calls never reach the service"),
        }
    }

    #[tracing::instrument(skip(self, request))]
    async fn transfer_file_from_remote(
        &self,
        request: Request<TransferFileFromRemoteRequest>,
    ) -> Result<Response<TransferFileFromRemoteResponse>, Status> {
        let resp = self
            .local
            .transfer_file_from_remote(request.into_inner())
            .await?;
        Ok(Response::new(resp))
    }

    #[tracing::instrument(skip(self, request))]
    async fn reboot(&self, request: Request<RebootRequest>) -> Result<Response<RebootResponse>, Status> {
        let resp = self.local.reboot(request.into_inner()).await?;
        Ok(Response::new(resp))
    }

    #[tracing::instrument(skip(self, request))]
    async fn install_package(
        &self,
        request: Request<InstallPackageRequest>,
    ) -> Result<Response<InstallPackageResponse>, Status> {
        let resp = self.local.install_package(request.into_inner()).await?;
        Ok(Response::new(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{test_support::StaticKvStore, KvStores};
    use crate::local::test_support::StubLocalHandler;

    fn service() -> SwitchControlService {
        let stores = KvStores {
            state: Arc::new(StaticKvStore::new([])),
            config: Arc::new(StaticKvStore::new([])),
        };
        SwitchControlService::new(
            DpuResolver::new(stores),
            Arc::new(ConnectionCache::new()),
            Arc::new(StubLocalHandler),
        )
    }

    #[tokio::test]
    async fn time_without_routing_decision_defaults_to_local() {
        let svc = service();
        let resp = svc.time(Request::new(TimeRequest {})).await.unwrap();
        assert!(resp.into_inner().unix_seconds > 0);
    }

    #[tokio::test]
    async fn forward_to_unresolvable_dpu_is_not_found() {
        let svc = service();
        let mut request = Request::new(TimeRequest {});
        request
            .extensions_mut()
            .insert(RoutingDecision::Forward(switchd_core::DpuIndex(7)));
        let err = svc.time(request).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn forward_to_unreachable_dpu_is_unavailable_without_dialing() {
        let stores = KvStores {
            state: Arc::new(StaticKvStore::new([(
                "CHASSIS_MIDPLANE_TABLE|DPU3",
                std::collections::HashMap::from([(
                    "ip_address".to_string(),
                    "169.254.200.3".to_string(),
                )]),
            )])),
            config: Arc::new(StaticKvStore::new([])),
        };
        let svc = SwitchControlService::new(
            DpuResolver::new(stores),
            Arc::new(ConnectionCache::new()),
            Arc::new(StubLocalHandler),
        );
        let mut request = Request::new(TimeRequest {});
        request
            .extensions_mut()
            .insert(RoutingDecision::Forward(switchd_core::DpuIndex(3)));
        let err = svc.time(request).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }
}

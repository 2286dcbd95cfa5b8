//! The narrow seam to the on-switch data-model handlers (spec.md §1
//! Non-goals): disk-space/firmware-listing/OS-install/reboot business
//! logic, host-command execution, and the configuration-file database
//! live outside this crate. `LocalHandler` is the only interface this
//! crate needs from them.

use async_trait::async_trait;
use switchd_proto::{
    InstallPackageRequest, InstallPackageResponse, RebootRequest, RebootResponse,
    TimeRequest, TimeResponse, TransferFileFromRemoteRequest, TransferFileFromRemoteResponse,
};
use tonic::Status;

/// Implemented by whatever owns the on-switch data model. Every method
/// here corresponds to a `MethodMode::HandleLocally` entry in the default
/// registry (spec.md §4.2), plus `time` for when DPU routing headers are
/// absent and the call must still be answered on the host.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn time(&self, request: TimeRequest) -> Result<TimeResponse, Status>;

    async fn transfer_file_from_remote(
        &self,
        request: TransferFileFromRemoteRequest,
    ) -> Result<TransferFileFromRemoteResponse, Status>;

    async fn reboot(&self, request: RebootRequest) -> Result<RebootResponse, Status>;

    async fn install_package(
        &self,
        request: InstallPackageRequest,
    ) -> Result<InstallPackageResponse, Status>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// A `LocalHandler` that answers every call with a fixed, inspectable
    /// response. Used by `switchd-grpc`'s own tests and available to
    /// downstream crates under the `test-support` feature.
    #[derive(Default)]
    pub struct StubLocalHandler;

    #[async_trait]
    impl LocalHandler for StubLocalHandler {
        async fn time(&self, _request: TimeRequest) -> Result<TimeResponse, Status> {
            let unix_seconds = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| Status::internal(e.to_string()))?
                .as_secs() as i64;
            Ok(TimeResponse { unix_seconds })
        }

        async fn transfer_file_from_remote(
            &self,
            _request: TransferFileFromRemoteRequest,
        ) -> Result<TransferFileFromRemoteResponse, Status> {
            Ok(TransferFileFromRemoteResponse { bytes_written: 0 })
        }

        async fn reboot(&self, _request: RebootRequest) -> Result<RebootResponse, Status> {
            Ok(RebootResponse {})
        }

        async fn install_package(
            &self,
            _request: InstallPackageRequest,
        ) -> Result<InstallPackageResponse, Status> {
            Ok(InstallPackageResponse { accepted: true })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubLocalHandler;
    use super::*;

    #[tokio::test]
    async fn stub_reboot_always_succeeds() {
        let handler = StubLocalHandler;
        let resp = handler.reboot(RebootRequest { force: false }).await.unwrap();
        assert_eq!(resp, RebootResponse {});
    }

    #[tokio::test]
    async fn stub_time_returns_plausible_unix_seconds() {
        let handler = StubLocalHandler;
        let resp = handler.time(TimeRequest {}).await.unwrap();
        assert!(resp.unix_seconds > 1_700_000_000);
    }
}

use crate::kv::KvStores;
use std::net::IpAddr;
use switchd_core::{DpuIndex, DpuPort, DpuRecord, ResolveError};

/// Well-known gNMI ports tried after the configured primary, in order
/// (spec.md §4.3 step 6).
const WELL_KNOWN_PORTS: [DpuPort; 2] = [8080, 50052];

/// The compile-time default gNMI port used when `DPU|dpu<n>`'s `gnmi_port`
/// field is absent (spec.md §4.3 step 5).
const DEFAULT_GNMI_PORT: DpuPort = 8080;

/// Resolves a DPU's address and reachability against the two key-value
/// stores (spec.md §4.3). Stateless: every call re-reads both stores and
/// never caches or retries.
#[derive(Clone)]
pub struct DpuResolver {
    stores: KvStores,
}

impl DpuResolver {
    pub fn new(stores: KvStores) -> Self {
        Self { stores }
    }

    #[tracing::instrument(skip(self), fields(dpu = %index))]
    pub async fn resolve(&self, index: DpuIndex) -> Result<DpuRecord, ResolveError> {
        let midplane_key = format!("CHASSIS_MIDPLANE_TABLE|DPU{index}");
        let midplane = self
            .stores
            .state
            .hgetall(&midplane_key)
            .await
            .map_err(|e| ResolveError::Internal(index, e.to_string()))?;
        if midplane.is_empty() {
            return Err(ResolveError::NotFound(index));
        }

        let address: IpAddr = midplane
            .get("ip_address")
            .filter(|s| !s.is_empty())
            .ok_or(ResolveError::MissingIp(index))?
            .parse()
            .map_err(|_| ResolveError::MissingIp(index))?;

        let reachable = midplane.get("access").map(String::as_str) == Some("True");

        let dpu_key = format!("DPU|dpu{index}");
        let dpu_cfg = self
            .stores
            .config
            .hgetall(&dpu_key)
            .await
            .map_err(|e| ResolveError::Internal(index, e.to_string()))?;

        let configured_port = dpu_cfg
            .get("gnmi_port")
            .and_then(|p| p.parse::<DpuPort>().ok())
            .unwrap_or(DEFAULT_GNMI_PORT);

        let mut ports = Vec::with_capacity(1 + WELL_KNOWN_PORTS.len());
        ports.push(configured_port);
        for port in WELL_KNOWN_PORTS {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }

        tracing::debug!(%address, reachable, ?ports, "resolved DPU record");
        Ok(DpuRecord {
            index,
            address,
            reachable,
            ports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::test_support::StaticKvStore;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn stores(
        state: impl IntoIterator<Item = (&'static str, HashMap<String, String>)>,
        config: impl IntoIterator<Item = (&'static str, HashMap<String, String>)>,
    ) -> KvStores {
        KvStores {
            state: Arc::new(StaticKvStore::new(state)),
            config: Arc::new(StaticKvStore::new(config)),
        }
    }

    #[tokio::test]
    async fn resolves_reachable_dpu_with_configured_port() {
        let stores = stores(
            [(
                "CHASSIS_MIDPLANE_TABLE|DPU0",
                HashMap::from([
                    ("ip_address".to_string(), "169.254.200.1".to_string()),
                    ("access".to_string(), "True".to_string()),
                ]),
            )],
            [(
                "DPU|dpu0",
                HashMap::from([("gnmi_port".to_string(), "8080".to_string())]),
            )],
        );
        let record = DpuResolver::new(stores).resolve(DpuIndex(0)).await.unwrap();
        assert_eq!(record.address, "169.254.200.1".parse::<IpAddr>().unwrap());
        assert!(record.reachable);
        assert_eq!(record.ports, vec![8080, 50052]);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let stores = stores([], []);
        let err = DpuResolver::new(stores).resolve(DpuIndex(0)).await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound(DpuIndex(0)));
    }

    #[tokio::test]
    async fn empty_ip_address_is_missing_ip() {
        let stores = stores(
            [(
                "CHASSIS_MIDPLANE_TABLE|DPU0",
                HashMap::from([("ip_address".to_string(), "".to_string())]),
            )],
            [],
        );
        let err = DpuResolver::new(stores).resolve(DpuIndex(0)).await.unwrap_err();
        assert_eq!(err, ResolveError::MissingIp(DpuIndex(0)));
    }

    #[tokio::test]
    async fn absent_access_field_is_unreachable() {
        let stores = stores(
            [(
                "CHASSIS_MIDPLANE_TABLE|DPU0",
                HashMap::from([("ip_address".to_string(), "169.254.200.1".to_string())]),
            )],
            [],
        );
        let record = DpuResolver::new(stores).resolve(DpuIndex(0)).await.unwrap();
        assert!(!record.reachable);
        assert_eq!(record.ports, vec![DEFAULT_GNMI_PORT, 50052]);
    }

    #[tokio::test]
    async fn repeated_resolve_with_unchanged_store_is_stable() {
        let stores = stores(
            [(
                "CHASSIS_MIDPLANE_TABLE|DPU0",
                HashMap::from([
                    ("ip_address".to_string(), "169.254.200.1".to_string()),
                    ("access".to_string(), "True".to_string()),
                ]),
            )],
            [],
        );
        let resolver = DpuResolver::new(stores);
        let first = resolver.resolve(DpuIndex(0)).await.unwrap();
        let second = resolver.resolve(DpuIndex(0)).await.unwrap();
        assert_eq!(first, second);
    }
}

use std::collections::HashMap;

/// A fully-qualified gRPC method name, e.g. `/switchd.v1.SwitchControl/Time`.
pub type Method = str;

/// How a method is routed when DPU headers are present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodMode {
    /// Proxy the call to the designated DPU.
    Forward,
    /// The host answers, though it may use the routing headers as context.
    HandleLocally,
}

/// Fixed at construction; immutable (and therefore lock-free) for the life
/// of the process. Absence from the table means: reject with
/// `unimplemented` when DPU routing headers are present, otherwise handle
/// locally (spec.md §3, "Method registry entry").
#[derive(Clone, Debug)]
pub struct MethodRegistry {
    modes: HashMap<&'static str, MethodMode>,
}

/// The switch-control methods this core ships with by default (spec.md
/// §4.2). Method names match the service defined in `switchd-proto`.
pub const METHOD_TIME: &str = "/switchd.v1.SwitchControl/Time";
pub const METHOD_UPLOAD_FILE: &str = "/switchd.v1.SwitchControl/UploadFile";
pub const METHOD_TRANSFER_FILE_FROM_REMOTE: &str =
    "/switchd.v1.SwitchControl/TransferFileFromRemote";
pub const METHOD_REBOOT: &str = "/switchd.v1.SwitchControl/Reboot";
pub const METHOD_INSTALL_PACKAGE: &str = "/switchd.v1.SwitchControl/InstallPackage";
pub const METHOD_SERVER_REFLECTION: &str =
    "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo";

impl Default for MethodRegistry {
    fn default() -> Self {
        let mut modes = HashMap::new();
        // Time-of-day query on the DPU: cheap, stateless, forward verbatim.
        modes.insert(METHOD_TIME, MethodMode::Forward);
        // File upload to the DPU: the DPU is the terminus, forward the stream.
        modes.insert(METHOD_UPLOAD_FILE, MethodMode::Forward);
        // The host must pre-fetch from the remote server before it can hand
        // the file to the DPU, so this can't be a pure proxy.
        modes.insert(
            METHOD_TRANSFER_FILE_FROM_REMOTE,
            MethodMode::HandleLocally,
        );
        // Reboot and package install require host-orchestrated DPU-side
        // pre-work; the host answers and drives the DPU itself.
        modes.insert(METHOD_REBOOT, MethodMode::HandleLocally);
        modes.insert(METHOD_INSTALL_PACKAGE, MethodMode::HandleLocally);
        modes.insert(METHOD_SERVER_REFLECTION, MethodMode::HandleLocally);
        Self { modes }
    }
}

impl MethodRegistry {
    /// Builds a registry from an explicit set of entries, bypassing the
    /// built-in defaults. Mainly useful for tests.
    pub fn with_entries(entries: impl IntoIterator<Item = (&'static str, MethodMode)>) -> Self {
        Self {
            modes: entries.into_iter().collect(),
        }
    }

    /// Looks up the mode for `method`. The second element of the tuple is
    /// `false` when `method` is absent from the table.
    pub fn mode_of(&self, method: &Method) -> (Option<MethodMode>, bool) {
        match self.modes.get(method) {
            Some(mode) => (Some(*mode), true),
            None => (None, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let reg = MethodRegistry::default();
        assert_eq!(reg.mode_of(METHOD_TIME).0, Some(MethodMode::Forward));
        assert_eq!(
            reg.mode_of(METHOD_UPLOAD_FILE).0,
            Some(MethodMode::Forward)
        );
        assert_eq!(
            reg.mode_of(METHOD_TRANSFER_FILE_FROM_REMOTE).0,
            Some(MethodMode::HandleLocally)
        );
        assert_eq!(reg.mode_of(METHOD_REBOOT).0, Some(MethodMode::HandleLocally));
        assert_eq!(
            reg.mode_of(METHOD_INSTALL_PACKAGE).0,
            Some(MethodMode::HandleLocally)
        );
        assert_eq!(
            reg.mode_of(METHOD_SERVER_REFLECTION).0,
            Some(MethodMode::HandleLocally)
        );
    }

    #[test]
    fn unknown_method_is_absent() {
        let reg = MethodRegistry::default();
        let (mode, found) = reg.mode_of("/switchd.v1.SwitchControl/Nonexistent");
        assert_eq!(mode, None);
        assert!(!found);
    }

    #[test]
    fn repeated_lookups_are_stable() {
        let reg = MethodRegistry::default();
        assert_eq!(reg.mode_of(METHOD_TIME), reg.mode_of(METHOD_TIME));
    }
}

//! Daemon self-report normalisation.

use serde::Deserialize;

use crate::exec::CommandRunner;

use super::{Oci, OciBinary, OciError};

/// Resources the container daemon reports for its host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SysInfo {
    /// Number of CPUs available to containers.
    pub cpus: u32,
    /// Total memory in bytes.
    pub total_memory: u64,
}

#[derive(Deserialize)]
struct DockerSysInfo {
    #[serde(rename = "NCPU")]
    ncpu: u32,
    #[serde(rename = "MemTotal")]
    mem_total: u64,
}

#[derive(Deserialize)]
struct PodmanSysInfo {
    host: PodmanHost,
}

#[derive(Deserialize)]
struct PodmanHost {
    cpus: u32,
    #[serde(rename = "MemTotal")]
    mem_total: u64,
}

/// Decodes `system info --format {{json .}}` output for `binary`.
///
/// Surrounding whitespace and single quotes are tolerated.
///
/// # Errors
///
/// Returns [`OciError::Parse`] when the payload does not match the runtime's
/// shape.
pub fn parse_system_info(binary: OciBinary, raw: &str) -> Result<SysInfo, OciError> {
    let payload = raw.trim().trim_matches('\'');
    let decode_error = |err: serde_json::Error| {
        OciError::parse(
            &format!("{binary} system info"),
            format!("{err} in output {payload:?}"),
        )
    };
    match binary {
        OciBinary::Docker => {
            let info: DockerSysInfo = serde_json::from_str(payload).map_err(decode_error)?;
            Ok(SysInfo {
                cpus: info.ncpu,
                total_memory: info.mem_total,
            })
        }
        OciBinary::Podman => {
            let info: PodmanSysInfo = serde_json::from_str(payload).map_err(decode_error)?;
            Ok(SysInfo {
                cpus: info.host.cpus,
                total_memory: info.host.mem_total,
            })
        }
    }
}

impl<R: CommandRunner> Oci<R> {
    /// Queries the daemon for its CPU and memory resources.
    ///
    /// # Errors
    ///
    /// Returns [`OciError`] when the daemon cannot be queried or its output
    /// cannot be decoded.
    pub fn system_info(&self) -> Result<SysInfo, OciError> {
        let result = self.run(&["system", "info", "--format", "{{json .}}"])?;
        parse_system_info(self.binary, &result.stdout)
    }
}

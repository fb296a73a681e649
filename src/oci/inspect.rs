//! Templated container inspection.

use crate::exec::CommandRunner;
use crate::state::State;

use super::{FailureKind, Oci, OciBinary, OciError};

/// Address podman reports for containers bound to the loopback interface.
const DEFAULT_BIND_IPV4: &str = "127.0.0.1";

/// Addresses a container holds on its networks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerAddresses {
    /// IPv4 address.
    pub ipv4: String,
    /// Global IPv6 address, empty when none is assigned.
    pub ipv6: String,
}

impl<R: CommandRunner> Oci<R> {
    /// Runs `container inspect` with a Go template and returns the output
    /// lines.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::ContainerNotFound`] when the container is absent.
    pub fn inspect(&self, container: &str, format: &str) -> Result<Vec<String>, OciError> {
        let result = self
            .run(&["container", "inspect", "-f", format, container])
            .map_err(|err| match err.kind() {
                Some(FailureKind::NoSuchContainer) => OciError::ContainerNotFound {
                    container: container.to_owned(),
                },
                _ => err,
            })?;
        Ok(result
            .stdout
            .lines()
            .map(|line| line.trim().trim_matches('\'').to_owned())
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn inspect_single_line(
        &self,
        container: &str,
        format: &str,
        resource: &str,
    ) -> Result<String, OciError> {
        let lines = self.inspect(container, format)?;
        match lines.as_slice() {
            [line] => Ok(line.clone()),
            other => Err(OciError::parse(
                resource,
                format!(
                    "output should be one line, got {} lines: {other:?}",
                    other.len()
                ),
            )),
        }
    }

    /// Host port published for `container_port/tcp`.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::Parse`] when the port is not published.
    pub fn forwarded_port(&self, container: &str, container_port: u16) -> Result<u16, OciError> {
        let format = match self.binary {
            OciBinary::Docker => format!(
                "{{{{(index (index .NetworkSettings.Ports \"{container_port}/tcp\") 0).HostPort}}}}"
            ),
            OciBinary::Podman => format!(
                "{{{{range .NetworkSettings.Ports}}}}{{{{if eq .ContainerPort {container_port}}}}}{{{{.HostPort}}}}{{{{end}}}}{{{{end}}}}"
            ),
        };
        let resource = format!("host port for {container_port}/tcp");
        let text = self.inspect_single_line(container, &format, &resource)?;
        text.parse::<u16>()
            .map_err(|err| OciError::parse(&resource, format!("{text:?}: {err}")))
    }

    /// IPv4 and IPv6 addresses of `container`.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::Parse`] when the inspection output is not a
    /// single `ipv4,ipv6` line.
    pub fn container_addresses(&self, container: &str) -> Result<ContainerAddresses, OciError> {
        match self.binary {
            OciBinary::Podman => {
                let lines = self.inspect(container, "{{.NetworkSettings.IPAddress}}")?;
                let ipv4 = lines
                    .first()
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_BIND_IPV4.to_owned());
                Ok(ContainerAddresses {
                    ipv4,
                    ipv6: String::new(),
                })
            }
            OciBinary::Docker => {
                let line = self.inspect_single_line(
                    container,
                    "{{range .NetworkSettings.Networks}}{{.IPAddress}},{{.GlobalIPv6Address}}{{end}}",
                    "container addresses",
                )?;
                let parts: Vec<&str> = line.split(',').collect();
                match parts.as_slice() {
                    [ipv4, ipv6] => Ok(ContainerAddresses {
                        ipv4: (*ipv4).to_owned(),
                        ipv6: (*ipv6).to_owned(),
                    }),
                    other => Err(OciError::parse(
                        "container addresses",
                        format!("expected 2 values, got {}: {other:?}", other.len()),
                    )),
                }
            }
        }
    }

    /// Lifecycle state of `container`; an absent container is
    /// [`State::None`].
    ///
    /// # Errors
    ///
    /// Returns [`OciError`] when the runtime cannot be queried.
    pub fn container_state(&self, container: &str) -> Result<State, OciError> {
        match self.inspect_single_line(container, "{{.State.Status}}", "container status") {
            Ok(status) => Ok(match status.as_str() {
                "running" | "restarting" => State::Running,
                "paused" => State::Paused,
                "created" | "exited" | "removing" | "stopped" => State::Stopped,
                "dead" => State::Error,
                _ => State::None,
            }),
            Err(OciError::ContainerNotFound { .. }) => Ok(State::None),
            Err(err) => Err(err),
        }
    }

    /// Whether `container` exists.
    ///
    /// # Errors
    ///
    /// Returns [`OciError`] when the runtime cannot be queried.
    pub fn container_exists(&self, container: &str) -> Result<bool, OciError> {
        self.container_state(container)
            .map(|state| !matches!(state, State::None))
    }
}

//! Dedicated bridge networks for container nodes.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::exec::CommandRunner;

use super::{CREATED_BY_LABEL_KEY, FailureKind, Oci, OciBinary, OciError};

/// First subnet tried when creating a network.
pub const DEFAULT_SUBNET: &str = "192.168.49.0/24";

/// Upper bound on subnet changes after a collision.
pub const MAX_SUBNET_PERTURBATIONS: u8 = 13;

/// Step added to the third octet after a collision.
const SUBNET_STEP: u8 = 10;

const NETWORK_INSPECT_FORMAT: &str =
    "{{(index .IPAM.Config 0).Subnet}},{{(index .IPAM.Config 0).Gateway}}";

/// IPv4 subnet in CIDR form.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Subnet {
    base: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// Network address of the subnet.
    #[must_use]
    pub const fn base(self) -> Ipv4Addr {
        self.base
    }

    /// Prefix length of the subnet.
    #[must_use]
    pub const fn prefix(self) -> u8 {
        self.prefix
    }

    /// Gateway address: the first host address of the subnet.
    #[must_use]
    pub fn gateway(self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.base).saturating_add(1))
    }

    /// Subnet tried after a collision: the third octet advanced by ten.
    ///
    /// Returns `None` once the octet would overflow.
    #[must_use]
    pub fn perturbed(self) -> Option<Self> {
        let [a, b, c, d] = self.base.octets();
        c.checked_add(SUBNET_STEP).map(|next| Self {
            base: Ipv4Addr::new(a, b, next, d),
            prefix: self.prefix,
        })
    }
}

impl FromStr for Subnet {
    type Err = OciError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || OciError::parse("subnet", format!("invalid CIDR {value:?}"));
        let (address_text, prefix_text) = value.trim().split_once('/').ok_or_else(invalid)?;
        let address = Ipv4Addr::from_str(address_text).map_err(|_| invalid())?;
        let prefix = prefix_text
            .parse::<u8>()
            .ok()
            .filter(|bits| *bits <= 32)
            .ok_or_else(invalid)?;
        let mask = u32::MAX.checked_shl(u32::from(32 - prefix)).unwrap_or(0);
        Ok(Self {
            base: Ipv4Addr::from(u32::from(address) & mask),
            prefix,
        })
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix)
    }
}

/// Addressing of an existing network.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NetworkInfo {
    /// Subnet assigned to the network.
    pub subnet: Subnet,
    /// Gateway reported by the runtime, if any.
    pub gateway: Option<Ipv4Addr>,
}

/// Operating system the tool runs on, which decides how containers reach
/// the host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HostPlatform {
    /// Linux: containers share the host's network stack.
    Linux,
    /// macOS: the runtime runs in a VM.
    MacOs,
    /// Windows: the runtime runs in a VM.
    Windows,
}

impl HostPlatform {
    /// Platform of the running process.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

impl<R: CommandRunner> Oci<R> {
    fn require_docker(&self, operation: &str) -> Result<(), OciError> {
        match self.binary {
            OciBinary::Docker => Ok(()),
            OciBinary::Podman => Err(OciError::Unsupported {
                binary: self.binary.program().to_owned(),
                operation: operation.to_owned(),
            }),
        }
    }

    /// Creates the named bridge network, or returns the gateway of an
    /// existing one.
    ///
    /// Subnet collisions are retried on a perturbed subnet, at most
    /// [`MAX_SUBNET_PERTURBATIONS`] times.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::NoFreeSubnet`] when every candidate collides, or
    /// any other runtime failure.
    pub fn create_network(&self, name: &str) -> Result<Ipv4Addr, OciError> {
        self.require_docker("network creation")?;

        match self.inspect_network(name) {
            Ok(existing) => {
                info!(network = name, subnet = %existing.subnet, "found existing network");
                return Ok(existing
                    .gateway
                    .unwrap_or_else(|| existing.subnet.gateway()));
            }
            Err(OciError::NetworkNotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        let mut subnet = Subnet::from_str(DEFAULT_SUBNET)?;
        let mut perturbations = 0_u8;
        loop {
            match self.attempt_create_network(name, subnet) {
                Ok(gateway) => return Ok(gateway),
                Err(OciError::SubnetTaken { .. } | OciError::GatewayTaken { .. })
                    if perturbations < MAX_SUBNET_PERTURBATIONS =>
                {
                    let Some(next) = subnet.perturbed() else {
                        break;
                    };
                    info!(network = name, %subnet, next = %next, "subnet taken, trying another");
                    subnet = next;
                    perturbations += 1;
                }
                Err(OciError::SubnetTaken { .. } | OciError::GatewayTaken { .. }) => break,
                Err(err) => return Err(err),
            }
        }

        Err(OciError::NoFreeSubnet {
            network: name.to_owned(),
            attempts: perturbations,
        })
    }

    fn attempt_create_network(&self, name: &str, subnet: Subnet) -> Result<Ipv4Addr, OciError> {
        let gateway = subnet.gateway();
        debug!(network = name, %subnet, %gateway, "creating network");
        let subnet_arg = format!("--subnet={subnet}");
        let gateway_arg = format!("--gateway={gateway}");
        let label_arg = format!("--label={CREATED_BY_LABEL_KEY}=true");
        let result = self.run(&[
            "network",
            "create",
            "--driver=bridge",
            &subnet_arg,
            &gateway_arg,
            "-o",
            "--ip-masq",
            "-o",
            "--icc",
            &label_arg,
            name,
        ]);
        match result {
            Ok(_) => Ok(gateway),
            Err(err) => Err(match err.kind() {
                Some(FailureKind::SubnetTaken) => OciError::SubnetTaken {
                    subnet: subnet.to_string(),
                },
                Some(FailureKind::GatewayTaken) => OciError::GatewayTaken {
                    gateway: gateway.to_string(),
                },
                _ => err,
            }),
        }
    }

    /// Reads the subnet and gateway of the named network.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::NetworkNotFound`] when the network is absent, or
    /// [`OciError::Parse`] when the output is malformed.
    pub fn inspect_network(&self, name: &str) -> Result<NetworkInfo, OciError> {
        let result = self
            .run(&["network", "inspect", name, "--format", NETWORK_INSPECT_FORMAT])
            .map_err(|err| match err.kind() {
                Some(FailureKind::NoSuchNetwork) => OciError::NetworkNotFound {
                    network: name.to_owned(),
                },
                _ => err,
            })?;
        parse_network_info(&result.stdout)
    }

    /// Whether the named network exists. Inspection failures other than
    /// "not found" are logged and reported as absent.
    #[must_use]
    pub fn network_exists(&self, name: &str) -> bool {
        match self.inspect_network(name) {
            Ok(_) => true,
            Err(OciError::NetworkNotFound { .. }) => false,
            Err(err) => {
                warn!(network = name, error = %err, "error inspecting network");
                false
            }
        }
    }

    /// Removes the named network. Removing an absent network succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::NetworkInUse`] while containers remain attached.
    pub fn remove_network(&self, name: &str) -> Result<(), OciError> {
        if !self.network_exists(name) {
            return Ok(());
        }
        match self.run(&["network", "remove", name]) {
            Ok(_) => Ok(()),
            Err(err) => match err.kind() {
                Some(FailureKind::NoSuchNetwork) => Ok(()),
                Some(FailureKind::ActiveEndpoints) => Err(OciError::NetworkInUse {
                    network: name.to_owned(),
                }),
                _ => Err(err),
            },
        }
    }

    /// Lists the names of networks carrying `label`.
    ///
    /// # Errors
    ///
    /// Returns [`OciError::Unsupported`] for podman, or the runtime failure.
    pub fn networks_by_label(&self, label: &str) -> Result<Vec<String>, OciError> {
        self.require_docker("network listing")?;
        let filter = format!("--filter=label={label}");
        let result = self.run(&["network", "ls", &filter, "--format", "{{.Name}}"])?;
        Ok(result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Removes every network created by this tool, collecting failures.
    #[must_use]
    pub fn delete_all_networks(&self) -> Vec<OciError> {
        let label = format!("{CREATED_BY_LABEL_KEY}=true");
        match self.networks_by_label(&label) {
            Ok(names) => names
                .iter()
                .filter_map(|name| self.remove_network(name).err())
                .collect(),
            Err(err) => vec![err],
        }
    }

    /// Address a container can use to reach the host.
    ///
    /// On Linux this is the network gateway (docker) or the container's
    /// gateway (podman). Elsewhere the runtime VM publishes a DNS name that
    /// is resolved inside the container.
    ///
    /// # Errors
    ///
    /// Returns [`OciError`] when the address cannot be discovered.
    pub fn routable_host_ip(
        &self,
        network: &str,
        container: &str,
        platform: HostPlatform,
    ) -> Result<IpAddr, OciError> {
        match (self.binary, platform) {
            (OciBinary::Docker, HostPlatform::Linux) => {
                let info = self.inspect_network(network)?;
                info.gateway.map(IpAddr::V4).ok_or_else(|| {
                    OciError::parse("network gateway", format!("{network} has no gateway"))
                })
            }
            (OciBinary::Docker, _) => self.dig_dns(container, "host.docker.internal"),
            (OciBinary::Podman, HostPlatform::Linux) => self.podman_gateway(container),
            (OciBinary::Podman, _) => self.dig_dns(container, "host.containers.internal"),
        }
    }

    fn dig_dns(&self, container: &str, name: &str) -> Result<IpAddr, OciError> {
        let result = self.run(&["exec", "-t", container, "dig", "+short", name])?;
        let address = parse_ip("host ip", &result.stdout)?;
        info!(%address, "resolved host address inside container");
        Ok(address)
    }

    fn podman_gateway(&self, container: &str) -> Result<IpAddr, OciError> {
        let result = self.run(&[
            "container",
            "inspect",
            "--format",
            "{{.NetworkSettings.Gateway}}",
            container,
        ])?;
        parse_ip("container gateway", &result.stdout)
    }
}

fn parse_ip(resource: &str, raw: &str) -> Result<IpAddr, OciError> {
    let text = raw.trim();
    IpAddr::from_str(text).map_err(|err| OciError::parse(resource, format!("{text:?}: {err}")))
}

fn parse_network_info(raw: &str) -> Result<NetworkInfo, OciError> {
    let line = raw.trim().trim_matches('\'');
    let (subnet_text, gateway_text) = line.split_once(',').unwrap_or((line, ""));
    let subnet = Subnet::from_str(subnet_text)?;
    let gateway = match gateway_text.trim() {
        "" => None,
        text => Some(Ipv4Addr::from_str(text).map_err(|err| {
            OciError::parse("network gateway", format!("{text:?}: {err}"))
        })?),
    };
    Ok(NetworkInfo { subnet, gateway })
}

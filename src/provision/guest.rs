//! Provisioner that configures guests over the driver's command channel.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use rayon::prelude::*;
use shell_escape::unix::escape;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::host::Host;
use crate::sysinit::{GuestFile, InitManager, InitSystem, write_guest_file};

use super::{
    DockerCliVersion, EngineVersioner, ProvisionError, Provisioner, parse_os_release,
    render_engine_unit,
};

/// Init-system name of the container engine.
pub const ENGINE_SERVICE: &str = "docker";

/// Guest path of the engine unit.
pub const ENGINE_UNIT_PATH: &str = "/lib/systemd/system/docker.service";

const ENGINE_BINARY: &str = "/usr/bin/dockerd";

/// Directories every guest needs before components are installed.
pub const REQUIRED_GUEST_DIRS: [&str; 4] = [
    "/etc/kubernetes/addons",
    "/etc/kubernetes/manifests",
    "/var/lib/minihost/certs",
    "/var/lib/minihost/binaries",
];

/// Provisions guests with shell commands run through the driver.
#[derive(Clone, Debug, Default)]
pub struct GuestProvisioner<V: EngineVersioner = DockerCliVersion> {
    versioner: V,
}

impl GuestProvisioner {
    /// Provisioner that probes the engine through the guest `docker` CLI.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_versioner(DockerCliVersion)
    }
}

impl<V: EngineVersioner> GuestProvisioner<V> {
    /// Provisioner using `versioner` to report the engine version.
    #[must_use]
    pub const fn with_versioner(versioner: V) -> Self {
        Self { versioner }
    }
}

fn read_local(path: &Utf8Path) -> Result<Vec<u8>, ProvisionError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let missing = || ProvisionError::MissingCertificate {
        path: path.to_string(),
    };
    let file_name = path.file_name().ok_or_else(missing)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(missing()),
        Err(err) => {
            return Err(ProvisionError::Io {
                path: parent.to_string(),
                message: err.to_string(),
            });
        }
    };
    dir.read(file_name).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            missing()
        } else {
            ProvisionError::Io {
                path: path.to_string(),
                message: err.to_string(),
            }
        }
    })
}

fn set_hostname<D: Driver + ?Sized>(driver: &D, name: &str) -> Result<(), ProvisionError> {
    let escaped = escape(name.into());
    driver.run_cmd(&format!(
        "sudo hostname {escaped} && echo {escaped} | sudo tee /etc/hostname >/dev/null"
    ))?;
    Ok(())
}

impl<V: EngineVersioner> Provisioner for GuestProvisioner<V> {
    fn provision<D: Driver + Sync + ?Sized>(
        &self,
        driver: &D,
        host: &Host,
    ) -> Result<(), ProvisionError> {
        if host.options.swarm.is_swarm {
            return Err(ProvisionError::SwarmUnsupported {
                machine: host.name.clone(),
            });
        }

        let release = parse_os_release(&driver.run_cmd("cat /etc/os-release")?.stdout)?;
        let init = InitManager::detect(driver)?;
        info!(
            machine = %host.name,
            distribution = %release.id,
            init = init.name(),
            "provisioning guest"
        );

        set_hostname(driver, &host.name)?;

        let unit = render_engine_unit(&host.driver_name, &host.options.engine, &host.options.auth);
        write_guest_file(driver, &GuestFile::new(ENGINE_UNIT_PATH, unit, "0644"))?;
        for file in init.generate_init_shim(ENGINE_SERVICE, ENGINE_BINARY, ENGINE_UNIT_PATH) {
            write_guest_file(driver, &file)?;
        }

        init.enable(ENGINE_SERVICE)?;
        init.restart(ENGINE_SERVICE)?;

        match self.versioner.engine_version(driver) {
            Ok(version) => info!(machine = %host.name, %version, "container engine ready"),
            Err(err) => warn!(machine = %host.name, error = %err, "unable to query engine version"),
        }
        Ok(())
    }

    fn post_start_setup<D: Driver + Sync + ?Sized>(
        &self,
        driver: &D,
        host: &Host,
    ) -> Result<(), ProvisionError> {
        debug!(machine = %host.name, "creating required guest directories");
        driver.run_cmd(&format!("sudo mkdir -p {}", REQUIRED_GUEST_DIRS.join(" ")))?;
        if driver.is_container_based() {
            driver.run_cmd("sudo mount --make-shared /")?;
        }
        Ok(())
    }

    fn configure_auth<D: Driver + Sync + ?Sized>(
        &self,
        driver: &D,
        host: &Host,
    ) -> Result<(), ProvisionError> {
        let auth = &host.options.auth;
        let remote = auth.remote_cert_dir.trim_end_matches('/');
        let material = [
            (&auth.ca_cert_path, "ca.pem", "0644"),
            (&auth.server_cert_path, "server.pem", "0644"),
            (&auth.server_key_path, "server-key.pem", "0600"),
        ];
        let files = material
            .iter()
            .map(|(local, name, mode)| {
                read_local(local).map(|contents| {
                    GuestFile::new(format!("{remote}/{name}"), contents, *mode)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        files
            .par_iter()
            .try_for_each(|file| write_guest_file(driver, file))?;
        info!(machine = %host.name, files = files.len(), "installed TLS material");

        if driver.is_managed() {
            InitManager::detect(driver)?.restart(ENGINE_SERVICE)?;
        }
        Ok(())
    }
}

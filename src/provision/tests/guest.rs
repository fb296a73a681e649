//! Tests for [`GuestProvisioner`] against an in-memory guest.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::driver::{Driver, DriverError};
use crate::host::Host;
use crate::provision::{
    EngineVersioner, GuestProvisioner, ProvisionError, Provisioner, REQUIRED_GUEST_DIRS,
};
use crate::sysinit::SysInitError;
use crate::test_support::FakeDriver;

const OS_RELEASE: &str = "NAME=Buildroot\nID=buildroot\nVERSION_ID=2023.02.9\n";

#[derive(Clone, Copy, Debug)]
struct FixedVersion;

impl EngineVersioner for FixedVersion {
    fn engine_version<D: Driver + ?Sized>(&self, _driver: &D) -> Result<String, DriverError> {
        Ok(String::from("24.0.7"))
    }
}

struct Home {
    _dir: TempDir,
    path: Utf8PathBuf,
}

#[fixture]
fn home() -> Home {
    let dir = TempDir::new().expect("temp dir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
    Home { _dir: dir, path }
}

fn write_tls_material(home: &Utf8Path) {
    fs::create_dir_all(home.join("certs")).expect("certs dir");
    fs::create_dir_all(home.join("machines")).expect("machines dir");
    fs::write(home.join("certs/ca.pem"), "CA").expect("ca");
    fs::write(home.join("machines/server.pem"), "CERT").expect("cert");
    fs::write(home.join("machines/server-key.pem"), "KEY").expect("key");
}

fn host_for(driver: &FakeDriver, home: &Utf8Path) -> Host {
    Host::new(driver.config(), home)
}

#[rstest]
fn provision_installs_and_restarts_the_engine_on_systemd(home: Home) {
    let driver = FakeDriver::vm("minihost").with_state(crate::state::State::Running);
    driver.reply("cat /etc/os-release", OS_RELEASE);
    let mut host = host_for(&driver, &home.path);
    host.options.engine.env = vec![String::from("HTTP_PROXY=http://proxy:3128")];
    let provisioner = GuestProvisioner::with_versioner(FixedVersion);

    provisioner
        .provision(&driver, &host)
        .expect("provisioning should succeed");

    let commands = driver.guest_commands();
    assert_eq!(commands.len(), 7);
    assert_eq!(commands.first().map(String::as_str), Some("cat /etc/os-release"));
    assert_eq!(commands.get(1).map(String::as_str), Some("systemctl --version"));
    assert_eq!(
        commands.get(2).map(String::as_str),
        Some("sudo hostname minihost && echo minihost | sudo tee /etc/hostname >/dev/null")
    );
    let install = commands.get(3).expect("unit install command");
    assert!(install.starts_with("sudo mkdir -p /lib/systemd/system && printf %s "));
    assert!(install.ends_with("sudo chmod 0644 /lib/systemd/system/docker.service"));
    assert_eq!(
        commands.get(4..),
        Some(
            &[
                String::from("sudo systemctl enable docker"),
                String::from("sudo systemctl daemon-reload"),
                String::from("sudo systemctl restart docker"),
            ][..]
        )
    );
}

#[rstest]
fn provision_installs_the_restart_shim_on_openrc(home: Home) {
    let driver = FakeDriver::vm("minihost").with_state(crate::state::State::Running);
    driver.reply("cat /etc/os-release", OS_RELEASE);
    driver.fail("systemctl --version", "systemctl: not found");
    let host = host_for(&driver, &home.path);

    GuestProvisioner::with_versioner(FixedVersion)
        .provision(&driver, &host)
        .expect("provisioning should succeed");

    let commands = driver.guest_commands();
    assert!(commands.contains(&String::from("openrc --version")));
    assert!(
        commands
            .iter()
            .any(|cmd| cmd.ends_with("sudo chmod 0755 /etc/init.d/docker"))
    );
    assert!(
        commands.iter().any(|cmd| cmd
            .ends_with("sudo chmod 0755 /var/lib/minihost/openrc-restart-wrapper.sh"))
    );
    assert_eq!(
        commands.last().map(String::as_str),
        Some("sudo service docker restart")
    );
}

#[rstest]
fn provision_rejects_swarm_hosts(home: Home) {
    let driver = FakeDriver::vm("minihost");
    let mut host = host_for(&driver, &home.path);
    host.options.swarm.is_swarm = true;

    let err = GuestProvisioner::new()
        .provision(&driver, &host)
        .expect_err("swarm should be rejected");

    assert_eq!(
        err,
        ProvisionError::SwarmUnsupported {
            machine: String::from("minihost"),
        }
    );
    assert!(driver.guest_commands().is_empty());
}

#[rstest]
fn provision_reports_an_undetected_init_system(home: Home) {
    let driver = FakeDriver::vm("minihost");
    driver.reply("cat /etc/os-release", OS_RELEASE);
    driver.fail("systemctl --version", "not found");
    driver.fail("openrc --version", "not found");
    let host = host_for(&driver, &home.path);

    let err = GuestProvisioner::new()
        .provision(&driver, &host)
        .expect_err("detection should fail");

    assert_eq!(
        err,
        ProvisionError::InitSystem(SysInitError::Undetected {
            machine: String::from("minihost"),
        })
    );
    assert!(!err.is_transient());
}

#[rstest]
fn version_probe_failure_does_not_fail_provisioning(home: Home) {
    let driver = FakeDriver::vm("minihost");
    driver.reply("cat /etc/os-release", OS_RELEASE);
    driver.fail("docker version", "Cannot connect to the Docker daemon");
    let host = host_for(&driver, &home.path);

    GuestProvisioner::new()
        .provision(&driver, &host)
        .expect("version probe failures only warn");

    assert_eq!(
        driver.guest_commands().last().map(String::as_str),
        Some("docker version --format {{.Server.Version}}")
    );
}

#[rstest]
#[case::vm(FakeDriver::vm("minihost"), 1)]
#[case::container(FakeDriver::container("minihost"), 2)]
fn post_start_setup_creates_guest_directories(
    home: Home,
    #[case] driver: FakeDriver,
    #[case] expected_commands: usize,
) {
    let host = host_for(&driver, &home.path);

    GuestProvisioner::new()
        .post_start_setup(&driver, &host)
        .expect("post-start setup should succeed");

    let commands = driver.guest_commands();
    assert_eq!(commands.len(), expected_commands);
    assert_eq!(
        commands.first(),
        Some(&format!("sudo mkdir -p {}", REQUIRED_GUEST_DIRS.join(" ")))
    );
    if driver.is_container_based() {
        assert_eq!(
            commands.get(1).map(String::as_str),
            Some("sudo mount --make-shared /")
        );
    }
}

#[rstest]
fn configure_auth_installs_tls_material_and_restarts_engine(home: Home) {
    write_tls_material(&home.path);
    let driver = FakeDriver::vm("minihost");
    let host = host_for(&driver, &home.path);

    GuestProvisioner::new()
        .configure_auth(&driver, &host)
        .expect("auth should be configured");

    let commands = driver.guest_commands();
    let installs: Vec<&String> = commands
        .iter()
        .filter(|cmd| cmd.starts_with("sudo mkdir -p /etc/docker"))
        .collect();
    assert_eq!(installs.len(), 3);
    for (file, mode) in [
        ("ca.pem", "0644"),
        ("server.pem", "0644"),
        ("server-key.pem", "0600"),
    ] {
        let suffix = format!("sudo chmod {mode} /etc/docker/{file}");
        assert!(
            installs.iter().any(|cmd| cmd.ends_with(&suffix)),
            "missing install for {file}"
        );
    }
    assert_eq!(
        commands.last().map(String::as_str),
        Some("sudo systemctl restart docker")
    );
}

#[rstest]
fn configure_auth_skips_engine_restart_on_unmanaged_hosts(home: Home) {
    write_tls_material(&home.path);
    let driver = FakeDriver::bare("minihost");
    let host = host_for(&driver, &home.path);

    GuestProvisioner::new()
        .configure_auth(&driver, &host)
        .expect("auth should be configured");

    let commands = driver.guest_commands();
    assert_eq!(commands.len(), 3);
    assert!(!commands.iter().any(|cmd| cmd.contains("systemctl")));
}

#[rstest]
fn configure_auth_reports_missing_material(home: Home) {
    let driver = FakeDriver::vm("minihost");
    let host = host_for(&driver, &home.path);

    let err = GuestProvisioner::new()
        .configure_auth(&driver, &host)
        .expect_err("missing certificates should fail");

    assert_eq!(
        err,
        ProvisionError::MissingCertificate {
            path: home.path.join("certs/ca.pem").to_string(),
        }
    );
    assert!(!err.is_transient());
    assert!(driver.guest_commands().is_empty());
}

#[rstest]
fn guest_failures_during_auth_are_transient(home: Home) {
    write_tls_material(&home.path);
    let driver = FakeDriver::vm("minihost");
    driver.fail("sudo mkdir -p /etc/docker", "ssh: connection reset");
    let host = host_for(&driver, &home.path);

    let err = GuestProvisioner::new()
        .configure_auth(&driver, &host)
        .expect_err("copy should fail");

    assert!(matches!(err, ProvisionError::Guest(DriverError::GuestCommand { .. })));
    assert!(err.is_transient());
}

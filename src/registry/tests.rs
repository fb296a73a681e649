//! Unit tests for the driver registry.

use rstest::rstest;

use super::*;
use crate::driver::{BaseSettings, DriverError, VirtualBoxSettings};
use crate::state::State;
use crate::test_support::ScriptedRunner;

fn registry(platform: HostPlatform) -> DriverRegistry<ScriptedRunner> {
    DriverRegistry::for_platform(ScriptedRunner::new(), SshConfig::builtin(), platform)
}

fn base() -> BaseSettings {
    BaseSettings::new("minihost", "/home/dev/.minihost/machines/minihost")
}

#[rstest]
#[case(HostPlatform::Linux, vec!["docker", "podman", "virtualbox", "none"])]
#[case(HostPlatform::MacOs, vec!["docker", "virtualbox"])]
#[case(HostPlatform::Windows, vec!["docker", "virtualbox"])]
fn availability_depends_on_platform(
    #[case] platform: HostPlatform,
    #[case] expected: Vec<&'static str>,
) {
    assert_eq!(registry(platform).supported(), expected);
}

#[rstest]
fn unknown_driver_is_unsupported() {
    assert!(!registry(HostPlatform::Linux).is_supported("hyperkit"));
}

#[rstest]
fn unavailable_driver_becomes_not_supported_placeholder() {
    let config = DriverConfig::None(base());

    let driver = registry(HostPlatform::MacOs).build(&config);

    assert!(matches!(driver, MachineDriver::NotSupported(_)));
    assert_eq!(driver.config(), config);
    assert_eq!(
        driver.get_state(),
        Err(DriverError::NotSupported {
            driver: String::from("none")
        })
    );
}

#[rstest]
#[case(DriverConfig::Docker(OciSettings::new(base(), "kicbase")), "docker")]
#[case(DriverConfig::Podman(OciSettings::new(base(), "kicbase")), "podman")]
#[case(DriverConfig::VirtualBox(VirtualBoxSettings::new(base(), "/tmp/boot.iso")), "virtualbox")]
#[case(DriverConfig::None(base()), "none")]
fn linux_builds_every_driver(#[case] config: DriverConfig, #[case] expected: &str) {
    let driver = registry(HostPlatform::Linux).build(&config);

    assert!(!matches!(driver, MachineDriver::NotSupported(_)));
    assert_eq!(driver.driver_name(), expected);
    assert_eq!(driver.machine_name(), "minihost");
}

#[rstest]
fn built_none_driver_reports_running() {
    let driver = registry(HostPlatform::Linux).build(&DriverConfig::None(base()));

    assert_eq!(driver.get_state(), Ok(State::Running));
}

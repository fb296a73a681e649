//! systemd unit for the guest container engine.

use crate::driver::ENGINE_PORT;
use crate::host::{AuthOptions, EngineOptions};

/// Renders the engine's systemd unit.
///
/// The unit carries a single `ExecStart=` line because the OpenRC shim
/// extracts and runs it verbatim.
#[must_use]
pub fn render_engine_unit(driver_name: &str, engine: &EngineOptions, auth: &AuthOptions) -> String {
    let remote = auth.remote_cert_dir.trim_end_matches('/');
    let mut flags = vec![
        String::from("/usr/bin/dockerd"),
        format!("-H tcp://0.0.0.0:{ENGINE_PORT}"),
        String::from("-H unix:///var/run/docker.sock"),
        String::from("--default-ulimit=nofile=1048576:1048576"),
        String::from("--tlsverify"),
        format!("--tlscacert {remote}/ca.pem"),
        format!("--tlscert {remote}/server.pem"),
        format!("--tlskey {remote}/server-key.pem"),
        format!("--label provider={driver_name}"),
    ];
    flags.extend(engine.labels.iter().map(|label| format!("--label {label}")));
    flags.extend(
        engine
            .insecure_registries
            .iter()
            .map(|registry| format!("--insecure-registry {registry}")),
    );
    flags.extend(
        engine
            .registry_mirrors
            .iter()
            .map(|mirror| format!("--registry-mirror {mirror}")),
    );
    flags.extend(
        engine
            .storage_driver
            .iter()
            .map(|storage| format!("--storage-driver {storage}")),
    );
    let exec_start = flags.join(" ");

    let environment: String = engine
        .env
        .iter()
        .map(|entry| format!("Environment=\"{}\"\n", entry.replace('"', "\\\"")))
        .collect();

    format!(
        "[Unit]
Description=Docker Application Container Engine
Documentation=https://docs.docker.com
After=network.target docker.socket
Requires=docker.socket

[Service]
Type=notify
Restart=on-failure
StartLimitBurst=3
StartLimitIntervalSec=60
{environment}ExecStart={exec_start}
ExecReload=/bin/kill -s HUP $MAINPID
LimitNOFILE=infinity
LimitNPROC=infinity
LimitCORE=infinity
TasksMax=infinity
TimeoutStartSec=0
Delegate=yes
KillMode=process

[Install]
WantedBy=multi-user.target
"
    )
}

//! `/etc/os-release` parsing.

use super::ProvisionError;

/// Distribution identification read from the guest.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OsRelease {
    /// Lower-case distribution identifier, such as `buildroot`.
    pub id: String,
    /// Distribution version, if reported.
    pub version_id: Option<String>,
    /// Human-readable name, if reported.
    pub pretty_name: Option<String>,
}

/// Parses `KEY=value` lines from `/etc/os-release`.
///
/// # Errors
///
/// Returns [`ProvisionError::OsRelease`] when no `ID` is present.
pub fn parse_os_release(contents: &str) -> Result<OsRelease, ProvisionError> {
    let mut release = OsRelease::default();
    for line in contents.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let value = raw.trim().trim_matches('"').trim_matches('\'').to_owned();
        match key.trim() {
            "ID" => release.id = value,
            "VERSION_ID" => release.version_id = Some(value),
            "PRETTY_NAME" => release.pretty_name = Some(value),
            _ => {}
        }
    }
    if release.id.is_empty() {
        return Err(ProvisionError::OsRelease {
            message: String::from("no ID field"),
        });
    }
    Ok(release)
}

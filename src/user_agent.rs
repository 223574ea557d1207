//! User-Agent sent with every fetch.

/// Default User-Agent: crate name and version, plus the repository URL when
/// the package declares one.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    let repository = env!("CARGO_PKG_REPOSITORY");
    if repository.is_empty() {
        format!("{name}/{version}")
    } else {
        format!("{name}/{version} (+{repository})")
    }
}

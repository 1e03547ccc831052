//! Remote URL handling

use url::Url;

/// Strip credentials from a remote URL before it is logged
///
/// URLs that do not parse (scp-style `git@host:path`, local paths) are
/// returned unchanged; they cannot carry a password.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            // Both setters only fail for URLs that cannot have credentials.
            let _ = url.set_password(None);
            let _ = url.set_username("***");
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

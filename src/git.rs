//! Resolving a git branch to a commit without a full clone, and the clone-at-commit helper
//! used by the executor to materialise a module checkout.
//!
//! The ref resolution speaks the git smart-HTTP protocol directly (`info/refs?service=git-upload-pack`)
//! rather than shelling out to `git ls-remote`; the module checkout itself, however, is a thin
//! wrapper around the `git` CLI, since reimplementing clone/checkout from scratch is out of scope.

use crate::error::GitError;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Formats a branch or tag name into a full ref path, matching git's own conventions.
pub fn ref_name(branch: Option<&str>, tag: Option<&str>) -> Option<String> {
    if let Some(branch) = branch {
        return Some(format!("refs/heads/{branch}"));
    }
    if let Some(tag) = tag {
        return Some(format!("refs/tags/{tag}"));
    }
    None
}

/// Queries `url` for its ref advertisement and returns the commit SHA that `wanted_ref` points
/// at, e.g. `refs/heads/main`.
pub async fn resolve_ref(
    client: &reqwest::Client,
    url: &str,
    wanted_ref: &str,
    credentials: Option<&Credentials>,
) -> Result<String, GitError> {
    let advertisement_url = format!("{}/info/refs?service=git-upload-pack", url.trim_end_matches('/'));

    let mut request = client
        .get(&advertisement_url)
        .header("User-Agent", "tf-controller/1.0");

    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }

    let response = request.send().await.map_err(|e| GitError::RefQuery {
        url: url.to_string(),
        source: std::io::Error::other(e),
    })?;

    let body = response.text().await.map_err(|e| GitError::RefQuery {
        url: url.to_string(),
        source: std::io::Error::other(e),
    })?;

    match parse_ref_advertisement(&body, wanted_ref) {
        RefLookup::Found(sha) => Ok(sha),
        RefLookup::NotFound => Err(GitError::BranchNotFound {
            url: url.to_string(),
            branch: wanted_ref.to_string(),
        }),
        RefLookup::Malformed => Err(GitError::MalformedAdvertisement(url.to_string())),
    }
}

enum RefLookup {
    Found(String),
    NotFound,
    Malformed,
}

/// Parses a pkt-line ref advertisement body and finds the commit SHA for `wanted_ref`.
///
/// The wire format is a sequence of `pkt-line`s, each a 4-hex-digit length prefix followed by
/// that many bytes of payload; each payload (after the first, which carries service/capability
/// framing) is `"<sha> <ref-name>\n"`. We don't need a full pkt-line reader here -- scanning
/// line-by-line for `"<sha> <ref>"` pairs is sufficient and matches what `git ls-remote` itself
/// prints. A body with no valid `<sha> <ref>` line at all is treated as malformed rather than as
/// "ref absent", since a legitimate advertisement always carries at least one ref line.
fn parse_ref_advertisement(body: &str, wanted_ref: &str) -> RefLookup {
    let mut saw_valid_line = false;

    for line in body.lines() {
        // Strip the 4-hex-digit pkt-line length prefix if present.
        let line = if line.len() > 4 && line[..4].bytes().all(|b| b.is_ascii_hexdigit()) {
            &line[4..]
        } else {
            line
        };

        let line = line.trim_start_matches('#').trim();
        let mut parts = line.splitn(2, ' ');
        let Some(sha) = parts.next() else { continue };
        let Some(rest) = parts.next() else { continue };

        // Strip NUL-separated capability list on the first advertised ref.
        let rest = rest.split('\0').next().unwrap_or(rest).trim();

        if !(sha.len() == 40 && sha.bytes().all(|b| b.is_ascii_hexdigit())) {
            continue;
        }
        saw_valid_line = true;

        if rest == wanted_ref {
            return RefLookup::Found(sha.to_string());
        }
    }

    if saw_valid_line {
        RefLookup::NotFound
    } else {
        RefLookup::Malformed
    }
}

/// Clones `url` at `commit` into `destination`, shelling out to the `git` CLI. This is the
/// explicitly out-of-scope "simple clone-at-commit helper": it is not a from-scratch transport
/// implementation, only a thin process wrapper.
pub async fn clone_at_commit(
    url: &str,
    commit: &str,
    destination: &std::path::Path,
) -> std::io::Result<()> {
    let status = tokio::process::Command::new("git")
        .args(["clone", "--no-checkout", url])
        .arg(destination)
        .status()
        .await?;

    if !status.success() {
        return Err(std::io::Error::other(format!(
            "git clone {url} failed with {status}"
        )));
    }

    let status = tokio::process::Command::new("git")
        .args(["checkout", commit])
        .current_dir(destination)
        .status()
        .await?;

    if !status.success() {
        return Err(std::io::Error::other(format!(
            "git checkout {commit} failed with {status}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_name_prefers_branch() {
        // Given / When
        let branch_ref = ref_name(Some("main"), Some("v1.0.0"));
        let tag_ref = ref_name(None, Some("v1.0.0"));
        let none_ref = ref_name(None, None);

        // Then
        assert_eq!(branch_ref.as_deref(), Some("refs/heads/main"));
        assert_eq!(tag_ref.as_deref(), Some("refs/tags/v1.0.0"));
        assert_eq!(none_ref, None);
    }

    #[test]
    fn test_parse_ref_advertisement_finds_branch() {
        // Given
        let body = "001e# service=git-upload-pack\n0000\
                     0063b6fc4c620b67d95f953a5c1c1230aaab5429ad6 HEAD\0multi_ack thin-pack\n\
                     003fb6fc4c620b67d95f953a5c1c1230aaab5429ad6 refs/heads/main\n\
                     003faf532e6b5e8c20c0dce0b5d3d82f2e5c4e8c8b9 refs/heads/develop\n";

        // When
        let resolved = parse_ref_advertisement(body, "refs/heads/main");

        // Then
        assert!(matches!(
            resolved,
            RefLookup::Found(sha) if sha == "b6fc4c620b67d95f953a5c1c1230aaab5429ad6"
        ));
    }

    #[test]
    fn test_parse_ref_advertisement_missing_branch() {
        // Given
        let body = "003fb6fc4c620b67d95f953a5c1c1230aaab5429ad6 refs/heads/main\n";

        // When
        let resolved = parse_ref_advertisement(body, "refs/heads/missing");

        // Then
        assert!(matches!(resolved, RefLookup::NotFound));
    }

    #[test]
    fn test_parse_ref_advertisement_no_valid_lines_is_malformed() {
        // Given
        let body = "not a pkt-line advertisement at all\n";

        // When
        let resolved = parse_ref_advertisement(body, "refs/heads/main");

        // Then
        assert!(matches!(resolved, RefLookup::Malformed));
    }
}

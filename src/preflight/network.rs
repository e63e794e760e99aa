//! Network connectivity check for asset hosts.

use std::collections::BTreeSet;
use std::time::Duration;

use super::CheckResult;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Origins (`scheme://host[:port]`) of `urls`, deduplicated and sorted.
pub fn origins(urls: &[String]) -> Vec<String> {
    urls.iter()
        .filter_map(|url| reqwest::Url::parse(url).ok())
        .filter(|url| url.has_host())
        .map(|url| url.origin().ascii_serialization())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Check that every asset host answers a HEAD request.
pub async fn check_network(urls: &[String]) -> Vec<CheckResult> {
    let client = match reqwest::Client::builder().timeout(TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            return vec![CheckResult::fail(
                "Network",
                format!("Failed to create HTTP client: {}", e),
                "Check the TLS setup of this machine",
            )]
        }
    };

    let mut results = Vec::new();
    for origin in origins(urls) {
        // Any answer proves the host is reachable; status codes do not matter here.
        let result = client.head(format!("{}/", origin)).send().await;
        let name = format!("Network ({})", origin);
        results.push(match result {
            Ok(_) => CheckResult::pass(name, "Reachable"),
            Err(e) => CheckResult::fail(
                name,
                format!("Unreachable: {}", e),
                "Check your internet connection, or pre-download assets and set MOZMILL_ENV_<ASSET>_PATH",
            ),
        });
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origins_are_deduplicated() {
        let urls = vec![
            "https://codeload.github.com/pypa/virtualenv/zip/1.10.1".to_string(),
            "http://downloads.sourceforge.net/project/sevenzip/7-Zip/9.20/7za920.zip".to_string(),
            "https://codeload.github.com/other".to_string(),
            "not a url".to_string(),
        ];
        assert_eq!(
            origins(&urls),
            ["http://downloads.sourceforge.net", "https://codeload.github.com"]
        );
    }

    #[tokio::test]
    async fn test_no_urls_no_checks() {
        assert!(check_network(&[]).await.is_empty());
    }
}

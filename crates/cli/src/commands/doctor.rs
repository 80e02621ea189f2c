//! `quarry doctor`: diagnose setup problems.

use quarry_config::AppConfig;
use std::path::Path;
use std::time::Duration;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("Quarry doctor");
    println!("=============\n");

    let mut issues = 0;

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);
    if !path.exists() {
        println!("  ⚠️  No config file at {}, using defaults (run `quarry init`)", path.display());
        issues += 1;
    }

    let config = match AppConfig::load_with_env(&path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ✅ API key configured for '{}'", config.provider);
    } else {
        println!("  ❌ No API key: set QUARRY_API_KEY or api_key in the config");
        issues += 1;
    }

    let artifacts = config.capabilities.artifacts_path();
    if artifacts.is_dir() {
        println!("  ✅ Artifacts directory: {}", artifacts.display());
    } else {
        println!("  ⚠️  Artifacts directory missing: {} (created on first save)", artifacts.display());
    }

    if let Some(root) = &config.capabilities.documents_root
        && !Path::new(root).is_dir()
    {
        println!("  ❌ documents_root is not a directory: {root}");
        issues += 1;
    }

    let client = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::net::TcpStream::connect(search_host(&config.capabilities.search_endpoint)),
    )
    .await;
    match client {
        Ok(Ok(_)) => println!("  ✅ Search endpoint reachable"),
        _ => {
            println!(
                "  ⚠️  Search endpoint unreachable: {} (web_search will report errors)",
                config.capabilities.search_endpoint
            );
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

/// `host:port` of an http(s) URL, defaulting the port from the scheme.
fn search_host(url: &str) -> String {
    let (default_port, rest) = match url.split_once("://") {
        Some(("https", rest)) => (443, rest),
        Some((_, rest)) => (80, rest),
        None => (80, url),
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:{default_port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_host_from_url() {
        assert_eq!(search_host("http://localhost:8888/search"), "localhost:8888");
        assert_eq!(search_host("https://searx.example.org/search?q=x"), "searx.example.org:443");
        assert_eq!(search_host("http://10.0.0.2"), "10.0.0.2:80");
    }
}

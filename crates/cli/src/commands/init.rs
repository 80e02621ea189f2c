//! `quarry init`: first-time setup.

use quarry_config::AppConfig;
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::config_path);

    println!("Quarry: first-time setup");
    println!("========================\n");

    if let Some(dir) = config_path.parent()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("  Created config directory: {}", dir.display());
    }

    if config_path.exists() {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run init.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("  Created {}", config_path.display());
    println!("\n  Next steps:");
    println!("    1. Set GEMINI_API_KEY (or add api_key to the config)");
    println!("    2. Point capabilities.search_endpoint at a SearxNG instance");
    println!("    3. Run: quarry ask \"How did Samsung's revenue change from 2022 to 2023?\"\n");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_loadable_default_config_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        run(Some(&path)).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let config = AppConfig::from_toml(&written).unwrap();
        assert_eq!(config.engine.hard_step_cap, 12);

        std::fs::write(&path, "model = \"custom\"\n").unwrap();
        run(Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "model = \"custom\"\n");
    }
}

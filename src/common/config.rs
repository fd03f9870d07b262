//! # Configuration Utilities
//!
//! Shared configuration loading used by both the server and client binaries.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_config("config/server.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content =
        fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
    let config: T =
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        port: u16,
    }

    #[test]
    fn loads_toml_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"board\"\nport = 7070").unwrap();

        let sample: Sample = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "board".to_string(),
                port: 7070
            }
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config::<Sample>("/definitely/not/here.toml").is_err());
    }
}

use crate::config::AllocatorConfig;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;

/// Load and parse allocator configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<AllocatorConfig> {
    info!("Loading allocator configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open config file '{}'", config_path.display()))?;

    let config: AllocatorConfig = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse config file '{}'", config_path.display()))?;

    config
        .validate()
        .wrap_err_with(|| format!("Invalid prefix allocation parameters in '{}'", config_path.display()))?;

    info!(
        "Using {:?} prefix allocation with seed prefix {}",
        config.allocator, config.prefix_alloc_params.seed_prefix
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocatorKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let yaml = r#"
allocator: deterministic
prefix_alloc_params:
  seed_prefix: "face:b00c::/56"
  alloc_prefix_len: 64
zone_headroom: 3
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.allocator, AllocatorKind::Deterministic);
        assert_eq!(config.zone_headroom, 3);
    }

    #[test]
    fn test_load_config_rejects_bad_params() {
        let yaml = r#"
prefix_alloc_params:
  seed_prefix: "face:b00c::/56"
  alloc_prefix_len: 48
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let err = load_config(temp_file.path()).unwrap_err();
        assert!(format!("{:?}", err).contains("allocation prefix length"));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config(Path::new("/nonexistent/allocator.yaml")).is_err());
    }
}

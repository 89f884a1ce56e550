//! Integration tests for config

#[cfg(test)]
mod tests {
    use smelt_config::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to ensure env var tests don't run concurrently
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[stage]
root = "/var/smelt/stage"
use_tmp = false
tmp_dirs = ["/scratch/%u/smelt"]

[[mirrors]]
name = "local"
url = "https://mirror.example.com/sources"

[[mirrors]]
name = "backup"
url = "https://backup.example.com/sources/"
        "#
        )
        .unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.stage.root, PathBuf::from("/var/smelt/stage"));
        assert!(!config.stage.use_tmp);
        assert_eq!(config.stage.tmp_dirs, vec!["/scratch/%u/smelt"]);

        // Mirror order must survive loading; fallback ordering depends on it.
        assert_eq!(
            config.mirror_urls(),
            vec![
                "https://mirror.example.com/sources",
                "https://backup.example.com/sources/"
            ]
        );
    }

    #[tokio::test]
    async fn test_defaults_when_sections_missing() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "").unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert!(config.stage.use_tmp);
        assert!(!config.stage.tmp_dirs.is_empty());
        assert!(config.mirrors.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_mirror_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[[mirrors]]
name = "broken"
url = ""
        "#
        )
        .unwrap();

        assert!(Config::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_merge_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();

        std::env::remove_var("SMELT_STAGE_ROOT");
        std::env::remove_var("SMELT_USE_TMP");

        std::env::set_var("SMELT_STAGE_ROOT", "/opt/smelt/stage");
        std::env::set_var("SMELT_USE_TMP", "false");

        let mut config = Config::default();
        config.merge_env().unwrap();

        assert_eq!(config.stage.root, PathBuf::from("/opt/smelt/stage"));
        assert!(!config.stage.use_tmp);

        std::env::remove_var("SMELT_STAGE_ROOT");
        std::env::remove_var("SMELT_USE_TMP");
    }

    #[test]
    fn test_invalid_env_value() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();

        std::env::remove_var("SMELT_USE_TMP");
        std::env::set_var("SMELT_USE_TMP", "maybe");

        let mut config = Config::default();
        assert!(config.merge_env().is_err());

        std::env::remove_var("SMELT_USE_TMP");
    }
}

//! 配置路径管理
//!
//! 解析配置文件位置并加载用户配置
//!
//! 查找顺序:
//! - 命令行 `--config <PATH>`
//! - 环境变量 `PROCTREE_CONFIG`
//! - `~/.proctree/config.json`

use crate::config::{CONFIG_DIRECTORY, CONFIG_ENV, CONFIG_FILE_NAME};
use crate::core::process_tree::BuildPolicy;
use crate::error::{
    errors::{config_error, config_error_with_source, io_error},
    ProcessTreeResult,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 用户配置（从 config.json 读取）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// 记录校验失败时中止还是跳过
    pub build_policy: BuildPolicy,
    /// 构建前按创建时间排序输入
    pub sort_input: bool,
    /// 日志级别（EnvFilter 语法）
    pub log_level: Option<String>,
    /// 额外写入的日志文件
    pub log_file: Option<PathBuf>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            build_policy: BuildPolicy::Abort,
            sort_input: true,
            log_level: None,
            log_file: None,
        }
    }
}

impl UserConfig {
    /// 从配置文件加载；文件不存在时返回默认配置
    pub fn load(config_file: &Path) -> ProcessTreeResult<Self> {
        if !config_file.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_file).map_err(|err| {
            io_error(
                "cannot read config file",
                config_file.display().to_string(),
                err,
            )
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&content).map_err(|err| {
            config_error_with_source(
                format!("invalid config file {}", config_file.display()),
                err,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ProcessTreeResult<()> {
        if let Some(level) = &self.log_level {
            if level.trim().is_empty() {
                return Err(config_error("log_level cannot be empty"));
            }
        }
        Ok(())
    }
}

/// 配置文件路径集合
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// 持久化配置目录（~/.proctree/）
    pub config_dir: PathBuf,
    /// 主配置文件
    pub config_file: PathBuf,
}

impl ConfigPaths {
    /// 按查找顺序解析配置路径
    pub fn resolve(explicit: Option<&Path>) -> ProcessTreeResult<Self> {
        if let Some(path) = explicit {
            return Ok(Self::for_file(path.to_path_buf()));
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::for_file(PathBuf::from(path)));
        }

        let home_dir =
            dirs::home_dir().ok_or_else(|| config_error("Cannot find home directory"))?;
        let config_dir = home_dir.join(CONFIG_DIRECTORY);

        Ok(Self {
            config_file: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    fn for_file(config_file: PathBuf) -> Self {
        let config_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            config_dir,
            config_file,
        }
    }

    pub fn load(&self) -> ProcessTreeResult<UserConfig> {
        UserConfig::load(&self.config_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let config = UserConfig::load(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(config, UserConfig::default());
        assert!(config.sort_input);
        assert_eq!(config.build_policy, BuildPolicy::Abort);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"build_policy": "skip"}"#).expect("write config");

        let config = UserConfig::load(&path).expect("load");
        assert_eq!(config.build_policy, BuildPolicy::Skip);
        assert!(config.sort_input);
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"build_policy": "sometimes"}"#).expect("write config");

        let err = UserConfig::load(&path).expect_err("unknown policy");
        assert_eq!(err.category(), crate::error::ErrorCategory::Config);
    }

    #[test]
    fn blank_log_level_is_rejected() {
        let config = UserConfig {
            log_level: Some("  ".to_string()),
            ..UserConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let paths = ConfigPaths::resolve(Some(Path::new("/etc/proctree/custom.json")))
            .expect("resolve");
        assert_eq!(paths.config_file, PathBuf::from("/etc/proctree/custom.json"));
        assert_eq!(paths.config_dir, PathBuf::from("/etc/proctree"));
    }
}

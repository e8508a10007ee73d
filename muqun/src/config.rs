//! 配置管理
//!
//! [`GroupConfig`] 既可在代码中直接构造，也可从配置文件与环境变量加载。
//!
//! # 配置如何加载
//!
//! 首先，系统会尝试读取 MUQUN_CONFIG_ROOT 环境变量，有则以此作为配置文件访问路径，
//! 否则以传入的 crate 根路径下的 config 文件夹作为配置文件访问路径。然后按以下顺序加载：
//!
//! 1. 名为 default 的配置文件。
//! 2. 根据环境变量 MUQUN_ENV 命名的配置文件，若无此环境变量，则以 dev 为配置文件名。
//! 3. 读取环境变量，环境变量以 MUQUN 为前缀，并以双下划线分隔。
//!
//! 后加载的配置会覆盖先加载的配置。配置文件中的时长字段以秒为单位。

use crate::{OFFSET_NEWEST, OFFSET_OLDEST, errors::ConfigError};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::time::Duration;
use validator::Validate;

/// 无已提交偏移时的初始偏移策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialOffset {
    /// 从最旧可用偏移开始
    #[default]
    Oldest,
    /// 仅消费新到达的消息
    Newest,
}

impl InitialOffset {
    /// 策略对应的哨兵偏移
    pub fn sentinel(self) -> i64 {
        match self {
            InitialOffset::Oldest => OFFSET_OLDEST,
            InitialOffset::Newest => OFFSET_NEWEST,
        }
    }
}

/// 消费组配置
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// 初始偏移策略，偏移越界回退时同样生效
    pub initial: InitialOffset,
    /// 释放分区前等待应用处理完成的时长，同时决定认领重试预算
    pub processing_timeout: Duration,
    /// 偏移提交周期，为零则关闭周期提交
    pub commit_interval: Duration,
    /// 启动时清除消费组全部已提交偏移
    pub reset_offsets: bool,
    /// 元数据存储会话超时
    pub session_timeout: Duration,
    /// messages 与 errors 通道缓冲
    pub channel_buffer_size: usize,
    /// 客户端标识，加入消费组时以组名覆盖
    pub client_id: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            initial: InitialOffset::Oldest,
            processing_timeout: Duration::from_secs(60),
            commit_interval: Duration::from_secs(10),
            reset_offsets: false,
            session_timeout: Duration::from_secs(30),
            channel_buffer_size: 256,
            client_id: String::new(),
        }
    }
}

impl GroupConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_timeout.is_zero() {
            return Err("会话超时必须大于零".into());
        }
        if self.processing_timeout.is_zero() {
            return Err("处理超时必须大于零".into());
        }
        Ok(())
    }

    /// 从配置文件与环境变量加载
    pub fn load(crate_dir: PathBuf) -> Result<Self, ConfigError> {
        let config = build_config(crate_dir)?;
        let raw = config.try_deserialize::<RawGroupConfig>()?;
        raw.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self {
            initial: raw.initial,
            processing_timeout: Duration::from_secs(raw.processing_timeout),
            commit_interval: Duration::from_secs(raw.commit_interval as u64),
            reset_offsets: raw.reset_offsets,
            session_timeout: Duration::from_secs(raw.session_timeout),
            channel_buffer_size: raw.channel_buffer_size,
            client_id: raw.client_id,
        })
    }
}

fn build_config(crate_dir: PathBuf) -> Result<Config, ConfigError> {
    let config_root = std::env::var("MUQUN_CONFIG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| crate_dir.join("config"));
    let env = std::env::var("MUQUN_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = Config::builder()
        .add_source(File::from(config_root.join("default")).required(false))
        .add_source(File::from(config_root.join(env)).required(false))
        .add_source(
            Environment::with_prefix("MUQUN")
                .separator("__")
                .list_separator(","),
        )
        .build()?;
    Ok(config)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default)]
struct RawGroupConfig {
    initial: InitialOffset,
    #[validate(range(min = 1, message = "处理超时必须大于零"))]
    processing_timeout: u64,
    #[validate(range(min = 0, message = "提交周期不能为负"))]
    commit_interval: i64,
    reset_offsets: bool,
    #[validate(range(min = 1, message = "会话超时必须大于零"))]
    session_timeout: u64,
    channel_buffer_size: usize,
    client_id: String,
}

impl Default for RawGroupConfig {
    fn default() -> Self {
        let cfg = GroupConfig::default();
        Self {
            initial: cfg.initial,
            processing_timeout: cfg.processing_timeout.as_secs(),
            commit_interval: cfg.commit_interval.as_secs() as i64,
            reset_offsets: cfg.reset_offsets,
            session_timeout: cfg.session_timeout.as_secs(),
            channel_buffer_size: cfg.channel_buffer_size,
            client_id: cfg.client_id,
        }
    }
}

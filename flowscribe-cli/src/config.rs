use anyhow::Result;
use flowscribe_core::{DescribeFailurePolicy, FlowscribeConfig, FlowscribeError};
use std::path::PathBuf;

/// Command-line values that take precedence over files and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub skip_image: bool,
    pub output_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
    pub fail_fast: bool,
    pub concurrency: Option<usize>,
    pub verbose: bool,
}

impl CliOverrides {
    pub fn apply(&self, config: &mut FlowscribeConfig) {
        if self.skip_image {
            config.pipeline.skip_image = true;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.dir = dir.clone();
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if self.fail_fast {
            config.pipeline.describe_failure_policy = DescribeFailurePolicy::FailFast;
        }
        if let Some(n) = self.concurrency {
            config.pipeline.describe_concurrency = n;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

pub fn load_config(overrides: &CliOverrides) -> Result<FlowscribeConfig> {
    let mut config = FlowscribeConfig::load().map_err(FlowscribeError::from)?;
    overrides.apply(&mut config);
    config.validate().map_err(FlowscribeError::from)?;
    Ok(config)
}

//! Test configuration builders

use melodl::Config;
use melodl::config::RetryConfig;
use std::path::Path;
use std::time::Duration;

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Config writing under `root/out`, scratch files under `root/tmp`, millisecond retries
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.output_path = root.join("out");
    config.download.temp_dir = Some(root.join("tmp"));
    config.track_retry = fast_retry(3);
    config.stream_retry = fast_retry(3);
    config
}

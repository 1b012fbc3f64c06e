use std::env;
use std::time::Duration;

/// Business rules for the interview pipeline, read from `HF_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Minimum AI evaluation score (0-100) for the engine and `evaluate` action.
    pub ai_pass_threshold: f64,
    /// Minimum assessment score (0-100) for `submit-interview`.
    pub assessment_pass_threshold: f64,
    pub stage_delay: Duration,
    pub invitation_ttl: chrono::Duration,
    pub question_count: usize,
    pub app_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ai_pass_threshold: 60.0,
            assessment_pass_threshold: 50.0,
            stage_delay: Duration::from_millis(1000),
            invitation_ttl: chrono::Duration::hours(168),
            question_count: 5,
            app_base_url: "http://localhost:3000".into(),
        }
    }
}

pub(crate) fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse::<T>().ok())
}

pub(crate) fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(val) => matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn parse_threshold(key: &str, default: f64) -> f64 {
    parse_env::<f64>(key)
        .filter(|value| value.is_finite() && (0.0..=100.0).contains(value))
        .unwrap_or(default)
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let app_base_url = env::var("HF_APP_BASE_URL")
            .ok()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.app_base_url);

        Self {
            ai_pass_threshold: parse_threshold("HF_AI_PASS_THRESHOLD", defaults.ai_pass_threshold),
            assessment_pass_threshold: parse_threshold(
                "HF_ASSESSMENT_PASS_THRESHOLD",
                defaults.assessment_pass_threshold,
            ),
            stage_delay: parse_env::<u64>("HF_STAGE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.stage_delay),
            invitation_ttl: parse_env::<i64>("HF_INVITATION_TTL_HOURS")
                .filter(|hours| *hours > 0)
                .map(chrono::Duration::hours)
                .unwrap_or(defaults.invitation_ttl),
            question_count: parse_env::<usize>("HF_QUESTION_COUNT")
                .filter(|count| (1..=20).contains(count))
                .unwrap_or(defaults.question_count),
            app_base_url,
        }
    }

    /// Configuration for tests: no delay between stage evaluations.
    pub fn immediate() -> Self {
        Self {
            stage_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_env {
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    pub fn with_env(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
        let _guard = ENV_GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let prev: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                match value {
                    Some(v) => unsafe { std::env::set_var(key, v) },
                    None => unsafe { std::env::remove_var(key) },
                }
                (key.to_string(), previous)
            })
            .collect();

        f();

        for (key, previous) in prev {
            if let Some(v) = previous {
                unsafe { std::env::set_var(&key, v) };
            } else {
                unsafe { std::env::remove_var(&key) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_env::with_env;
    use super::*;

    #[test]
    fn pipeline_config_reads_env_overrides() {
        with_env(
            &[
                ("HF_AI_PASS_THRESHOLD", Some("70")),
                ("HF_ASSESSMENT_PASS_THRESHOLD", Some("40")),
                ("HF_STAGE_DELAY_MS", Some("250")),
                ("HF_INVITATION_TTL_HOURS", Some("24")),
                ("HF_QUESTION_COUNT", Some("8")),
                ("HF_APP_BASE_URL", Some("https://jobs.example.com/")),
            ],
            || {
                let cfg = PipelineConfig::from_env();
                assert_eq!(cfg.ai_pass_threshold, 70.0);
                assert_eq!(cfg.assessment_pass_threshold, 40.0);
                assert_eq!(cfg.stage_delay, Duration::from_millis(250));
                assert_eq!(cfg.invitation_ttl, chrono::Duration::hours(24));
                assert_eq!(cfg.question_count, 8);
                assert_eq!(cfg.app_base_url, "https://jobs.example.com");
            },
        );
    }

    #[test]
    fn out_of_range_values_fall_back_to_defaults() {
        with_env(
            &[
                ("HF_AI_PASS_THRESHOLD", Some("140")),
                ("HF_ASSESSMENT_PASS_THRESHOLD", Some("nan")),
                ("HF_STAGE_DELAY_MS", None),
                ("HF_INVITATION_TTL_HOURS", Some("-1")),
                ("HF_QUESTION_COUNT", Some("0")),
                ("HF_APP_BASE_URL", None),
            ],
            || {
                let cfg = PipelineConfig::from_env();
                assert_eq!(cfg, PipelineConfig::default());
            },
        );
    }
}

use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset, empty or unparseable.
pub const DEFAULT_DIRECTIVES: &str = "metering_service=info";

pub fn init_tracing() {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(rust_log.as_deref()))
        .with_target(false)
        .init();
}

/// `RUST_LOG` replaces the defaults wholesale rather than being merged into them.
fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_the_service_level() {
        let filter = env_filter(Some("metering_service=debug")).to_string();
        assert!(filter.contains("metering_service=debug"), "{filter}");
        assert!(!filter.contains("metering_service=info"), "{filter}");
    }

    #[test]
    fn falls_back_to_defaults_without_rust_log() {
        assert_eq!(env_filter(None).to_string(), DEFAULT_DIRECTIVES);
        assert_eq!(env_filter(Some("  ")).to_string(), DEFAULT_DIRECTIVES);
    }

    #[test]
    fn falls_back_to_defaults_on_garbage() {
        assert_eq!(env_filter(Some("metering_service=loud")).to_string(), DEFAULT_DIRECTIVES);
    }
}

//! Process-level runtime knobs read from the environment.
//!
//! `RUNTIME_VERBOSE` is a comma-separated word list enabling extra output:
//! `metric`, `logging`, `route`, `error_caller`. `APPHIVE_STACK_SIZE` sizes
//! handler coroutine stacks and accepts decimal or `0x`-prefixed hex.

use std::env;

const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Parsed `RUNTIME_VERBOSE` flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerboseFlags {
    pub metric: bool,
    pub logging: bool,
    pub route: bool,
    pub error_caller: bool,
}

impl VerboseFlags {
    pub fn from_env() -> Self {
        Self::parse(env::var("RUNTIME_VERBOSE").unwrap_or_default().as_str())
    }

    pub fn parse(value: &str) -> Self {
        let mut flags = VerboseFlags::default();
        for word in value.split(',').map(str::trim) {
            match word {
                "metric" => flags.metric = true,
                "logging" => flags.logging = true,
                "route" => flags.route = true,
                "error_caller" => flags.error_caller = true,
                "" => {}
                other => tracing::warn!(word = other, "unknown RUNTIME_VERBOSE word"),
            }
        }
        flags
    }
}

/// Runtime configuration loaded once at engine startup.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for handler coroutines in bytes.
    pub stack_size: usize,
    pub verbose: VerboseFlags,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let stack_size = match env::var("APPHIVE_STACK_SIZE") {
            Ok(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(DEFAULT_STACK_SIZE)
                } else {
                    val.parse().unwrap_or(DEFAULT_STACK_SIZE)
                }
            }
            Err(_) => DEFAULT_STACK_SIZE,
        };
        RuntimeConfig {
            stack_size,
            verbose: VerboseFlags::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbose_words() {
        let flags = VerboseFlags::parse("metric, route ,error_caller");
        assert!(flags.metric);
        assert!(flags.route);
        assert!(flags.error_caller);
        assert!(!flags.logging);
    }

    #[test]
    fn empty_means_all_off() {
        assert_eq!(VerboseFlags::parse(""), VerboseFlags::default());
    }
}

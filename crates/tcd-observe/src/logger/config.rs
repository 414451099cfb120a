use std::io::IsTerminal;

use crate::logger::format::LoggerFormat;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `info,tcd_core=debug`.
    pub level: String,
    pub with_targets: bool,
    /// Print thread names; shows which lines come from workers and which from the interactive
    /// thread.
    pub with_threads: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || std::io::stdout().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            with_threads: false,
            use_color,
        }
    }
}

impl LoggerConfig {
    pub fn with_format(mut self, format: LoggerFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_threads(mut self, enabled: bool) -> Self {
        self.with_threads = enabled;
        self
    }

    pub fn with_color(mut self, enabled: bool) -> Self {
        self.use_color = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_override_defaults() {
        let cfg = LoggerConfig::default()
            .with_format(LoggerFormat::Json)
            .with_level("debug,tcd_core=trace")
            .with_threads(true)
            .with_color(false);

        assert_eq!(cfg.format, LoggerFormat::Json);
        assert_eq!(cfg.level, "debug,tcd_core=trace");
        assert!(cfg.with_threads);
        assert!(!cfg.use_color);
        assert!(cfg.with_targets);
    }
}

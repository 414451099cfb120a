use super::ProcConfig;

impl ProcConfig {
    /// Runs `script` through the platform shell (`sh -c` / `cmd /C`).
    pub fn shell(script: impl Into<String>) -> Self {
        let script = script.into();

        #[cfg(windows)]
        let cfg = ProcConfig::new("cmd").arg("/C").arg(script);
        #[cfg(not(windows))]
        let cfg = ProcConfig::new("sh").arg("-c").arg(script);

        cfg
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn shell_wraps_script() {
        let cfg = ProcConfig::shell("echo hi");
        assert_eq!(cfg.program, "sh");
        assert_eq!(cfg.args, vec!["-c", "echo hi"]);
        assert_eq!(cfg.task_name(), "sh");
    }
}

//! `feynman config`: show what a session started here would use.

use std::path::Path;

use feynman::SessionConfig;

pub fn cmd_config(path: Option<&Path>) -> anyhow::Result<()> {
    print!("{}", effective_config(path, |var| std::env::var(var).ok())?);
    Ok(())
}

fn effective_config(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<String> {
    let base = match path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    Ok(base.with_env(env)?.to_toml()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feynman.toml");
        std::fs::write(&path, "addr = \"127.0.0.1:7000\"\nflush_interval_ms = 20\n").unwrap();

        let out = effective_config(Some(&path), |var| {
            (var == "FEYNMAN_FLUSH_MS").then(|| "5".to_string())
        })
        .unwrap();
        assert!(out.contains("addr = \"127.0.0.1:7000\""));
        assert!(out.contains("flush_interval_ms = 5"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = effective_config(Some(&dir.path().join("absent.toml")), |_| None).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}

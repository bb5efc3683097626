async fn probe_device(client: &WebWorkflowClient) -> anyhow::Result<VersionInfo> {
    match client.get_version().await {
        Ok(version) => Ok(version),
        Err(err) if err.is_auth() => Err(anyhow::Error::new(err).context("authentication failed")),
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("failed to reach device at {}", client.base_url()))),
    }
}

fn resolve_local_root(value: &str) -> Result<PathBuf, ConfigError> {
    if value == "~" || value.starts_with("~/") {
        let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        return Ok(expand_with_home(value, &home));
    }
    Ok(PathBuf::from(value))
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { name, value })
        }
        _ => Ok(default),
    }
}

fn read_list_env<F>(lookup: &F, name: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

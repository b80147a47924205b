use std::path::PathBuf;

pub const CONTROL_TCP_PORT: u16 = 9877;
const CONTROL_TCP_HOST: &str = "127.0.0.1";

pub fn control_address() -> String {
    format!("{}:{}", CONTROL_TCP_HOST, CONTROL_TCP_PORT)
}

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/playout/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("playout")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playout")
    }
}

pub fn config_dir() -> PathBuf {
    // An explicit override wins, so a unit file can point at /etc.
    if let Ok(dir) = std::env::var("PLAYOUT_CONFIG_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("playout")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playout")
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Path of the supervisor notification socket, if the process runs under one.
pub fn notify_socket() -> Option<PathBuf> {
    let raw = std::env::var_os("NOTIFY_SOCKET")?;
    if raw.is_empty() {
        return None;
    }
    Some(PathBuf::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_namespaced() {
        assert!(data_dir().ends_with("playout"));
        assert!(control_address().ends_with(&CONTROL_TCP_PORT.to_string()));
    }
}

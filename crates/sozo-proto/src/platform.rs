use std::path::PathBuf;

use crate::model::PlayerKind;

const APP_DIR: &str = "sozo";

/// Name of the mpv IPC endpoint for one player.  Each player runs its own mpv
/// process, so the live and on-demand sockets must not collide.
#[cfg(unix)]
pub fn mpv_socket_name(kind: PlayerKind) -> String {
    format!(
        "{}/sozo-mpv-{}.sock",
        std::env::temp_dir().display(),
        socket_suffix(kind)
    )
}

#[cfg(windows)]
pub fn mpv_socket_name(kind: PlayerKind) -> String {
    format!("sozo-mpv-{}", socket_suffix(kind))
}

#[cfg(unix)]
pub fn mpv_socket_arg(kind: PlayerKind) -> String {
    format!("--input-ipc-server={}", mpv_socket_name(kind))
}

#[cfg(windows)]
pub fn mpv_socket_arg(kind: PlayerKind) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name(kind))
}

fn socket_suffix(kind: PlayerKind) -> &'static str {
    match kind {
        PlayerKind::Live => "live",
        PlayerKind::OnDemand => "ondemand",
    }
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/sozo on every unix, including macOS
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SOZO_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find mpv: `MPV_PATH`, then beside the current exe, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(exe_name))
        .find(|p| p.exists())
}

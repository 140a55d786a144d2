//! Process titles for `ps` output.

/// Sets the process title, best effort. On Linux this is `prctl`'s comm
/// name, truncated by the kernel to 15 bytes; elsewhere it is a no-op.
pub fn set_process_title(title: &str) {
    #[cfg(target_os = "linux")]
    {
        if let Ok(name) = std::ffi::CString::new(title) {
            let _ = nix::sys::prctl::set_name(&name);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = title;
    }
}

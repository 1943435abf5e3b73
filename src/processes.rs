//! Running-process enumeration and admin-elevation checks (spec §4.3
//! `blocking_applications`, §5 privilege requirement).

/// Abstracts over process enumeration and elevation so installer dispatch
/// can be tested without a real process table.
pub trait ProcessSnapshot {
    /// Lowercased executable names (no path, no extension stripped) for
    /// every currently-running process.
    fn running_executables(&self) -> Vec<String>;

    /// True if the current process token has administrator privileges.
    fn is_elevated(&self) -> bool;
}

/// Returns the subset of `blocking_applications` that are currently
/// running, case-insensitive, matched against the bare executable name
/// (spec §4.3: a non-empty result means the install/uninstall is skipped
/// this run, not failed).
pub fn blocking_apps_running(snapshot: &dyn ProcessSnapshot, blocking_applications: &[String]) -> Vec<String> {
    if blocking_applications.is_empty() {
        return Vec::new();
    }
    let running = snapshot.running_executables();
    blocking_applications
        .iter()
        .filter(|name| {
            let needle = name.to_lowercase();
            running.iter().any(|r| r == &needle)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
pub struct FakeProcessSnapshot {
    pub running: Vec<String>,
    pub elevated: bool,
}

impl ProcessSnapshot for FakeProcessSnapshot {
    fn running_executables(&self) -> Vec<String> {
        self.running.iter().map(|s| s.to_lowercase()).collect()
    }

    fn is_elevated(&self) -> bool {
        self.elevated
    }
}

#[cfg(windows)]
pub mod windows_impl {
    use super::ProcessSnapshot;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    pub struct WindowsProcessSnapshot;

    impl WindowsProcessSnapshot {
        pub fn new() -> Self {
            WindowsProcessSnapshot
        }
    }

    impl Default for WindowsProcessSnapshot {
        fn default() -> Self {
            Self::new()
        }
    }

    fn wide_to_string(wide: &[u16]) -> String {
        let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
        String::from_utf16_lossy(&wide[..len])
    }

    impl ProcessSnapshot for WindowsProcessSnapshot {
        fn running_executables(&self) -> Vec<String> {
            let mut names = Vec::new();
            unsafe {
                let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
                if snapshot == INVALID_HANDLE_VALUE {
                    return names;
                }
                let mut entry: PROCESSENTRY32W = std::mem::zeroed();
                entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;
                if Process32FirstW(snapshot, &mut entry) != 0 {
                    loop {
                        names.push(wide_to_string(&entry.szExeFile).to_lowercase());
                        if Process32NextW(snapshot, &mut entry) == 0 {
                            break;
                        }
                    }
                }
                CloseHandle(snapshot);
            }
            names
        }

        fn is_elevated(&self) -> bool {
            unsafe {
                let mut token: HANDLE = 0;
                if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
                    return false;
                }
                let mut elevation: TOKEN_ELEVATION = std::mem::zeroed();
                let mut returned_len: u32 = 0;
                let ok = GetTokenInformation(
                    token,
                    TokenElevation,
                    &mut elevation as *mut _ as *mut core::ffi::c_void,
                    std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                    &mut returned_len,
                );
                CloseHandle(token);
                ok != 0 && elevation.TokenIsElevated != 0
            }
        }
    }
}

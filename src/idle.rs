//! User idle time (spec §4.1 `--auto`: "suppress action if the current
//! interactive user's idle time < 300 s"). Isolated behind a trait the same
//! way `ProcessSnapshot`/`RegistryLedger` are, so the 300-second gate is
//! testable without a real desktop session.

pub trait IdleTime {
    /// Seconds since the last keyboard/mouse input on the interactive
    /// desktop, or `None` when it can't be determined (no interactive
    /// session attached, e.g. running as a service with nobody logged in —
    /// treated as "idle" rather than blocking the run).
    fn idle_seconds(&self) -> Option<u64>;
}

/// Minimum idle time an `--auto` run requires before it's allowed to act
/// (spec §4.1).
pub const AUTO_IDLE_THRESHOLD_SECS: u64 = 300;

/// True when an `--auto` run should suppress its own actions this pass
/// because the user was active too recently.
pub fn auto_run_should_suppress(idle: &dyn IdleTime) -> bool {
    matches!(idle.idle_seconds(), Some(secs) if secs < AUTO_IDLE_THRESHOLD_SECS)
}

#[derive(Debug, Default)]
pub struct FakeIdleTime(pub Option<u64>);

impl IdleTime for FakeIdleTime {
    fn idle_seconds(&self) -> Option<u64> {
        self.0
    }
}

#[cfg(windows)]
pub mod windows_impl {
    use super::IdleTime;
    use windows_sys::Win32::System::SystemInformation::GetTickCount;
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO};

    pub struct WindowsIdleTime;

    impl WindowsIdleTime {
        pub fn new() -> Self {
            WindowsIdleTime
        }
    }

    impl Default for WindowsIdleTime {
        fn default() -> Self {
            Self::new()
        }
    }

    impl IdleTime for WindowsIdleTime {
        fn idle_seconds(&self) -> Option<u64> {
            unsafe {
                let mut info: LASTINPUTINFO = std::mem::zeroed();
                info.cbSize = std::mem::size_of::<LASTINPUTINFO>() as u32;
                if GetLastInputInfo(&mut info) == 0 {
                    return None;
                }
                let now = GetTickCount();
                Some(now.wrapping_sub(info.dwTime) as u64 / 1000)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_activity_suppresses_auto_run() {
        let idle = FakeIdleTime(Some(30));
        assert!(auto_run_should_suppress(&idle));
    }

    #[test]
    fn long_idle_does_not_suppress_auto_run() {
        let idle = FakeIdleTime(Some(600));
        assert!(!auto_run_should_suppress(&idle));
    }

    #[test]
    fn unknown_idle_time_does_not_suppress_auto_run() {
        let idle = FakeIdleTime(None);
        assert!(!auto_run_should_suppress(&idle));
    }
}
